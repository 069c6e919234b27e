// ============================================================================
// TRADEIO-PAYMENTS - StrKey Encoding/Decoding
// ============================================================================
// Stellar "StrKey" encoding: version byte + payload + CRC16 checksum, base32.
//
// - G... account ids (ed25519 public keys)
// - S... secret seeds (ed25519 secret keys)
//
// The encoding itself lives in `stellar-strkey`; this module maps its
// results onto crate errors and rejects keys of the wrong kind early.
// ============================================================================

use crate::error::PaymentError;
use crate::Result;
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

/// Encode raw Ed25519 public key bytes as a Stellar G... address
///
/// # Example
/// ```
/// use tradeio_payments::strkey::encode_account_id;
///
/// let address = encode_account_id(&[0u8; 32]).unwrap();
/// assert_eq!(address, "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF");
/// ```
pub fn encode_account_id(key_bytes: &[u8]) -> Result<String> {
    let key: [u8; 32] = key_bytes.try_into().map_err(|_| {
        PaymentError::InvalidAddress(format!("Expected 32 bytes, got {}", key_bytes.len()))
    })?;
    Ok(PublicKey(key).to_string())
}

/// Decode a Stellar G... address to raw Ed25519 public key bytes
pub fn decode_account_id(address: &str) -> Result<[u8; 32]> {
    if !address.starts_with('G') {
        return Err(PaymentError::InvalidAddress(format!(
            "{}: must start with 'G'", address
        )));
    }

    PublicKey::from_string(address)
        .map(|key| key.0)
        .map_err(|_| PaymentError::InvalidAddress(format!("{}: bad encoding or checksum", address)))
}

/// Encode raw Ed25519 secret key bytes as a Stellar S... seed
pub fn encode_secret_seed(secret_bytes: &[u8; 32]) -> String {
    PrivateKey(*secret_bytes).to_string()
}

/// Decode a Stellar S... seed to raw Ed25519 secret key bytes
pub fn decode_secret_seed(seed: &str) -> Result<[u8; 32]> {
    if !seed.starts_with('S') {
        return Err(PaymentError::InvalidSecretKey("must start with 'S'".to_string()));
    }

    PrivateKey::from_string(seed)
        .map(|key| key.0)
        .map_err(|_| PaymentError::InvalidSecretKey("bad encoding or checksum".to_string()))
}

/// Cheap validity check for G... addresses
pub fn is_valid_account_id(address: &str) -> bool {
    decode_account_id(address).is_ok()
}

// ============================================================================
// TESTS
// ============================================================================
