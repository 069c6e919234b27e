// ============================================================================
// TRADEIO-PAYMENTS - Signing Keys
// ============================================================================
// Ed25519 keypairs addressed by their Stellar G... account id.
// ============================================================================

use crate::strkey::{decode_account_id, decode_secret_seed, encode_account_id, encode_secret_seed};
use crate::Result;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// An account signing key.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    address: String,
}

impl KeyPair {
    /// Load from a Stellar secret seed (S... format)
    pub fn from_secret_seed(seed: &str) -> Result<Self> {
        let secret = decode_secret_seed(seed)?;
        Self::from_secret_bytes(&secret)
    }

    /// Load from raw Ed25519 secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self> {
        let signing = SigningKey::from_bytes(secret);
        let address = encode_account_id(signing.verifying_key().as_bytes())?;
        Ok(Self { signing, address })
    }

    /// Fresh random keypair
    pub fn random() -> Self {
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        // A verifying key is always 32 bytes
        let address = encode_account_id(signing.verifying_key().as_bytes()).unwrap_or_default();
        Self { signing, address }
    }

    /// G... account id
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// S... seed
    pub fn secret_seed(&self) -> String {
        encode_secret_seed(&self.signing.to_bytes())
    }

    /// Last four bytes of the public key, as carried in decorated signatures
    pub fn hint(&self) -> [u8; 4] {
        signature_hint(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Last four bytes of a public key
pub fn signature_hint(public_key: &[u8; 32]) -> [u8; 4] {
    [public_key[28], public_key[29], public_key[30], public_key[31]]
}

/// Verify an Ed25519 signature made by the key behind a G... address
pub fn verify_signature(address: &str, message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key_bytes) = decode_account_id(address) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}
