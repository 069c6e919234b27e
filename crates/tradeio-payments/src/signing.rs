// ============================================================================
// TRADEIO-PAYMENTS - Signature Collection
// ============================================================================
// Attach ed25519 signatures to an envelope and check them against the
// source account's signer weights and thresholds.
// ============================================================================

use crate::account::{Account, OperationClass};
use crate::config::StellarConfig;
use crate::error::PaymentError;
use crate::keypair::{verify_signature, KeyPair};
use crate::transaction::{DecoratedSignature, TransactionEnvelope, MAX_SIGNATURES};
use crate::Result;
use std::collections::HashSet;
use tracing::debug;

/// Signs envelopes for one network.
#[derive(Debug, Clone)]
pub struct SignatureCollector {
    network_passphrase: String,
}

impl SignatureCollector {
    pub fn new(config: &StellarConfig) -> Self {
        Self {
            network_passphrase: config.network_passphrase.clone(),
        }
    }

    /// Append `keypair`'s signature over the envelope's signing hash.
    ///
    /// On error the envelope is left untouched.
    pub fn sign(&self, envelope: &mut TransactionEnvelope, keypair: &KeyPair) -> Result<()> {
        if envelope.network_passphrase() != self.network_passphrase {
            return Err(PaymentError::NetworkMismatch {
                envelope: envelope.network_passphrase().to_string(),
                signer: self.network_passphrase.clone(),
            });
        }

        if envelope.is_signed_by(keypair.address()) {
            return Err(PaymentError::DuplicateSigner {
                signer: keypair.address().to_string(),
            });
        }

        if envelope.signatures().len() >= MAX_SIGNATURES {
            return Err(PaymentError::InvalidTransaction(format!(
                "Envelope already carries {} signatures", MAX_SIGNATURES
            )));
        }

        let signature = keypair.sign(&envelope.hash());
        envelope.push_signature(DecoratedSignature {
            signer: keypair.address().to_string(),
            hint: keypair.hint(),
            signature,
        });

        debug!(
            "Signed {} (seq {}) with {}",
            envelope.hash_hex(), envelope.sequence(), keypair.address()
        );
        Ok(())
    }

    /// Whether the attached signatures meet `class`'s threshold on `account`.
    ///
    /// Only signers listed on the account count, each once. Advisory: the
    /// network makes the final decision.
    pub fn is_authorized(
        &self,
        envelope: &TransactionEnvelope,
        account: &Account,
        class: OperationClass,
    ) -> bool {
        let signers: HashSet<&str> = envelope
            .signatures()
            .iter()
            .map(|sig| sig.signer.as_str())
            .collect();
        let weight: u64 = signers
            .into_iter()
            .map(|signer| u64::from(account.signer_weight(signer)))
            .sum();

        weight >= u64::from(account.required_weight(class))
    }

    /// Highest threshold class among the envelope's operations
    pub fn required_class(&self, envelope: &TransactionEnvelope) -> OperationClass {
        envelope.required_class()
    }

    /// Check every attached signature against the signing hash
    pub fn verify(&self, envelope: &TransactionEnvelope) -> bool {
        let hash = envelope.hash();
        envelope
            .signatures()
            .iter()
            .all(|sig| verify_signature(&sig.signer, &hash, &sig.signature))
    }
}
