// ============================================================================
// TRADEIO-PAYMENTS - Transaction Submission
// ============================================================================
// Submit signed envelopes, classify the network's answer, and retry
// transport failures with exponential backoff.
//
// Protocol rejections are never retried. A transaction rejected for a stale
// sequence number needs fresh account state, which only the caller can
// decide to fetch.
// ============================================================================

use crate::config::{RetryPolicy, StellarConfig};
use crate::error::{PaymentError, SubmissionContext};
use crate::transaction::TransactionEnvelope;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// TRANSPORT SEAM
// ============================================================================

/// What the network said about a posted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Applied in `ledger`
    Accepted { hash: String, ledger: u32 },

    /// Rejected with the network's result codes
    Rejected {
        transaction_code: String,
        operation_codes: Vec<String>,
    },
}

/// Posts envelopes to the network.
///
/// Transport failures (connection errors, rate limiting, gateway timeouts)
/// come back as `PaymentError::NetworkError`.
#[async_trait]
pub trait TransactionTransport: Send + Sync {
    async fn post_transaction(&self, envelope: &TransactionEnvelope) -> Result<SubmissionOutcome>;
}

// ============================================================================
// SUBMISSION CLIENT
// ============================================================================

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Hex transaction hash
    pub hash: String,
    pub ledger: u32,
    pub success: bool,
}

pub struct SubmissionClient {
    transport: Arc<dyn TransactionTransport>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl SubmissionClient {
    pub fn new(transport: Arc<dyn TransactionTransport>, config: &StellarConfig) -> Self {
        Self {
            transport,
            retry: config.retry.clone(),
            default_timeout: config.submit_timeout(),
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Submit with the configured default timeout.
    pub async fn submit(&self, envelope: TransactionEnvelope) -> Result<SubmissionResult> {
        self.submit_with_timeout(envelope, self.default_timeout).await
    }

    /// Submit, bounding the whole attempt (retries included) by `timeout`.
    ///
    /// The envelope is consumed: a submitted envelope cannot be sent again.
    pub async fn submit_with_timeout(
        &self,
        envelope: TransactionEnvelope,
        timeout: Duration,
    ) -> Result<SubmissionResult> {
        if timeout.is_zero() {
            return Err(PaymentError::NetworkError(
                "Submission timeout is zero".to_string()
            ));
        }

        let context = envelope.context();

        if envelope.signatures().is_empty() {
            return Err(PaymentError::Unauthorized {
                context,
                reason: "Envelope carries no signatures".to_string(),
            });
        }

        info!("Submitting transaction {} ({})", envelope.hash_hex(), context);

        match tokio::time::timeout(timeout, self.submit_with_retry(&envelope, &context)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Submission of {} timed out after {:?}", envelope.hash_hex(), timeout);
                Err(PaymentError::NetworkError(format!(
                    "Submission timed out after {:?}", timeout
                )))
            }
        }
    }

    async fn submit_with_retry(
        &self,
        envelope: &TransactionEnvelope,
        context: &SubmissionContext,
    ) -> Result<SubmissionResult> {
        let mut attempt = 0u32;
        loop {
            match self.transport.post_transaction(envelope).await {
                Ok(SubmissionOutcome::Accepted { hash, ledger }) => {
                    info!("Transaction {} applied in ledger {}", hash, ledger);
                    return Ok(SubmissionResult {
                        hash,
                        ledger,
                        success: true,
                    });
                }
                Ok(SubmissionOutcome::Rejected { transaction_code, operation_codes }) => {
                    warn!(
                        "Transaction rejected ({}): tx: {}, ops: {:?}",
                        context, transaction_code, operation_codes
                    );
                    return Err(classify_rejection(context.clone(), transaction_code, operation_codes));
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.retry.max_retries {
                        return Err(err);
                    }

                    let delay = self.backoff_with_jitter(attempt);
                    attempt += 1;
                    debug!(
                        "Transport failure ({}), retry {}/{} in {:?}",
                        err, attempt, self.retry.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.retry.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.retry.jitter_ms)
        };
        self.retry.backoff(attempt) + Duration::from_millis(jitter)
    }
}

/// Map network result codes to a terminal error.
///
/// The transaction code is consulted first, then the operation codes in
/// order, so `tx_failed` with `op_underfunded` still reports `Underfunded`.
pub fn classify_rejection(
    context: SubmissionContext,
    transaction_code: String,
    operation_codes: Vec<String>,
) -> PaymentError {
    let codes = std::iter::once(transaction_code.as_str()).chain(operation_codes.iter().map(String::as_str));

    for code in codes {
        match code {
            "tx_bad_seq" => return PaymentError::BadSequence { context },
            "tx_bad_auth" | "tx_bad_auth_extra" | "op_bad_auth" => {
                return PaymentError::Unauthorized {
                    context,
                    reason: code.to_string(),
                };
            }
            "tx_insufficient_balance" | "op_underfunded" | "op_low_reserve" => {
                return PaymentError::Underfunded {
                    context,
                    code: code.to_string(),
                };
            }
            _ => {}
        }
    }

    PaymentError::Rejected {
        context,
        transaction_code,
        operation_codes,
    }
}
