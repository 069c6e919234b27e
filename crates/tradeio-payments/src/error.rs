// ============================================================================
// TRADEIO-PAYMENTS - Error Types
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What was being submitted when a submission failed.
///
/// Carried by every submission error so the caller can decide whether to
/// re-fetch account state and rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionContext {
    /// Source account address (G...)
    pub account: String,
    /// Sequence number the envelope was built with
    pub sequence: i64,
    /// Operation kinds in envelope order, e.g. "payment"
    pub operation: String,
}

impl fmt::Display for SubmissionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account {} seq {} ops [{}]",
            self.account, self.sequence, self.operation
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    // ==================== Key Errors ====================
    #[error("Invalid Stellar address: {0}")]
    InvalidAddress(String),

    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    // ==================== Account Errors ====================
    #[error("Account not found: {0}")]
    NotFound(String),

    // ==================== Transaction Errors ====================
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Signer {signer} already signed this transaction")]
    DuplicateSigner { signer: String },

    #[error("Envelope was built for network '{envelope}', signer is configured for '{signer}'")]
    NetworkMismatch { envelope: String, signer: String },

    // ==================== Submission Errors ====================
    #[error("Underfunded ({context}): {code}")]
    Underfunded {
        context: SubmissionContext,
        code: String,
    },

    #[error("Bad sequence ({context}): re-fetch account state and rebuild")]
    BadSequence { context: SubmissionContext },

    #[error("Unauthorized ({context}): {reason}")]
    Unauthorized {
        context: SubmissionContext,
        reason: String,
    },

    #[error("Transaction rejected ({context}): tx: {transaction_code}, ops: {operation_codes:?}")]
    Rejected {
        context: SubmissionContext,
        transaction_code: String,
        operation_codes: Vec<String>,
    },

    // ==================== Network Errors ====================
    #[error("Network request failed: {0}")]
    NetworkError(String),

    #[error("Funding request failed: {0}")]
    FundingError(String),

    #[error("Payment stream terminated after {attempts} reconnect attempts: {reason}")]
    StreamTerminated { attempts: u32, reason: String },

    /// A payment record the stream could not decode. Not terminal: the
    /// stream moves past it and keeps going.
    #[error("Undecodable payment record {paging_token}: {reason}")]
    UndecodableRecord { paging_token: String, reason: String },

    // ==================== Configuration Errors ====================
    #[error("Configuration error: {0}")]
    Config(String),

    // ==================== Internal Errors ====================
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentError {
    /// Transport-level failures are the only retryable kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::NetworkError(_))
    }

    /// Short machine-readable code for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidAddress(_) => "invalid_address",
            PaymentError::InvalidSecretKey(_) => "invalid_secret_key",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::InvalidTransaction(_) => "invalid_transaction",
            PaymentError::DuplicateSigner { .. } => "duplicate_signer",
            PaymentError::NetworkMismatch { .. } => "network_mismatch",
            PaymentError::Underfunded { .. } => "underfunded",
            PaymentError::BadSequence { .. } => "bad_sequence",
            PaymentError::Unauthorized { .. } => "unauthorized",
            PaymentError::Rejected { .. } => "rejected",
            PaymentError::NetworkError(_) => "network_error",
            PaymentError::FundingError(_) => "funding_error",
            PaymentError::StreamTerminated { .. } => "stream_terminated",
            PaymentError::UndecodableRecord { .. } => "undecodable_record",
            PaymentError::Config(_) => "config",
            PaymentError::Serialization(_) => "serialization",
        }
    }

    /// Submission context, when the error came out of a submission.
    pub fn context(&self) -> Option<&SubmissionContext> {
        match self {
            PaymentError::Underfunded { context, .. }
            | PaymentError::BadSequence { context }
            | PaymentError::Unauthorized { context, .. }
            | PaymentError::Rejected { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        PaymentError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

impl From<stellar_xdr::curr::Error> for PaymentError {
    fn from(err: stellar_xdr::curr::Error) -> Self {
        PaymentError::Serialization(format!("XDR: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for PaymentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PaymentError::NetworkError("operation timed out".to_string())
    }
}
