// ============================================================================
// TRADEIO-PAYMENTS - Stellar Payment Client Core
// ============================================================================
// Client-side core for a Stellar-compatible payment network.
//
// Control flow:
//   fetch account → build envelope → sign (one or many keys) → submit
// and, independently, a live stream of the account's payments.
//
// Features:
// - StrKey addresses and seeds, ed25519 keypairs
// - Transaction envelopes with deterministic XDR and signing hash
// - Multisig signature collection with threshold checks
// - Submission with result classification and bounded retry
// - Resumable payment streams with reconnect and replay suppression
// - Friendbot funding for test networks
//
// The network is reached through three traits (`AccountFetcher`,
// `TransactionTransport`, `PaymentFeed`); `HorizonClient` implements all
// three over HTTP.
// ============================================================================

pub mod account;
pub mod amount;
pub mod client;
pub mod conditions;
pub mod config;
pub mod error;
pub mod faucet;
pub mod horizon;
pub mod keypair;
pub mod signing;
pub mod sse;
pub mod stream;
pub mod strkey;
pub mod submission;
pub mod transaction;

pub use account::{Account, AccountFetcher, OperationClass, Thresholds};
pub use client::PaymentClient;
pub use conditions::ConditionSet;
pub use config::{Network, RetryPolicy, StellarConfig, StreamConfig};
pub use error::{PaymentError, SubmissionContext};
pub use faucet::Faucet;
pub use horizon::HorizonClient;
pub use keypair::KeyPair;
pub use signing::SignatureCollector;
pub use stream::{Cursor, PaymentEvent, PaymentEventStream, PaymentFeed, PaymentKind, PaymentRecords, StreamState};
pub use submission::{SubmissionClient, SubmissionOutcome, SubmissionResult, TransactionTransport};
pub use transaction::{Asset, Memo, Operation, SetOptions, SignerUpdate, TransactionBuilder, TransactionEnvelope};

/// XDR types behind [`TransactionEnvelope::transaction`]
pub use stellar_xdr::curr as xdr;

/// Re-export for convenience
pub type Result<T> = std::result::Result<T, PaymentError>;
