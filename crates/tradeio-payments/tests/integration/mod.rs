//! Integration Tests Module
//!
//! Test categories:
//! - `payment_flow`: single-key payments, sequence handling, submission errors
//! - `multisig_flow`: threshold checks with several signers
//! - `stream_flow`: payment streams, reconnects and completion conditions
//! - `horizon_http`: HTTP status mapping against a local stub server

mod horizon_http;
mod payment_flow;
mod stream_flow;
