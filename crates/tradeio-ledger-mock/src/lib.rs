//! In-memory Stellar ledger for exercising the payment client without a network.

pub mod mock_ledger;
pub mod scenarios;

pub use mock_ledger::{MockLedger, FRIENDBOT_ADDRESS, FRIENDBOT_AMOUNT, MIN_BALANCE};
pub use scenarios::DemoScenario;
