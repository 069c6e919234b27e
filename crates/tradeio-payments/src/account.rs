// ============================================================================
// TRADEIO-PAYMENTS - Account State
// ============================================================================
// Sequence number, signers and thresholds of a ledger account, fetched on
// demand. Never cached: a stale sequence number means a rejected submission.
// ============================================================================

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Threshold category an operation falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: u8,
    pub medium: u8,
    pub high: u8,
}

impl Thresholds {
    pub fn new(low: u8, medium: u8, high: u8) -> Self {
        Self { low, medium, high }
    }

    pub fn for_class(&self, class: OperationClass) -> u8 {
        match class {
            OperationClass::Low => self.low,
            OperationClass::Medium => self.medium,
            OperationClass::High => self.high,
        }
    }
}

/// Balance line; informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// "native" for XLM, otherwise CODE:ISSUER
    pub asset: String,
    /// Decimal string as reported by the network
    pub balance: String,
}

/// Snapshot of a ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// G... address
    pub address: String,

    /// Sequence number of the last transaction applied for this account
    pub sequence: i64,

    /// Signer public key (G...) → weight; includes the master key
    pub signers: BTreeMap<String, u32>,

    pub thresholds: Thresholds,

    #[serde(default)]
    pub balances: Vec<AccountBalance>,
}

impl Account {
    /// Single-key account with the master key at weight 1 and zero thresholds,
    /// which is what a freshly created Stellar account looks like.
    pub fn new(address: &str, sequence: i64) -> Self {
        let mut signers = BTreeMap::new();
        signers.insert(address.to_string(), 1);
        Self {
            address: address.to_string(),
            sequence,
            signers,
            thresholds: Thresholds::default(),
            balances: Vec::new(),
        }
    }

    /// Set the master key weight
    pub fn with_master_weight(mut self, weight: u32) -> Self {
        let address = self.address.clone();
        self.set_signer(&address, weight);
        self
    }

    pub fn with_signer(mut self, signer: &str, weight: u32) -> Self {
        self.set_signer(signer, weight);
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Weight 0 removes the signer
    pub fn set_signer(&mut self, signer: &str, weight: u32) {
        if weight == 0 {
            self.signers.remove(signer);
        } else {
            self.signers.insert(signer.to_string(), weight);
        }
    }

    pub fn signer_weight(&self, signer: &str) -> u32 {
        self.signers.get(signer).copied().unwrap_or(0)
    }

    /// Weight required for the class. A zero threshold still needs one
    /// signature of non-zero weight, as on the network.
    pub fn required_weight(&self, class: OperationClass) -> u32 {
        u32::from(self.thresholds.for_class(class)).max(1)
    }

    /// Sequence number the next transaction must carry
    pub fn next_sequence(&self) -> i64 {
        self.sequence + 1
    }

    /// Balance line for "native" or CODE:ISSUER
    pub fn balance(&self, asset: &str) -> Option<&str> {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.balance.as_str())
    }
}

/// Source of current account state.
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    /// Current state of `address`; `NotFound` when the account does not exist.
    async fn fetch_account(&self, address: &str) -> Result<Account>;
}
