use std::sync::Arc;

use tradeio_payments::{KeyPair, PaymentClient, Result, StellarConfig, Thresholds};

use crate::mock_ledger::MockLedger;

const ACCOUNT1_SEED: &str = "SDANVBPXX6UUXYZZ7KO45BCEO2WGCKYTVK7RJQKJMC7RTZ5CS3ES35YO";
const ACCOUNT2_SEED: &str = "SD2RGMSJ7MHR66AMUIJOOSJA6HNAL4C3E5O66Z2ZLQWOILB5IEJB7TBI";
const MULTISIG_SEED: &str = "SC4MOEVNHHCUUCIDWOHM4HQIXYJMYMIYIMMXG4OSBQ3RE3T3D7YFIQEK";

/// Three funded accounts on a fresh testnet ledger.
///
/// The multisig account keeps its master key at weight 3 with thresholds
/// 2/2/3, and accepts account1 and account2 as signers of weight 1 each.
#[derive(Debug, Clone)]
pub struct DemoScenario {
    pub account1: KeyPair,
    pub account2: KeyPair,
    pub multisig: KeyPair,
    pub ledger: MockLedger,
    pub config: StellarConfig,
}

impl DemoScenario {
    pub fn new() -> Result<Self> {
        let account1 = KeyPair::from_secret_seed(ACCOUNT1_SEED)?;
        let account2 = KeyPair::from_secret_seed(ACCOUNT2_SEED)?;
        let multisig = KeyPair::from_secret_seed(MULTISIG_SEED)?;

        let config = StellarConfig::testnet();
        let ledger = MockLedger::new(config.network_passphrase.clone());
        for keypair in [&account1, &account2, &multisig] {
            ledger.fund(keypair.address())?;
        }

        ledger.update_account(multisig.address(), |account| {
            let master = account.address.clone();
            account.set_signer(&master, 3);
            account.set_signer(account1.address(), 1);
            account.set_signer(account2.address(), 1);
            account.thresholds = Thresholds::new(2, 2, 3);
        })?;

        Ok(Self {
            account1,
            account2,
            multisig,
            ledger,
            config,
        })
    }

    /// Client whose three network seams all point at the ledger
    pub fn client(&self) -> PaymentClient {
        let ledger = Arc::new(self.ledger.clone());
        PaymentClient::with_network(self.config.clone(), ledger.clone(), ledger.clone(), ledger)
    }
}
