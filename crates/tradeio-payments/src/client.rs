// ============================================================================
// TRADEIO-PAYMENTS - Payment Client
// ============================================================================
// High-level client that wires account lookup, building, signing,
// submission and payment streams together.
//
// Features:
// - Send payments from a single key
// - Send payments from a multisig account (threshold checked locally first)
// - Submit arbitrary operations (trustlines, signer setup, sequence bumps)
// - Watch an account's payments
// - Fund test accounts through friendbot
// ============================================================================

use crate::account::{Account, AccountFetcher};
use crate::config::StellarConfig;
use crate::error::PaymentError;
use crate::faucet::Faucet;
use crate::horizon::HorizonClient;
use crate::keypair::KeyPair;
use crate::signing::SignatureCollector;
use crate::stream::{Cursor, PaymentEvent, PaymentEventStream, PaymentFeed};
use crate::submission::{SubmissionClient, SubmissionResult, TransactionTransport};
use crate::transaction::{Asset, Memo, Operation, TransactionBuilder, TransactionEnvelope};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// High-level Stellar payment client
pub struct PaymentClient {
    config: StellarConfig,
    accounts: Arc<dyn AccountFetcher>,
    submitter: SubmissionClient,
    feed: Arc<dyn PaymentFeed>,
    collector: SignatureCollector,
    faucet: Option<Faucet>,
}

impl PaymentClient {
    /// Client backed by the configured Horizon server
    pub fn new(config: StellarConfig) -> Result<Self> {
        config.validate()?;
        let horizon = Arc::new(HorizonClient::new(config.clone())?);
        let faucet = match config.friendbot_url {
            Some(_) => Some(Faucet::new(&config)?),
            None => None,
        };

        let mut client = Self::with_network(config, horizon.clone(), horizon.clone(), horizon);
        client.faucet = faucet;
        Ok(client)
    }

    /// Create testnet client
    pub fn testnet() -> Result<Self> {
        Self::new(StellarConfig::testnet())
    }

    /// Client over explicit network seams (no faucet)
    pub fn with_network(
        config: StellarConfig,
        accounts: Arc<dyn AccountFetcher>,
        transport: Arc<dyn TransactionTransport>,
        feed: Arc<dyn PaymentFeed>,
    ) -> Self {
        Self {
            submitter: SubmissionClient::new(transport, &config),
            collector: SignatureCollector::new(&config),
            config,
            accounts,
            feed,
            faucet: None,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &StellarConfig {
        &self.config
    }

    /// Transaction builder for this network
    pub fn builder(&self) -> TransactionBuilder {
        TransactionBuilder::new(&self.config)
    }

    pub fn collector(&self) -> &SignatureCollector {
        &self.collector
    }

    pub fn submitter(&self) -> &SubmissionClient {
        &self.submitter
    }

    // ==================== Account Queries ====================

    pub async fn fetch_account(&self, address: &str) -> Result<Account> {
        self.accounts.fetch_account(address).await
    }

    /// Check if account exists
    pub async fn account_exists(&self, address: &str) -> Result<bool> {
        match self.accounts.fetch_account(address).await {
            Ok(_) => Ok(true),
            Err(PaymentError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ==================== Send Operations ====================

    /// Pay `amount` of `asset` from `sender` to `destination`.
    ///
    /// A native payment to an account that does not exist yet creates it.
    pub async fn send_payment(
        &self,
        sender: &KeyPair,
        destination: &str,
        asset: Asset,
        amount: &str,
        memo: Option<&str>,
    ) -> Result<SubmissionResult> {
        let operation = if asset.is_native() && !self.account_exists(destination).await? {
            info!("Destination {} does not exist, creating it", destination);
            Operation::create_account(destination, amount)
        } else {
            Operation::payment(destination, asset, amount)
        };

        let memo = memo.map(|text| Memo::Text(text.to_string())).unwrap_or_default();
        let result = self
            .submit_operations(sender.address(), std::slice::from_ref(sender), vec![operation], memo)
            .await?;

        info!("Sent {} -> {} in {}", amount, destination, result.hash);
        Ok(result)
    }

    /// Pay from `source`, signed by every key in `signers`.
    ///
    /// Fails with `Unauthorized` before submitting when the signatures
    /// cannot meet the account's threshold.
    pub async fn send_multisig_payment(
        &self,
        source: &str,
        signers: &[KeyPair],
        destination: &str,
        asset: Asset,
        amount: &str,
    ) -> Result<SubmissionResult> {
        let operation = Operation::payment(destination, asset, amount);
        self.submit_operations(source, signers, vec![operation], Memo::None).await
    }

    /// Fetch `source`, build `operations`, sign with `signers`, check the
    /// threshold locally and submit.
    pub async fn submit_operations(
        &self,
        source: &str,
        signers: &[KeyPair],
        operations: Vec<Operation>,
        memo: Memo,
    ) -> Result<SubmissionResult> {
        let account = self.accounts.fetch_account(source).await?;
        let envelope = self.builder().memo(memo).build(&account, operations)?;
        let envelope = self.sign_all(envelope, signers)?;

        self.check_authorized(&envelope, &account)?;

        match self.submitter.submit(envelope).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Submission from {} failed: {}", source, e);
                Err(e)
            }
        }
    }

    fn sign_all(&self, mut envelope: TransactionEnvelope, signers: &[KeyPair]) -> Result<TransactionEnvelope> {
        for signer in signers {
            self.collector.sign(&mut envelope, signer)?;
        }
        Ok(envelope)
    }

    fn check_authorized(&self, envelope: &TransactionEnvelope, account: &Account) -> Result<()> {
        let class = self.collector.required_class(envelope);
        if self.collector.is_authorized(envelope, account, class) {
            return Ok(());
        }

        let weight: u32 = envelope
            .signatures()
            .iter()
            .map(|sig| account.signer_weight(&sig.signer))
            .sum();
        Err(PaymentError::Unauthorized {
            context: envelope.context(),
            reason: format!(
                "signature weight {} below {:?} threshold {}",
                weight, class, account.required_weight(class)
            ),
        })
    }

    // ==================== Streaming ====================

    /// Follow `address`'s payments through a channel
    pub async fn watch_payments(&self, address: &str, cursor: Cursor) -> Result<PaymentEventStream> {
        PaymentEventStream::open(Arc::clone(&self.feed), &self.config.stream, address, cursor).await
    }

    /// Follow `address`'s payments through a callback
    pub async fn watch_payments_with_handler<F>(
        &self,
        address: &str,
        cursor: Cursor,
        handler: F,
    ) -> Result<PaymentEventStream>
    where
        F: FnMut(Result<PaymentEvent>) + Send + 'static,
    {
        PaymentEventStream::open_with_handler(
            Arc::clone(&self.feed),
            &self.config.stream,
            address,
            cursor,
            handler,
        )
        .await
    }

    // ==================== Testnet Only ====================

    /// Fund account using friendbot
    pub async fn fund(&self, address: &str) -> Result<()> {
        let faucet = self.faucet.as_ref().ok_or_else(|| {
            PaymentError::FundingError("No friendbot configured for this network".to_string())
        })?;
        faucet.fund(address).await
    }

    /// Explorer link for a submitted transaction
    pub fn explorer_url(&self, result: &SubmissionResult) -> String {
        self.config.explorer_tx_url(&result.hash)
    }
}
