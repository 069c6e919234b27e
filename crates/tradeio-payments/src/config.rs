// ============================================================================
// TRADEIO-PAYMENTS - Configuration
// ============================================================================
// Network selection, endpoints, retry and stream policy.
//
// The network passphrase lives here and is handed to the transaction builder
// and signature collector explicitly; there is no global network setting.

use crate::error::PaymentError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAINNET_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Network selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        if cfg!(feature = "mainnet") {
            Network::Mainnet
        } else {
            Network::Testnet
        }
    }
}

impl std::str::FromStr for Network {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "public" | "production" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(PaymentError::Config(format!("Unknown network: {}", other))),
        }
    }
}

/// Retry behaviour for transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt (transport failures only)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_jitter() -> u64 {
    50
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter_ms: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exp.min(self.max_backoff_ms))
    }
}

/// Payment stream connection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Capacity of the event channel between the stream task and the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Bound on each connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Consecutive failed reconnects before the stream gives up
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_max_reconnect_backoff")]
    pub max_reconnect_backoff_ms: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_reconnect_backoff() -> u64 {
    250
}

fn default_max_reconnect_backoff() -> u64 {
    10_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            connect_timeout_ms: default_connect_timeout(),
            max_reconnect_attempts: default_max_reconnects(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            max_reconnect_backoff_ms: default_max_reconnect_backoff(),
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before reconnect number `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .reconnect_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exp.min(self.max_reconnect_backoff_ms))
    }
}

/// Stellar network configuration
///
/// Loadable from JSON:
///
/// ```json
/// {
///   "network": "testnet",
///   "horizonUrl": "https://horizon-testnet.stellar.org",
///   "friendbotUrl": "https://friendbot.stellar.org",
///   "retry": { "maxRetries": 5 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StellarConfig {
    /// Network (mainnet or testnet)
    pub network: Network,

    /// Horizon API URL
    pub horizon_url: String,

    /// Network passphrase for transaction signing
    pub network_passphrase: String,

    /// Faucet base URL, testnet only
    #[serde(default)]
    pub friendbot_url: Option<String>,

    /// Base fee per operation in stroops (1 XLM = 10,000,000 stroops)
    #[serde(default = "default_base_fee")]
    pub base_fee: u32,

    /// Timeout for plain HTTP requests (account lookup, faucet)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Default bound on a whole submission, retries included
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_base_fee() -> u32 {
    100 // 0.00001 XLM
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_submit_timeout() -> u64 {
    60_000
}

impl StellarConfig {
    /// Create mainnet configuration
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            horizon_url: "https://horizon.stellar.org".to_string(),
            network_passphrase: MAINNET_PASSPHRASE.to_string(),
            friendbot_url: None,
            base_fee: default_base_fee(),
            request_timeout_ms: default_request_timeout(),
            submit_timeout_ms: default_submit_timeout(),
            retry: RetryPolicy::default(),
            stream: StreamConfig::default(),
        }
    }

    /// Create testnet configuration
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            network_passphrase: TESTNET_PASSPHRASE.to_string(),
            friendbot_url: Some("https://friendbot.stellar.org".to_string()),
            ..Self::mainnet()
        }
    }

    /// Configuration for the given network with default endpoints
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StellarConfig = serde_json::from_str(json)
            .map_err(|e| PaymentError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `STELLAR_NETWORK`, `HORIZON_URL`, `FRIENDBOT_URL` and
    /// `STELLAR_PASSPHRASE`, falling back to the network defaults.
    pub fn from_env() -> Result<Self> {
        let network = match std::env::var("STELLAR_NETWORK") {
            Ok(value) => value.parse()?,
            Err(_) => Network::default(),
        };

        let mut config = Self::for_network(network);
        if let Ok(url) = std::env::var("HORIZON_URL") {
            config.horizon_url = url;
        }
        if let Ok(url) = std::env::var("FRIENDBOT_URL") {
            config.friendbot_url = Some(url);
        }
        if let Ok(passphrase) = std::env::var("STELLAR_PASSPHRASE") {
            config.network_passphrase = passphrase;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce valid transactions
    pub fn validate(&self) -> Result<()> {
        if self.network_passphrase.is_empty() {
            return Err(PaymentError::Config("Network passphrase is empty".to_string()));
        }
        if self.base_fee == 0 {
            return Err(PaymentError::Config("Base fee must be positive".to_string()));
        }
        url::Url::parse(&self.horizon_url)
            .map_err(|e| PaymentError::Config(format!("Invalid Horizon URL: {}", e)))?;
        if self.stream.channel_capacity == 0 {
            return Err(PaymentError::Config("Stream channel capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Check if this is mainnet
    pub fn is_mainnet(&self) -> bool {
        self.network == Network::Mainnet
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// Get Stellar Expert explorer URL for a transaction
    pub fn explorer_tx_url(&self, hash: &str) -> String {
        match self.network {
            Network::Mainnet => format!("https://stellar.expert/explorer/public/tx/{}", hash),
            Network::Testnet => format!("https://stellar.expert/explorer/testnet/tx/{}", hash),
        }
    }
}

impl Default for StellarConfig {
    fn default() -> Self {
        Self::for_network(Network::default())
    }
}
