// ============================================================================
// TRADEIO-PAYMENTS - Friendbot Faucet
// ============================================================================
// Test-network funding: `GET {friendbot}/?addr={address}` creates and funds
// the account. Mainnet has no faucet.
// ============================================================================

use crate::config::StellarConfig;
use crate::error::PaymentError;
use crate::strkey::decode_account_id;
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct Faucet {
    base_url: Url,
    timeout: Duration,
    http: Client,
}

impl Faucet {
    /// Faucet for the configured network; `Config` error when it has none.
    pub fn new(config: &StellarConfig) -> Result<Self> {
        let base = config.friendbot_url.as_deref().ok_or_else(|| {
            PaymentError::Config("Friendbot only available on testnet".to_string())
        })?;

        let base_url = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .map_err(|e| PaymentError::Config(format!("Invalid friendbot URL: {}", e)))?;

        let http = Client::builder()
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            timeout: config.request_timeout(),
            http,
        })
    }

    /// Request URL for funding `address`
    pub fn funding_url(&self, address: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("addr", address);
        url
    }

    /// Fund `address`. Anything but HTTP 200 is a `FundingError`.
    pub async fn fund(&self, address: &str) -> Result<()> {
        decode_account_id(address)?;
        let url = self.funding_url(address);

        debug!("Requesting friendbot funding for: {}", address);

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PaymentError::FundingError(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                info!("Friendbot funded account: {}", address);
                Ok(())
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(PaymentError::FundingError(format!(
                    "Friendbot HTTP {}: {}", status, error_text
                )))
            }
        }
    }
}
