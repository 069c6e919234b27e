// ============================================================================
// TRADEIO-PAYMENTS - Horizon API Client
// ============================================================================
// HTTP client for Stellar's Horizon API.
// Handles account queries, transaction submission and payment streaming.
// ============================================================================

use crate::account::{Account, AccountBalance, AccountFetcher, Thresholds};
use crate::config::StellarConfig;
use crate::error::PaymentError;
use crate::sse::SseDecoder;
use crate::stream::{ledger_of_operation, Cursor, PaymentEvent, PaymentFeed, PaymentKind, PaymentRecords};
use crate::strkey::decode_account_id;
use crate::submission::{SubmissionOutcome, TransactionTransport};
use crate::transaction::{Asset, TransactionEnvelope};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use tracing::{debug, warn};
use url::Url;

// ============================================================================
// DATA TYPES
// ============================================================================

/// Account balance line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Asset type: "native" for XLM, "credit_alphanum4" or "credit_alphanum12" for tokens
    pub asset_type: String,

    /// Asset code (empty for native XLM)
    #[serde(default)]
    pub asset_code: String,

    /// Asset issuer (empty for native XLM)
    #[serde(default)]
    pub asset_issuer: String,

    /// Balance amount as string (Stellar uses string for precision)
    pub balance: String,
}

impl Balance {
    /// Check if this is native XLM
    pub fn is_native(&self) -> bool {
        self.asset_type == "native"
    }

    /// "native" or CODE:ISSUER
    pub fn asset(&self) -> String {
        if self.is_native() {
            "native".to_string()
        } else {
            format!("{}:{}", self.asset_code, self.asset_issuer)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountThresholds {
    pub low_threshold: u8,
    pub med_threshold: u8,
    pub high_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSigner {
    pub key: String,
    pub weight: u32,
    #[serde(rename = "type", default)]
    pub signer_type: String,
}

/// Stellar account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account public key (G... address)
    pub id: String,

    /// Current sequence number
    pub sequence: String,

    #[serde(default)]
    pub balances: Vec<Balance>,

    #[serde(default)]
    pub thresholds: AccountThresholds,

    #[serde(default)]
    pub signers: Vec<AccountSigner>,
}

impl TryFrom<AccountInfo> for Account {
    type Error = PaymentError;

    fn try_from(info: AccountInfo) -> Result<Self> {
        let sequence = info.sequence.parse::<i64>().map_err(|_| {
            PaymentError::Serialization(format!("Invalid sequence number: {}", info.sequence))
        })?;

        // Only ed25519 keys can sign here; other signer kinds carry no weight
        let signers: BTreeMap<String, u32> = info
            .signers
            .into_iter()
            .filter(|s| s.weight > 0)
            .filter(|s| s.signer_type.is_empty() || s.signer_type == "ed25519_public_key")
            .map(|s| (s.key, s.weight))
            .collect();

        Ok(Account {
            address: info.id,
            sequence,
            signers,
            thresholds: Thresholds::new(
                info.thresholds.low_threshold,
                info.thresholds.med_threshold,
                info.thresholds.high_threshold,
            ),
            balances: info
                .balances
                .iter()
                .map(|b| AccountBalance {
                    asset: b.asset(),
                    balance: b.balance.clone(),
                })
                .collect(),
        })
    }
}

/// Transaction submission result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: String,
    pub ledger: u32,
    #[serde(default = "default_successful")]
    pub successful: bool,
}

fn default_successful() -> bool {
    true
}

/// Horizon error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonErrorResponse {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub title: Option<String>,
    pub status: Option<u16>,
    pub detail: Option<String>,
    pub extras: Option<HorizonErrorExtras>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonErrorExtras {
    pub envelope_xdr: Option<String>,
    pub result_codes: Option<ResultCodes>,
    pub result_xdr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCodes {
    pub transaction: Option<String>,
    pub operations: Option<Vec<String>>,
}

/// Record from `/accounts/{id}/payments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub paging_token: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub transaction_hash: String,
    pub created_at: DateTime<Utc>,

    // payment
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub asset_issuer: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,

    // create_account
    #[serde(default)]
    pub funder: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub starting_balance: Option<String>,
}

/// One page of `/accounts/{id}/payments`; only paging tokens are read
#[derive(Debug, Clone, Deserialize)]
struct RecordPage {
    #[serde(rename = "_embedded")]
    embedded: EmbeddedRecords,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddedRecords {
    records: Vec<PagingRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct PagingRecord {
    paging_token: String,
}

impl PaymentRecord {
    /// Convert to an event. `Ok(None)` for payment-class records this client
    /// does not model (path payments, merges).
    pub fn into_event(self) -> Result<Option<PaymentEvent>> {
        let missing = |field: &str| {
            PaymentError::Serialization(format!("Payment record {} has no {}", self.id, field))
        };

        let (kind, from, to, asset, amount) = match self.record_type.as_str() {
            "payment" => {
                let asset = match self.asset_type.as_deref() {
                    Some("native") => Asset::native(),
                    Some(_) => Asset::credit(
                        self.asset_code.as_deref().ok_or_else(|| missing("asset_code"))?,
                        self.asset_issuer.as_deref().ok_or_else(|| missing("asset_issuer"))?,
                    ),
                    None => return Err(missing("asset_type")),
                };
                (
                    PaymentKind::Payment,
                    self.from.clone().ok_or_else(|| missing("from"))?,
                    self.to.clone().ok_or_else(|| missing("to"))?,
                    asset,
                    self.amount.clone().ok_or_else(|| missing("amount"))?,
                )
            }
            "create_account" => (
                PaymentKind::CreateAccount,
                self.funder.clone().ok_or_else(|| missing("funder"))?,
                self.account.clone().ok_or_else(|| missing("account"))?,
                Asset::native(),
                self.starting_balance.clone().ok_or_else(|| missing("starting_balance"))?,
            ),
            _ => return Ok(None),
        };

        let id = self
            .id
            .parse::<u64>()
            .map_err(|_| PaymentError::Serialization(format!("Invalid operation id: {}", self.id)))?;

        Ok(Some(PaymentEvent {
            id,
            paging_token: self.paging_token,
            ledger: ledger_of_operation(id),
            transaction_hash: self.transaction_hash,
            kind,
            from,
            to,
            asset,
            amount,
            created_at: self.created_at,
        }))
    }
}

// ============================================================================
// HORIZON CLIENT
// ============================================================================

/// Client for Stellar Horizon API
#[derive(Clone)]
pub struct HorizonClient {
    config: StellarConfig,
    http: Client,
}

impl HorizonClient {
    /// Create new Horizon client.
    ///
    /// Plain requests are bounded by `request_timeout_ms`; streaming
    /// connections only by the connect timeout.
    pub fn new(config: StellarConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.stream.connect_timeout())
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    /// Create client for testnet
    pub fn testnet() -> Result<Self> {
        Self::new(StellarConfig::testnet())
    }

    /// Get configuration
    pub fn config(&self) -> &StellarConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.config.horizon_url.trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| PaymentError::Config(format!("Invalid Horizon URL: {}", e)))
    }

    // ==================== Account Operations ====================

    /// Load account record
    pub async fn load_account(&self, address: &str) -> Result<AccountInfo> {
        decode_account_id(address)?;
        let url = self.endpoint(&format!("accounts/{}", address))?;

        debug!("Loading account: {}", address);

        let response = self
            .http
            .get(url)
            .timeout(self.config.request_timeout())
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let account: AccountInfo = response.json().await?;
                Ok(account)
            }
            404 => Err(PaymentError::NotFound(address.to_string())),
            status => Err(http_error(status, response).await),
        }
    }

    // ==================== Transaction Submission ====================

    /// Submit a base64 transaction envelope
    pub async fn submit_transaction(&self, envelope_xdr: &str) -> Result<SubmissionOutcome> {
        let url = self.endpoint("transactions")?;

        debug!("Submitting transaction...");

        let response = self
            .http
            .post(url)
            .timeout(self.config.request_timeout())
            .form(&[("tx", envelope_xdr)])
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let tx_response: TransactionResponse = response.json().await?;
                debug!("Transaction successful: {}", tx_response.hash);
                Ok(SubmissionOutcome::Accepted {
                    hash: tx_response.hash,
                    ledger: tx_response.ledger,
                })
            }
            400 => {
                let error: HorizonErrorResponse = response.json().await?;
                let codes = error.extras.and_then(|e| e.result_codes);
                match codes {
                    Some(codes) => Ok(SubmissionOutcome::Rejected {
                        transaction_code: codes.transaction.unwrap_or_default(),
                        operation_codes: codes.operations.unwrap_or_default(),
                    }),
                    None => Err(PaymentError::InvalidTransaction(
                        error.detail.or(error.title).unwrap_or_default()
                    )),
                }
            }
            status => Err(http_error(status, response).await),
        }
    }

    // ==================== Streaming ====================

    /// Paging token of the account's newest payment record
    pub async fn latest_payment_cursor(&self, address: &str) -> Result<Cursor> {
        decode_account_id(address)?;
        let mut url = self.endpoint(&format!("accounts/{}/payments", address))?;
        url.query_pairs_mut()
            .append_pair("order", "desc")
            .append_pair("limit", "1");

        let response = self
            .http
            .get(url)
            .timeout(self.config.request_timeout())
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let page: RecordPage = response.json().await?;
                let token = page
                    .embedded
                    .records
                    .into_iter()
                    .next()
                    .map_or_else(|| "0".to_string(), |r| r.paging_token);
                debug!("Latest payment cursor for {}: {}", address, token);
                Ok(Cursor::At(token))
            }
            404 => Err(PaymentError::NotFound(address.to_string())),
            status => Err(http_error(status, response).await),
        }
    }

    /// Open an SSE connection to an account's payments
    pub async fn stream_payments(&self, address: &str, cursor: &Cursor) -> Result<PaymentRecords> {
        decode_account_id(address)?;
        let mut url = self.endpoint(&format!("accounts/{}/payments", address))?;
        url.query_pairs_mut().append_pair("cursor", cursor.as_str());

        debug!("Streaming payments: {}", url);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(sse_payments(response)),
            404 => Err(PaymentError::NotFound(address.to_string())),
            status => Err(http_error(status, response).await),
        }
    }
}

/// Non-success status → error. Rate limiting and server errors are transport
/// failures; anything else is unexpected.
async fn http_error(status: u16, response: Response) -> PaymentError {
    let error_text = response.text().await.unwrap_or_default();
    match status {
        429 => PaymentError::NetworkError("Rate limited by Horizon".to_string()),
        500..=599 => PaymentError::NetworkError(format!("HTTP {}: {}", status, error_text)),
        _ => PaymentError::Serialization(format!("Unexpected HTTP {}: {}", status, error_text)),
    }
}

type ByteChunks = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    chunks: ByteChunks,
    decoder: SseDecoder,
    pending: VecDeque<Result<PaymentEvent>>,
}

/// Decode one SSE data payload.
///
/// `None` for keep-alives, greetings and record kinds this client does not
/// model. A record that fails to decode comes back as `UndecodableRecord`
/// so the stream can move past it; one without even a paging token is
/// dropped with a warning, since nothing could resume after it.
fn decode_frame(data: &str) -> Option<Result<PaymentEvent>> {
    // Horizon greets with `data: "hello"`; only objects are records
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    if !value.is_object() {
        return None;
    }

    let paging_token = value
        .get("paging_token")
        .and_then(|t| t.as_str())
        .map(str::to_string);

    let decoded = serde_json::from_value::<PaymentRecord>(value)
        .map_err(PaymentError::from)
        .and_then(PaymentRecord::into_event);

    match (decoded, paging_token) {
        (Ok(event), _) => event.map(Ok),
        (Err(e), Some(paging_token)) => Some(Err(PaymentError::UndecodableRecord {
            paging_token,
            reason: e.to_string(),
        })),
        (Err(e), None) => {
            warn!("Dropping payment record without paging token: {}", e);
            None
        }
    }
}

/// Decode an SSE response body into payment events.
fn sse_payments(response: Response) -> PaymentRecords {
    let chunks: ByteChunks = Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())));
    let state = SseState {
        chunks,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }

            let chunk = match state.chunks.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Some((Err(PaymentError::from(e)), state)),
                None => return None,
            };

            state
                .pending
                .extend(state.decoder.feed(&chunk).into_iter().filter_map(|frame| decode_frame(&frame.data)));
        }
    }))
}

// ============================================================================
// NETWORK SEAMS
// ============================================================================

#[async_trait]
impl AccountFetcher for HorizonClient {
    async fn fetch_account(&self, address: &str) -> Result<Account> {
        let info = self.load_account(address).await?;
        Account::try_from(info)
    }
}

#[async_trait]
impl TransactionTransport for HorizonClient {
    async fn post_transaction(&self, envelope: &TransactionEnvelope) -> Result<SubmissionOutcome> {
        self.submit_transaction(&envelope.to_base64()?).await
    }
}

#[async_trait]
impl PaymentFeed for HorizonClient {
    async fn connect(&self, account: &str, cursor: &Cursor) -> Result<PaymentRecords> {
        self.stream_payments(account, cursor).await
    }

    async fn tip_cursor(&self, account: &str) -> Result<Cursor> {
        self.latest_payment_cursor(account).await
    }
}
