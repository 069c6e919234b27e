// ============================================================================
// TRADEIO-PAYMENTS - Transaction Builder
// ============================================================================
// Build Stellar transaction envelopes.
//
// Stellar transactions consist of:
// - Source account
// - Sequence number (source sequence + 1)
// - Fee (base fee per operation)
// - Preconditions (optional time bounds)
// - Memo (optional)
// - Operations (payment, create account, change trust, set options, ...)
// - Signatures (appended later by the signature collector)
//
// The unsigned transaction body is converted to `stellar_xdr` types and
// hashed once at build time; the envelope only ever changes by gaining
// signatures.
// ============================================================================

use crate::account::{Account, OperationClass};
use crate::amount::parse_amount;
use crate::config::StellarConfig;
use crate::error::{PaymentError, SubmissionContext};
use crate::strkey::decode_account_id;
use crate::Result;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{self as xdr, Limits, WriteXdr};

/// Maximum operations per transaction
pub const MAX_OPERATIONS: usize = 100;

/// Maximum decorated signatures per envelope
pub const MAX_SIGNATURES: usize = 20;

/// Maximum MEMO_TEXT length in bytes
pub const MAX_MEMO_TEXT: usize = 28;

// ============================================================================
// TRANSACTION TYPES
// ============================================================================

/// Stellar asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Native,
    CreditAlphaNum4 { code: String, issuer: String },
    CreditAlphaNum12 { code: String, issuer: String },
}

impl Asset {
    /// Create native XLM asset
    pub fn native() -> Self {
        Asset::Native
    }

    /// Create custom asset
    pub fn credit(code: &str, issuer: &str) -> Self {
        if code.len() <= 4 {
            Asset::CreditAlphaNum4 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        } else {
            Asset::CreditAlphaNum12 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        }
    }

    /// Check if native
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    /// "native" or CODE:ISSUER
    pub fn canonical(&self) -> String {
        match self {
            Asset::Native => "native".to_string(),
            Asset::CreditAlphaNum4 { code, issuer } | Asset::CreditAlphaNum12 { code, issuer } => {
                format!("{}:{}", code, issuer)
            }
        }
    }

    /// Inverse of [`Asset::canonical`]
    pub fn from_canonical(value: &str) -> Result<Self> {
        if value == "native" {
            return Ok(Asset::Native);
        }
        match value.split_once(':') {
            Some((code, issuer)) if !code.is_empty() && !issuer.is_empty() => {
                Ok(Asset::credit(code, issuer))
            }
            _ => Err(PaymentError::InvalidTransaction(format!("Invalid asset: {}", value))),
        }
    }
}

/// Signer change carried by a set-options operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerUpdate {
    /// G... public key of the signer
    pub key: String,
    /// 0 removes the signer
    pub weight: u8,
}

/// Account option changes (weights and thresholds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    pub master_weight: Option<u8>,
    pub low_threshold: Option<u8>,
    pub med_threshold: Option<u8>,
    pub high_threshold: Option<u8>,
    pub signer: Option<SignerUpdate>,
}

/// Transaction operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new account with starting balance
    CreateAccount {
        destination: String,
        starting_balance: String,
    },

    /// Payment of native XLM or any asset
    Payment {
        destination: String,
        asset: Asset,
        amount: String,
    },

    /// Create or modify trustline
    ChangeTrust {
        asset: Asset,
        limit: Option<String>,
    },

    /// Change master weight, thresholds or signers
    SetOptions(SetOptions),

    /// Move the source account sequence forward
    BumpSequence { bump_to: i64 },
}

impl Operation {
    pub fn payment(destination: &str, asset: Asset, amount: &str) -> Self {
        Operation::Payment {
            destination: destination.to_string(),
            asset,
            amount: amount.to_string(),
        }
    }

    pub fn create_account(destination: &str, starting_balance: &str) -> Self {
        Operation::CreateAccount {
            destination: destination.to_string(),
            starting_balance: starting_balance.to_string(),
        }
    }

    pub fn add_signer(key: &str, weight: u8) -> Self {
        Operation::SetOptions(SetOptions {
            signer: Some(SignerUpdate {
                key: key.to_string(),
                weight,
            }),
            ..Default::default()
        })
    }

    /// Horizon's name for the operation type
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateAccount { .. } => "create_account",
            Operation::Payment { .. } => "payment",
            Operation::ChangeTrust { .. } => "change_trust",
            Operation::SetOptions(_) => "set_options",
            Operation::BumpSequence { .. } => "bump_sequence",
        }
    }

    /// Threshold category this operation needs
    pub fn class(&self) -> OperationClass {
        match self {
            Operation::BumpSequence { .. } => OperationClass::Low,
            Operation::CreateAccount { .. }
            | Operation::Payment { .. }
            | Operation::ChangeTrust { .. } => OperationClass::Medium,
            Operation::SetOptions(_) => OperationClass::High,
        }
    }
}

/// Transaction memo
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum Memo {
    #[default]
    None,
    Text(String),
    Id(u64),
    Hash([u8; 32]),
    Return([u8; 32]),
}

/// Validity window in unix seconds; 0 as `max_time` means open-ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

/// Signature attached to an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedSignature {
    /// G... address of the signer
    pub signer: String,
    /// Last four bytes of the signer's public key
    pub hint: [u8; 4],
    pub signature: [u8; 64],
}

// ============================================================================
// TRANSACTION BUILDER
// ============================================================================

/// Builder for Stellar transactions, bound to one network passphrase.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network_passphrase: String,
    base_fee: u32,
    memo: Memo,
    time_bounds: Option<TimeBounds>,
}

impl TransactionBuilder {
    /// Create new transaction builder
    pub fn new(config: &StellarConfig) -> Self {
        Self {
            network_passphrase: config.network_passphrase.clone(),
            base_fee: config.base_fee,
            memo: Memo::None,
            time_bounds: None,
        }
    }

    /// Set fee per operation (in stroops)
    pub fn fee(mut self, fee: u32) -> Self {
        self.base_fee = fee;
        self
    }

    /// Set memo
    pub fn memo(mut self, memo: Memo) -> Self {
        self.memo = memo;
        self
    }

    /// Set text memo
    pub fn memo_text(mut self, text: &str) -> Self {
        self.memo = Memo::Text(text.to_string());
        self
    }

    /// Set explicit time bounds
    pub fn time_bounds(mut self, min_time: u64, max_time: u64) -> Self {
        self.time_bounds = Some(TimeBounds { min_time, max_time });
        self
    }

    /// Expire `seconds` from now. Reads the clock, so two builds made at
    /// different times are no longer byte-identical.
    pub fn timeout(self, seconds: u64) -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.time_bounds(0, now + seconds)
    }

    /// Build an unsigned envelope with sequence `account.sequence + 1`.
    pub fn build(&self, account: &Account, operations: Vec<Operation>) -> Result<TransactionEnvelope> {
        if operations.is_empty() {
            return Err(PaymentError::InvalidTransaction(
                "Transaction must have at least one operation".to_string()
            ));
        }

        if operations.len() > MAX_OPERATIONS {
            return Err(PaymentError::InvalidTransaction(format!(
                "Transaction has {} operations, maximum is {}",
                operations.len(), MAX_OPERATIONS
            )));
        }

        // Total fee (per operation)
        let fee = self.base_fee
            .checked_mul(operations.len() as u32)
            .ok_or_else(|| PaymentError::InvalidTransaction("Fee overflow".to_string()))?;

        let sequence = account.sequence
            .checked_add(1)
            .ok_or_else(|| PaymentError::InvalidTransaction("Sequence overflow".to_string()))?;

        // Validates every address, asset and amount on the way
        let tx = xdr::Transaction {
            source_account: muxed_account(&account.address)?,
            fee,
            seq_num: xdr::SequenceNumber(sequence),
            cond: preconditions(self.time_bounds)?,
            memo: xdr_memo(&self.memo)?,
            operations: operations
                .iter()
                .map(xdr_operation)
                .collect::<Result<Vec<_>>>()?
                .try_into()?,
            ext: xdr::TransactionExt::V0,
        };

        let tx_xdr = tx.to_xdr(Limits::none())?;
        let hash = signing_hash(&self.network_passphrase, &tx)?;

        let envelope = TransactionEnvelope {
            network_passphrase: self.network_passphrase.clone(),
            source_account: account.address.clone(),
            fee,
            sequence,
            time_bounds: self.time_bounds,
            memo: self.memo.clone(),
            operations,
            tx,
            tx_xdr,
            hash,
            signatures: Vec::new(),
        };

        Ok(envelope)
    }
}

// ============================================================================
// TRANSACTION ENVELOPE
// ============================================================================

/// A built transaction plus the signatures collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    network_passphrase: String,
    source_account: String,
    fee: u32,
    sequence: i64,
    time_bounds: Option<TimeBounds>,
    memo: Memo,
    operations: Vec<Operation>,
    tx: xdr::Transaction,
    tx_xdr: Vec<u8>,
    hash: [u8; 32],
    signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub fn source_account(&self) -> &str {
        &self.source_account
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn fee(&self) -> u32 {
        self.fee
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn time_bounds(&self) -> Option<TimeBounds> {
        self.time_bounds
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn signatures(&self) -> &[DecoratedSignature] {
        &self.signatures
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    /// The unsigned transaction as XDR types
    pub fn transaction(&self) -> &xdr::Transaction {
        &self.tx
    }

    /// Transaction body XDR, without envelope or signatures
    pub fn transaction_xdr(&self) -> &[u8] {
        &self.tx_xdr
    }

    /// sha256 of the network passphrase
    pub fn network_id(&self) -> [u8; 32] {
        network_id(&self.network_passphrase)
    }

    /// Signing hash over the `TransactionSignaturePayload`. Also the
    /// transaction hash the network reports.
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Whether `address` already has a signature attached
    pub fn is_signed_by(&self, address: &str) -> bool {
        self.signatures.iter().any(|s| s.signer == address)
    }

    /// Highest threshold category among the operations
    pub fn required_class(&self) -> OperationClass {
        self.operations
            .iter()
            .map(Operation::class)
            .max()
            .unwrap_or(OperationClass::Low)
    }

    /// Context attached to submission errors
    pub fn context(&self) -> SubmissionContext {
        SubmissionContext {
            account: self.source_account.clone(),
            sequence: self.sequence,
            operation: self
                .operations
                .iter()
                .map(Operation::kind)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub(crate) fn push_signature(&mut self, signature: DecoratedSignature) {
        self.signatures.push(signature);
    }

    /// v1 `TransactionEnvelope` carrying the collected signatures
    pub fn to_xdr_envelope(&self) -> Result<xdr::TransactionEnvelope> {
        let signatures = self
            .signatures
            .iter()
            .map(|sig| -> Result<xdr::DecoratedSignature> {
                Ok(xdr::DecoratedSignature {
                    hint: xdr::SignatureHint(sig.hint),
                    signature: xdr::Signature(sig.signature.to_vec().try_into()?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(xdr::TransactionEnvelope::Tx(xdr::TransactionV1Envelope {
            tx: self.tx.clone(),
            signatures: signatures.try_into()?,
        }))
    }

    /// Full TransactionEnvelope XDR including signatures
    pub fn to_envelope_xdr(&self) -> Result<Vec<u8>> {
        Ok(self.to_xdr_envelope()?.to_xdr(Limits::none())?)
    }

    /// Base64 envelope XDR, the form Horizon accepts
    pub fn to_base64(&self) -> Result<String> {
        Ok(general_purpose::STANDARD.encode(self.to_envelope_xdr()?))
    }
}

/// sha256 of a network passphrase
pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

fn signing_hash(passphrase: &str, tx: &xdr::Transaction) -> Result<[u8; 32]> {
    let payload = xdr::TransactionSignaturePayload {
        network_id: xdr::Hash(network_id(passphrase)),
        tagged_transaction: xdr::TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
    };
    let payload_bytes = payload.to_xdr(Limits::none())?;
    Ok(Sha256::digest(&payload_bytes).into())
}

// ============================================================================
// XDR CONVERSION
// ============================================================================

fn account_id(address: &str) -> Result<xdr::AccountId> {
    let key = decode_account_id(address)?;
    Ok(xdr::AccountId(xdr::PublicKey::PublicKeyTypeEd25519(xdr::Uint256(key))))
}

fn muxed_account(address: &str) -> Result<xdr::MuxedAccount> {
    Ok(xdr::MuxedAccount::Ed25519(xdr::Uint256(decode_account_id(address)?)))
}

fn preconditions(time_bounds: Option<TimeBounds>) -> Result<xdr::Preconditions> {
    let Some(bounds) = time_bounds else {
        return Ok(xdr::Preconditions::None);
    };

    if bounds.max_time != 0 && bounds.max_time < bounds.min_time {
        return Err(PaymentError::InvalidTransaction(
            "Time bounds end before they start".to_string()
        ));
    }

    Ok(xdr::Preconditions::Time(xdr::TimeBounds {
        min_time: xdr::TimePoint(bounds.min_time),
        max_time: xdr::TimePoint(bounds.max_time),
    }))
}

fn xdr_memo(memo: &Memo) -> Result<xdr::Memo> {
    Ok(match memo {
        Memo::None => xdr::Memo::None,
        Memo::Text(text) => {
            if text.len() > MAX_MEMO_TEXT {
                return Err(PaymentError::InvalidTransaction(format!(
                    "Memo text is {} bytes, maximum is {}",
                    text.len(), MAX_MEMO_TEXT
                )));
            }
            xdr::Memo::Text(text.as_bytes().to_vec().try_into()?)
        }
        Memo::Id(id) => xdr::Memo::Id(*id),
        Memo::Hash(hash) => xdr::Memo::Hash(xdr::Hash(*hash)),
        Memo::Return(hash) => xdr::Memo::Return(xdr::Hash(*hash)),
    })
}

fn xdr_operation(op: &Operation) -> Result<xdr::Operation> {
    let body = match op {
        Operation::CreateAccount { destination, starting_balance } => {
            xdr::OperationBody::CreateAccount(xdr::CreateAccountOp {
                destination: account_id(destination)?,
                starting_balance: positive_amount(starting_balance)?,
            })
        }

        Operation::Payment { destination, asset, amount } => {
            xdr::OperationBody::Payment(xdr::PaymentOp {
                destination: muxed_account(destination)?,
                asset: xdr_asset(asset)?,
                amount: positive_amount(amount)?,
            })
        }

        Operation::SetOptions(options) => {
            let signer = match &options.signer {
                Some(update) => Some(xdr::Signer {
                    key: xdr::SignerKey::Ed25519(xdr::Uint256(decode_account_id(&update.key)?)),
                    weight: u32::from(update.weight),
                }),
                None => None,
            };

            xdr::OperationBody::SetOptions(xdr::SetOptionsOp {
                inflation_dest: None,
                clear_flags: None,
                set_flags: None,
                master_weight: options.master_weight.map(u32::from),
                low_threshold: options.low_threshold.map(u32::from),
                med_threshold: options.med_threshold.map(u32::from),
                high_threshold: options.high_threshold.map(u32::from),
                home_domain: None,
                signer,
            })
        }

        Operation::ChangeTrust { asset, limit } => {
            let line = match xdr_asset(asset)? {
                xdr::Asset::CreditAlphanum4(code) => xdr::ChangeTrustAsset::CreditAlphanum4(code),
                xdr::Asset::CreditAlphanum12(code) => xdr::ChangeTrustAsset::CreditAlphanum12(code),
                xdr::Asset::Native => {
                    return Err(PaymentError::InvalidTransaction(
                        "Cannot change trust for the native asset".to_string()
                    ))
                }
            };
            // Limit (max if not specified)
            let limit = match limit {
                Some(l) => parse_amount(l)?,
                None => i64::MAX,
            };
            xdr::OperationBody::ChangeTrust(xdr::ChangeTrustOp { line, limit })
        }

        Operation::BumpSequence { bump_to } => {
            if *bump_to < 0 {
                return Err(PaymentError::InvalidTransaction(
                    "Bump target must not be negative".to_string()
                ));
            }
            xdr::OperationBody::BumpSequence(xdr::BumpSequenceOp {
                bump_to: xdr::SequenceNumber(*bump_to),
            })
        }
    };

    // No per-operation source account override
    Ok(xdr::Operation { source_account: None, body })
}

fn xdr_asset(asset: &Asset) -> Result<xdr::Asset> {
    Ok(match asset {
        Asset::Native => xdr::Asset::Native,
        Asset::CreditAlphaNum4 { code, issuer } => xdr::Asset::CreditAlphanum4(xdr::AlphaNum4 {
            asset_code: xdr::AssetCode4(asset_code::<4>(code, 1)?),
            issuer: account_id(issuer)?,
        }),
        Asset::CreditAlphaNum12 { code, issuer } => xdr::Asset::CreditAlphanum12(xdr::AlphaNum12 {
            asset_code: xdr::AssetCode12(asset_code::<12>(code, 5)?),
            issuer: account_id(issuer)?,
        }),
    })
}

/// Zero-padded asset code of `N` bytes, at least `min_len` characters
fn asset_code<const N: usize>(code: &str, min_len: usize) -> Result<[u8; N]> {
    let bytes = code.as_bytes();
    if bytes.len() < min_len || bytes.len() > N || !bytes.iter().all(u8::is_ascii_alphanumeric) {
        return Err(PaymentError::InvalidTransaction(format!("Invalid asset code: {:?}", code)));
    }
    let mut padded = [0u8; N];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn positive_amount(amount: &str) -> Result<i64> {
    let stroops = parse_amount(amount)?;
    if stroops <= 0 {
        return Err(PaymentError::InvalidTransaction(format!(
            "Amount must be positive: {}", amount
        )));
    }
    Ok(stroops)
}
