//! MockLedger: in-memory ledger with sequence tracking, multisig checks and a payment feed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use tradeio_payments::amount::{format_amount, parse_amount, STROOPS_PER_UNIT};
use tradeio_payments::config::TESTNET_PASSPHRASE;
use tradeio_payments::keypair::verify_signature;
use tradeio_payments::stream::ledger_of_operation;
use tradeio_payments::strkey::decode_account_id;
use tradeio_payments::{
    Account, AccountFetcher, Asset, Cursor, Operation, PaymentError, PaymentEvent, PaymentFeed,
    PaymentKind, PaymentRecords, Result, SubmissionOutcome, TransactionEnvelope,
    TransactionTransport,
};

/// Minimum native balance an account must keep
pub const MIN_BALANCE: i64 = STROOPS_PER_UNIT;

/// Starting balance handed out by [`MockLedger::fund`]
pub const FRIENDBOT_AMOUNT: &str = "10000";

/// Funder reported on friendbot-created accounts
pub const FRIENDBOT_ADDRESS: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

const NATIVE: &str = "native";
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct LedgerAccount {
    account: Account,
    /// Asset ("native" or CODE:ISSUER) → stroops. A credit entry is a trustline.
    balances: BTreeMap<String, i64>,
}

impl LedgerAccount {
    fn new(address: &str, sequence: i64, native: i64) -> Self {
        Self {
            account: Account::new(address, sequence),
            balances: BTreeMap::from([(NATIVE.to_string(), native)]),
        }
    }

    fn native(&self) -> i64 {
        self.balances.get(NATIVE).copied().unwrap_or(0)
    }

    fn snapshot(&self) -> Account {
        let mut account = self.account.clone();
        account.balances = self
            .balances
            .iter()
            .map(|(asset, stroops)| tradeio_payments::account::AccountBalance {
                asset: asset.clone(),
                balance: format_amount(*stroops),
            })
            .collect();
        account
    }
}

#[derive(Debug)]
struct LedgerState {
    network_passphrase: String,
    accounts: BTreeMap<String, LedgerAccount>,
    ledger: u32,
    history: Vec<PaymentEvent>,
    transport_failures: u32,
    connect_failures: u32,
    replay_on_reconnect: bool,
    submissions: u32,
}

/// Shared handle; clones see the same ledger.
#[derive(Debug, Clone)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
    events: broadcast::Sender<PaymentEvent>,
    generation: Arc<watch::Sender<u64>>,
}

impl MockLedger {
    pub fn new(network_passphrase: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (generation, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                network_passphrase: network_passphrase.into(),
                accounts: BTreeMap::new(),
                ledger: 2,
                history: Vec::new(),
                transport_failures: 0,
                connect_failures: 0,
                replay_on_reconnect: false,
                submissions: 0,
            })),
            events,
            generation: Arc::new(generation),
        }
    }

    pub fn testnet() -> Self {
        Self::new(TESTNET_PASSPHRASE)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ==================== Setup ====================

    /// Create `address` with [`FRIENDBOT_AMOUNT`], like the testnet faucet.
    pub fn fund(&self, address: &str) -> Result<()> {
        self.create_account(address, FRIENDBOT_AMOUNT)
    }

    /// Create `address` with a native starting balance, closing a ledger.
    pub fn create_account(&self, address: &str, starting_balance: &str) -> Result<()> {
        decode_account_id(address)?;
        let stroops = parse_amount(starting_balance)?;

        let mut state = self.lock();
        if state.accounts.contains_key(address) {
            return Err(PaymentError::FundingError(format!("{} already exists", address)));
        }

        state.ledger += 1;
        let ledger = state.ledger;
        state.accounts.insert(
            address.to_string(),
            LedgerAccount::new(address, i64::from(ledger) << 32, stroops),
        );

        let event = PaymentEvent {
            id: operation_id(ledger, 0),
            paging_token: operation_id(ledger, 0).to_string(),
            ledger,
            transaction_hash: format!("{:064x}", operation_id(ledger, 0)),
            kind: PaymentKind::CreateAccount,
            from: FRIENDBOT_ADDRESS.to_string(),
            to: address.to_string(),
            asset: Asset::native(),
            amount: format_amount(stroops),
            created_at: Utc::now(),
        };
        self.publish(&mut state, vec![event]);

        debug!("Funded {} with {}", address, starting_balance);
        Ok(())
    }

    /// Mutate signers and thresholds directly, bypassing transactions.
    pub fn update_account<F>(&self, address: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Account),
    {
        let mut state = self.lock();
        let entry = state
            .accounts
            .get_mut(address)
            .ok_or_else(|| PaymentError::NotFound(address.to_string()))?;
        update(&mut entry.account);
        Ok(())
    }

    // ==================== Fault Injection ====================

    /// The next `count` submissions fail with a transport error.
    pub fn fail_next_submissions(&self, count: u32) {
        self.lock().transport_failures = count;
    }

    /// The next `count` feed connections are refused.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    /// End every open feed connection.
    pub fn drop_connections(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// When resuming from a cursor, also resend the event at the cursor.
    pub fn replay_on_reconnect(&self, replay: bool) {
        self.lock().replay_on_reconnect = replay;
    }

    // ==================== Inspection ====================

    pub fn account(&self, address: &str) -> Option<Account> {
        self.lock().accounts.get(address).map(LedgerAccount::snapshot)
    }

    /// Balance as a decimal string, `None` without account or trustline
    pub fn balance(&self, address: &str, asset: &Asset) -> Option<String> {
        self.lock()
            .accounts
            .get(address)
            .and_then(|entry| entry.balances.get(&asset.canonical()))
            .map(|stroops| format_amount(*stroops))
    }

    pub fn current_ledger(&self) -> u32 {
        self.lock().ledger
    }

    /// Transactions that reached validation (transport failures excluded)
    pub fn submission_count(&self) -> u32 {
        self.lock().submissions
    }

    pub fn history(&self) -> Vec<PaymentEvent> {
        self.lock().history.clone()
    }

    // ==================== Transaction Processing ====================

    fn apply(&self, envelope: &TransactionEnvelope) -> Result<SubmissionOutcome> {
        let mut state = self.lock();

        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            return Err(PaymentError::NetworkError("connection reset by mock ledger".to_string()));
        }
        state.submissions += 1;

        let source = envelope.source_account().to_string();
        let Some(entry) = state.accounts.get(&source) else {
            return Ok(rejected("tx_no_source_account", vec![]));
        };

        if envelope.sequence() != entry.account.sequence + 1 {
            return Ok(rejected("tx_bad_seq", vec![]));
        }

        if let Some(code) = check_signatures(&state.network_passphrase, envelope, &entry.account) {
            return Ok(rejected(code, vec![]));
        }

        let fee = i64::from(envelope.fee());
        if entry.native() < fee {
            return Ok(rejected("tx_insufficient_fee", vec![]));
        }

        // Fee and sequence are consumed even when an operation fails
        state.ledger += 1;
        let ledger = state.ledger;
        if let Some(entry) = state.accounts.get_mut(&source) {
            entry.account.sequence = envelope.sequence();
            *entry.balances.entry(NATIVE.to_string()).or_insert(0) -= fee;
        }

        let mut working = state.accounts.clone();
        let mut codes = Vec::new();
        let mut events = Vec::new();
        for (index, op) in envelope.operations().iter().enumerate() {
            match apply_operation(&mut working, &source, op, ledger) {
                Ok(()) => {
                    codes.push("op_success".to_string());
                    if let Some(event) = payment_event(envelope, &source, op, ledger, index) {
                        events.push(event);
                    }
                }
                Err(code) => {
                    codes.push(code.to_string());
                    debug!("Transaction {} failed: {:?}", envelope.hash_hex(), codes);
                    return Ok(rejected("tx_failed", codes));
                }
            }
        }

        state.accounts = working;
        self.publish(&mut state, events);

        debug!("Applied {} in ledger {}", envelope.hash_hex(), ledger);
        Ok(SubmissionOutcome::Accepted {
            hash: envelope.hash_hex(),
            ledger,
        })
    }

    /// Record and broadcast under the state lock, so a connecting feed sees
    /// every event exactly once across its backlog and live channel.
    fn publish(&self, state: &mut LedgerState, events: Vec<PaymentEvent>) {
        for event in events {
            state.history.push(event.clone());
            let _ = self.events.send(event);
        }
    }
}

fn rejected(transaction_code: &str, operation_codes: Vec<String>) -> SubmissionOutcome {
    SubmissionOutcome::Rejected {
        transaction_code: transaction_code.to_string(),
        operation_codes,
    }
}

/// Operation id: ledger in the upper half, one transaction per ledger
fn operation_id(ledger: u32, index: usize) -> u64 {
    (u64::from(ledger) << 32) | (1 << 12) | (index as u64 + 1)
}

fn check_signatures(
    network_passphrase: &str,
    envelope: &TransactionEnvelope,
    account: &Account,
) -> Option<&'static str> {
    // A different passphrase means a different hash; no signature can match
    if envelope.network_passphrase() != network_passphrase {
        return Some("tx_bad_auth");
    }

    let hash = envelope.hash();
    let mut weight = 0u64;
    let mut extra = false;
    for sig in envelope.signatures() {
        if !verify_signature(&sig.signer, &hash, &sig.signature) {
            return Some("tx_bad_auth");
        }
        match account.signer_weight(&sig.signer) {
            0 => extra = true,
            w => weight += u64::from(w),
        }
    }

    if weight < u64::from(account.required_weight(envelope.required_class())) {
        return Some("tx_bad_auth");
    }
    if extra {
        return Some("tx_bad_auth_extra");
    }
    None
}

fn apply_operation(
    accounts: &mut BTreeMap<String, LedgerAccount>,
    source: &str,
    op: &Operation,
    ledger: u32,
) -> std::result::Result<(), &'static str> {
    match op {
        Operation::CreateAccount { destination, starting_balance } => {
            let amount = parse_amount(starting_balance).map_err(|_| "op_malformed")?;
            if accounts.contains_key(destination) {
                return Err("op_already_exists");
            }
            if amount < MIN_BALANCE {
                return Err("op_low_reserve");
            }
            debit_native(accounts, source, amount)?;
            accounts.insert(
                destination.clone(),
                LedgerAccount::new(destination, i64::from(ledger) << 32, amount),
            );
        }

        Operation::Payment { destination, asset, amount } => {
            let amount = parse_amount(amount).map_err(|_| "op_malformed")?;
            if !accounts.contains_key(destination) {
                return Err("op_no_destination");
            }
            match asset {
                Asset::Native => {
                    debit_native(accounts, source, amount)?;
                    credit(accounts, destination, NATIVE, amount)?;
                }
                Asset::CreditAlphaNum4 { issuer, .. } | Asset::CreditAlphaNum12 { issuer, .. } => {
                    let key = asset.canonical();
                    if source != issuer.as_str() {
                        let balance = accounts
                            .get_mut(source)
                            .and_then(|entry| entry.balances.get_mut(&key))
                            .ok_or("op_src_no_trust")?;
                        if *balance < amount {
                            return Err("op_underfunded");
                        }
                        *balance -= amount;
                    }
                    if destination != issuer {
                        credit(accounts, destination, &key, amount).map_err(|_| "op_no_trust")?;
                    }
                }
            }
        }

        Operation::ChangeTrust { asset, limit } => {
            let key = asset.canonical();
            let entry = accounts.get_mut(source).ok_or("op_malformed")?;
            let limit = limit
                .as_deref()
                .map(parse_amount)
                .transpose()
                .map_err(|_| "op_malformed")?;
            let removing = limit == Some(0);
            if removing {
                match entry.balances.get(&key) {
                    Some(0) | None => {
                        entry.balances.remove(&key);
                    }
                    Some(_) => return Err("op_invalid_limit"),
                }
            } else {
                entry.balances.entry(key).or_insert(0);
            }
        }

        Operation::SetOptions(options) => {
            let account = &mut accounts.get_mut(source).ok_or("op_malformed")?.account;
            if let Some(weight) = options.master_weight {
                let address = account.address.clone();
                account.set_signer(&address, u32::from(weight));
            }
            if let Some(low) = options.low_threshold {
                account.thresholds.low = low;
            }
            if let Some(medium) = options.med_threshold {
                account.thresholds.medium = medium;
            }
            if let Some(high) = options.high_threshold {
                account.thresholds.high = high;
            }
            if let Some(signer) = &options.signer {
                if signer.key == account.address {
                    return Err("op_bad_signer");
                }
                account.set_signer(&signer.key, u32::from(signer.weight));
            }
        }

        Operation::BumpSequence { bump_to } => {
            let account = &mut accounts.get_mut(source).ok_or("op_malformed")?.account;
            if *bump_to > account.sequence {
                account.sequence = *bump_to;
            }
        }
    }
    Ok(())
}

fn debit_native(
    accounts: &mut BTreeMap<String, LedgerAccount>,
    address: &str,
    amount: i64,
) -> std::result::Result<(), &'static str> {
    let entry = accounts.get_mut(address).ok_or("op_malformed")?;
    let available = entry.native() - MIN_BALANCE;
    if available < amount {
        return Err("op_underfunded");
    }
    *entry.balances.entry(NATIVE.to_string()).or_insert(0) -= amount;
    Ok(())
}

fn credit(
    accounts: &mut BTreeMap<String, LedgerAccount>,
    address: &str,
    asset: &str,
    amount: i64,
) -> std::result::Result<(), &'static str> {
    let balance = accounts
        .get_mut(address)
        .and_then(|entry| entry.balances.get_mut(asset))
        .ok_or("op_no_trust")?;
    *balance = balance.checked_add(amount).ok_or("op_line_full")?;
    Ok(())
}

fn payment_event(
    envelope: &TransactionEnvelope,
    source: &str,
    op: &Operation,
    ledger: u32,
    index: usize,
) -> Option<PaymentEvent> {
    let (kind, to, asset, amount) = match op {
        Operation::Payment { destination, asset, amount } => {
            (PaymentKind::Payment, destination, asset.clone(), amount)
        }
        Operation::CreateAccount { destination, starting_balance } => {
            (PaymentKind::CreateAccount, destination, Asset::native(), starting_balance)
        }
        _ => return None,
    };

    let id = operation_id(ledger, index);
    Some(PaymentEvent {
        id,
        paging_token: id.to_string(),
        ledger: ledger_of_operation(id),
        transaction_hash: envelope.hash_hex(),
        kind,
        from: source.to_string(),
        to: to.clone(),
        asset,
        amount: format_amount(parse_amount(amount).ok()?),
        created_at: Utc::now(),
    })
}

fn touches(event: &PaymentEvent, account: &str) -> bool {
    event.from == account || event.to == account
}

// ============================================================================
// NETWORK SEAMS
// ============================================================================

#[async_trait]
impl AccountFetcher for MockLedger {
    async fn fetch_account(&self, address: &str) -> Result<Account> {
        decode_account_id(address)?;
        self.account(address)
            .ok_or_else(|| PaymentError::NotFound(address.to_string()))
    }
}

#[async_trait]
impl TransactionTransport for MockLedger {
    async fn post_transaction(&self, envelope: &TransactionEnvelope) -> Result<SubmissionOutcome> {
        self.apply(envelope)
    }
}

struct FeedState {
    account: String,
    backlog: VecDeque<PaymentEvent>,
    live: broadcast::Receiver<PaymentEvent>,
    generation: watch::Receiver<u64>,
}

#[async_trait]
impl PaymentFeed for MockLedger {
    async fn connect(&self, account: &str, cursor: &Cursor) -> Result<PaymentRecords> {
        let feed = {
            let mut state = self.lock();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(PaymentError::NetworkError("connection refused by mock ledger".to_string()));
            }
            if !state.accounts.contains_key(account) {
                return Err(PaymentError::NotFound(account.to_string()));
            }

            let backlog = match cursor {
                Cursor::Now => VecDeque::new(),
                Cursor::At(token) => {
                    let after: u64 = token.parse().map_err(|_| {
                        PaymentError::Serialization(format!("Invalid cursor: {}", token))
                    })?;
                    let replay = state.replay_on_reconnect;
                    state
                        .history
                        .iter()
                        .filter(|e| touches(e, account))
                        .filter(|e| e.id > after || (replay && e.id == after))
                        .cloned()
                        .collect()
                }
            };

            FeedState {
                account: account.to_string(),
                backlog,
                live: self.events.subscribe(),
                generation: self.generation.subscribe(),
            }
        };

        Ok(Box::pin(futures::stream::unfold(feed, |mut feed| async move {
            if let Some(event) = feed.backlog.pop_front() {
                return Some((Ok(event), feed));
            }

            loop {
                tokio::select! {
                    _ = feed.generation.changed() => return None,
                    received = feed.live.recv() => match received {
                        Ok(event) if touches(&event, &feed.account) => return Some((Ok(event), feed)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            let err = PaymentError::NetworkError(format!("feed lagged by {} events", missed));
                            return Some((Err(err), feed));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                }
            }
        })))
    }

    async fn tip_cursor(&self, account: &str) -> Result<Cursor> {
        let state = self.lock();
        if !state.accounts.contains_key(account) {
            return Err(PaymentError::NotFound(account.to_string()));
        }

        let tip = state
            .history
            .iter()
            .rev()
            .find(|e| touches(e, account))
            .map_or(0, |e| e.id);
        Ok(Cursor::At(tip.to_string()))
    }
}
