// ============================================================================
// TRADEIO-PAYMENTS - Payment Event Stream
// ============================================================================
// Long-lived subscription to an account's payment operations.
//
// One background task per open stream:
// - pins a `now` cursor to the feed's latest paging token before connecting
// - pulls records from the feed in operation-id order
// - remembers the last delivered paging token
// - on transport loss, reconnects from that token with backoff
// - drops replayed records at or before the last delivered id
// - gives up after a bounded number of consecutive failed reconnects
//
// Events reach the consumer through a bounded channel (`next_event`) or a
// callback run serially on the task (`open_with_handler`).
// ============================================================================

use crate::config::StreamConfig;
use crate::error::PaymentError;
use crate::transaction::Asset;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Position in an account's payment history
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cursor {
    /// Only events after the subscription starts
    Now,
    /// Events after this paging token
    At(String),
}

impl Cursor {
    pub fn as_str(&self) -> &str {
        match self {
            Cursor::Now => "now",
            Cursor::At(token) => token,
        }
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        if value == "now" {
            Cursor::Now
        } else {
            Cursor::At(value.to_string())
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Payment,
    CreateAccount,
}

/// A payment-class operation touching the watched account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Operation id; strictly increasing along the ledger
    pub id: u64,
    /// Cursor that resumes right after this event
    pub paging_token: String,
    pub ledger: u32,
    pub transaction_hash: String,
    pub kind: PaymentKind,
    pub from: String,
    pub to: String,
    pub asset: Asset,
    /// Decimal amount as reported by the network
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// True when `address` received this payment
    pub fn is_deposit_to(&self, address: &str) -> bool {
        self.to == address
    }

    /// True when `address` sent this payment
    pub fn is_payment_from(&self, address: &str) -> bool {
        self.from == address
    }
}

/// Ledger sequence encoded in the upper half of an operation id
pub fn ledger_of_operation(id: u64) -> u32 {
    (id >> 32) as u32
}

// ============================================================================
// FEED SEAM
// ============================================================================

/// Records from one connection. The stream ending or yielding an error
/// means the connection is gone, except for `UndecodableRecord`, which
/// reports one record that was skipped.
pub type PaymentRecords = Pin<Box<dyn Stream<Item = Result<PaymentEvent>> + Send>>;

/// Opens connections to an account's payment feed.
#[async_trait]
pub trait PaymentFeed: Send + Sync {
    async fn connect(&self, account: &str, cursor: &Cursor) -> Result<PaymentRecords>;

    /// Paging token of the newest payment record touching `account`, as
    /// `Cursor::At`. An account with no records yet gets `Cursor::At("0")`.
    async fn tip_cursor(&self, account: &str) -> Result<Cursor>;
}

// ============================================================================
// STREAM HANDLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Closed,
}

enum Sink {
    Channel(mpsc::Sender<Result<PaymentEvent>>),
    Handler(Box<dyn FnMut(Result<PaymentEvent>) + Send>),
}

/// Handle to a running payment subscription.
pub struct PaymentEventStream {
    account: String,
    events: Option<mpsc::Receiver<Result<PaymentEvent>>>,
    state: Arc<watch::Sender<StreamState>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl PaymentEventStream {
    /// Open a subscription; events are read with [`next_event`](Self::next_event).
    ///
    /// Returns once the first connection is up.
    pub async fn open(
        feed: Arc<dyn PaymentFeed>,
        config: &StreamConfig,
        account: &str,
        cursor: Cursor,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let mut stream = Self::start(feed, config, account, cursor, Sink::Channel(tx)).await?;
        stream.events = Some(rx);
        Ok(stream)
    }

    /// Open a subscription that hands every event, and a terminal error if
    /// the stream gives up, to `handler` on the stream task.
    pub async fn open_with_handler<F>(
        feed: Arc<dyn PaymentFeed>,
        config: &StreamConfig,
        account: &str,
        cursor: Cursor,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(Result<PaymentEvent>) + Send + 'static,
    {
        Self::start(feed, config, account, cursor, Sink::Handler(Box::new(handler))).await
    }

    async fn start(
        feed: Arc<dyn PaymentFeed>,
        config: &StreamConfig,
        account: &str,
        cursor: Cursor,
        sink: Sink,
    ) -> Result<Self> {
        let (state, _) = watch::channel(StreamState::Connecting);
        let state = Arc::new(state);

        debug!("Opening payment stream for {} at cursor {}", account, cursor);
        let opening = async {
            // A reconnect must resume from a concrete position, never `now`
            let cursor = match cursor {
                Cursor::Now => feed.tip_cursor(account).await?,
                at => at,
            };
            let records = feed.connect(account, &cursor).await?;
            Ok::<_, PaymentError>((cursor, records))
        };
        let (cursor, records) = tokio::time::timeout(config.connect_timeout(), opening)
            .await
            .map_err(|_| PaymentError::NetworkError(format!(
                "Payment stream connect timed out after {:?}", config.connect_timeout()
            )))??;

        state.send_replace(StreamState::Streaming);
        info!("Payment stream open for {}", account);

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let worker = StreamWorker {
            feed,
            config: config.clone(),
            account: account.to_string(),
            last_id: cursor_id(&cursor),
            initial_cursor: cursor,
            last_token: None,
            sink,
            state: Arc::clone(&state),
            running: Arc::clone(&running),
            shutdown: Arc::clone(&shutdown),
        };
        let task = tokio::spawn(worker.run(records));

        Ok(Self {
            account: account.to_string(),
            events: None,
            state,
            running,
            shutdown,
            task: Some(task),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Next event in operation-id order.
    ///
    /// After a `StreamTerminated` error, or once the stream is closed, this
    /// returns `None`. Always `None` for handler streams.
    pub async fn next_event(&mut self) -> Option<Result<PaymentEvent>> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Stop the stream and wait for its task to finish. Idempotent.
    pub async fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Payment stream task for {} failed: {}", self.account, e);
            }
            info!("Payment stream closed for {}", self.account);
        }

        self.events = None;
        self.state.send_replace(StreamState::Closed);
    }
}

impl Drop for PaymentEventStream {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.running.store(false, Ordering::SeqCst);
            self.shutdown.notify_one();
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

struct StreamWorker {
    feed: Arc<dyn PaymentFeed>,
    config: StreamConfig,
    account: String,
    initial_cursor: Cursor,
    last_id: Option<u64>,
    last_token: Option<String>,
    sink: Sink,
    state: Arc<watch::Sender<StreamState>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

enum Pump {
    /// Connection lost; reconnect
    Lost(String),
    /// Close requested or consumer gone
    Stop,
}

impl StreamWorker {
    async fn run(mut self, mut records: PaymentRecords) {
        loop {
            let reason = match self.pump(&mut records).await {
                Pump::Stop => break,
                Pump::Lost(reason) => reason,
            };

            self.state.send_replace(StreamState::Disconnected);
            warn!("Payment stream for {} lost: {}", self.account, reason);

            match self.reconnect(reason).await {
                Some(next) => records = next,
                None => break,
            }
        }

        if !self.running.load(Ordering::SeqCst) {
            self.state.send_replace(StreamState::Closed);
        }
        debug!("Payment stream task for {} stopped", self.account);
    }

    /// Deliver records until the connection drops or the stream stops.
    async fn pump(&mut self, records: &mut PaymentRecords) -> Pump {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Pump::Stop;
            }

            let item = tokio::select! {
                _ = self.shutdown.notified() => return Pump::Stop,
                item = records.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    if self.last_id.is_some_and(|last| event.id <= last) {
                        debug!("Dropping replayed payment {} for {}", event.id, self.account);
                        continue;
                    }

                    self.last_id = Some(event.id);
                    self.last_token = Some(event.paging_token.clone());

                    if !self.deliver(Ok(event)).await {
                        return Pump::Stop;
                    }
                }
                Some(Err(PaymentError::UndecodableRecord { paging_token, reason })) => {
                    warn!("Skipping payment record {} for {}: {}", paging_token, self.account, reason);
                    if let Ok(id) = paging_token.parse::<u64>() {
                        if self.last_id.is_some_and(|last| id <= last) {
                            continue;
                        }
                        self.last_id = Some(id);
                    }
                    self.last_token = Some(paging_token.clone());

                    let skipped = PaymentError::UndecodableRecord { paging_token, reason };
                    if !self.deliver(Err(skipped)).await {
                        return Pump::Stop;
                    }
                }
                Some(Err(e)) => return Pump::Lost(e.to_string()),
                None => return Pump::Lost("stream ended".to_string()),
            }
        }
    }

    /// Reconnect with backoff. `None` means the stream is finished.
    async fn reconnect(&mut self, mut reason: String) -> Option<PaymentRecords> {
        let mut attempt = 0u32;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return None;
            }

            if attempt >= self.config.max_reconnect_attempts {
                error!(
                    "Payment stream for {} giving up after {} reconnect attempts: {}",
                    self.account, attempt, reason
                );
                self.deliver(Err(PaymentError::StreamTerminated { attempts: attempt, reason })).await;
                return None;
            }

            attempt += 1;
            let delay = self.config.reconnect_delay(attempt);
            tokio::select! {
                _ = self.shutdown.notified() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let cursor = self.resume_cursor();
            self.state.send_replace(StreamState::Connecting);
            info!(
                "Reconnecting payment stream for {} at cursor {} (attempt {}/{})",
                self.account, cursor, attempt, self.config.max_reconnect_attempts
            );

            let connect = tokio::time::timeout(
                self.config.connect_timeout(),
                self.feed.connect(&self.account, &cursor),
            );
            let result = tokio::select! {
                _ = self.shutdown.notified() => return None,
                result = connect => result,
            };

            match result {
                Ok(Ok(records)) => {
                    self.state.send_replace(StreamState::Streaming);
                    return Some(records);
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => reason = "connect timed out".to_string(),
            }

            self.state.send_replace(StreamState::Disconnected);
            warn!("Reconnect {} for {} failed: {}", attempt, self.account, reason);
        }
    }

    /// Last delivered paging token, or the pinned opening cursor before any
    /// delivery.
    fn resume_cursor(&self) -> Cursor {
        match &self.last_token {
            Some(token) => Cursor::At(token.clone()),
            None => self.initial_cursor.clone(),
        }
    }

    /// Hand one item to the consumer. False when nobody is listening any more.
    async fn deliver(&mut self, item: Result<PaymentEvent>) -> bool {
        match &mut self.sink {
            Sink::Channel(tx) => {
                tokio::select! {
                    _ = self.shutdown.notified() => false,
                    sent = tx.send(item) => sent.is_ok(),
                }
            }
            Sink::Handler(handler) => {
                handler(item);
                true
            }
        }
    }
}

/// Operation id behind a paging token, for replay suppression
fn cursor_id(cursor: &Cursor) -> Option<u64> {
    match cursor {
        Cursor::At(token) => token.parse().ok(),
        Cursor::Now => None,
    }
}
