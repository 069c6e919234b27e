// ============================================================================
// TRADEIO-PAYMENTS - Condition Set
// ============================================================================
// Wait until every named condition has been observed, e.g. "payment sent"
// and "deposit received" on a payment stream. Conditions are marked from
// stream handlers; the waiter is woken once, through a oneshot channel.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

struct Inner {
    conditions: BTreeMap<String, bool>,
    done: Option<oneshot::Sender<()>>,
}

pub struct ConditionSet {
    inner: Mutex<Inner>,
    completed: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ConditionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = oneshot::channel();
        let set = Self {
            inner: Mutex::new(Inner {
                conditions: names.into_iter().map(|n| (n.into(), false)).collect(),
                done: Some(tx),
            }),
            completed: Mutex::new(Some(rx)),
        };

        // An empty set is complete from the start
        set.signal_if_complete(&mut lock(&set.inner));
        set
    }

    /// Mark `name` observed. True if this call flipped a known condition.
    pub fn mark(&self, name: &str) -> bool {
        let mut inner = lock(&self.inner);
        let flipped = match inner.conditions.get_mut(name) {
            Some(seen) if !*seen => {
                *seen = true;
                true
            }
            _ => false,
        };

        if flipped {
            self.signal_if_complete(&mut inner);
        }
        flipped
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.inner).conditions.values().all(|&seen| seen)
    }

    /// Current state of every condition
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        lock(&self.inner).conditions.clone()
    }

    /// Wait for completion, at most `timeout`. On timeout the error carries
    /// the state of every condition. Only the first waiter is woken; later
    /// calls just report the current state.
    pub async fn wait(&self, timeout: Duration) -> Result<(), BTreeMap<String, bool>> {
        if self.is_complete() {
            return Ok(());
        }

        let receiver = lock(&self.completed).take();
        let Some(receiver) = receiver else {
            return Err(self.snapshot());
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(())) => Ok(()),
            _ if self.is_complete() => Ok(()),
            _ => Err(self.snapshot()),
        }
    }

    fn signal_if_complete(&self, inner: &mut Inner) {
        if inner.conditions.values().all(|&seen| seen) {
            if let Some(done) = inner.done.take() {
                let _ = done.send(());
            }
        }
    }
}

/// Lock, recovering the data if a marking thread panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
