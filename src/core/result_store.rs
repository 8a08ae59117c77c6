//! Result storage with per-key one-shot wake-ups.
//!
//! The store is the single source of truth for published results. Waiters
//! register a one-shot subscription under the key, then check the store, and
//! only then suspend. Because registration always precedes the check, a publish
//! that lands between the two still finds the subscription and wakes it.
//! A wake-up carries no data; the waiter re-reads the store after waking.
//!
//! # Design Principles
//!
//! - **Subscribe before check**: no window in which a publish can be missed
//! - **Store is authoritative**: notifications only trigger a re-read
//! - **No leaked subscriptions**: a guard unregisters on every exit path,
//!   including when the waiting future is dropped
//! - **Brief critical sections**: `parking_lot` locks are never held across
//!   an `.await`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::BrokerError;
use super::query::{CorrelationKey, QueryId, QueryResult};
use crate::util::clock::deadline_after;

/// Observable state of a correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Accepted, result not yet published.
    Pending,
    /// Result published and readable.
    Ready,
}

/// Number of entries per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Placeholders awaiting a result.
    pub pending: usize,
    /// Published results.
    pub ready: usize,
}

enum Entry {
    Pending,
    Ready {
        result: QueryResult,
        published_at: Instant,
    },
}

type Subscribers = HashMap<u64, oneshot::Sender<()>>;

/// Key → result map plus one-shot notification channels.
pub struct ResultStore {
    /// Durable state, keyed by correlation key.
    entries: RwLock<HashMap<CorrelationKey, Entry>>,
    /// Registered waiters per key. Drained on publish.
    subscribers: Mutex<HashMap<CorrelationKey, Subscribers>>,
    /// Subscription id counter.
    next_subscription: AtomicU64,
    /// How long a published result stays readable.
    ttl: Duration,
}

/// Registered interest in a key. Unregisters itself when dropped.
struct Subscription<'a> {
    store: &'a ResultStore,
    key: CorrelationKey,
    id: u64,
    rx: oneshot::Receiver<()>,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.key, self.id);
    }
}

impl ResultStore {
    /// Create an empty store whose published results expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            ttl,
        }
    }

    /// Retention applied to published results.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a pending placeholder for `key`.
    ///
    /// Returns `false` (and changes nothing) if the key is already known.
    pub fn register(&self, key: &CorrelationKey) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.clone(), Entry::Pending);
        true
    }

    /// Store `result` under `key` and wake every waiter registered right now.
    ///
    /// Overwrites a pending placeholder. Publishing an identical result twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::AlreadyPublished` if a different result is already
    /// stored under `key`; the stored result is kept.
    pub fn publish(&self, key: &CorrelationKey, result: QueryResult) -> Result<(), BrokerError> {
        {
            let mut entries = self.entries.write();
            if let Some(Entry::Ready { result: existing, .. }) = entries.get(key) {
                if *existing == result {
                    debug!(key = %key, "Duplicate publish ignored");
                    return Ok(());
                }
                warn!(key = %key, "Conflicting publish rejected");
                return Err(BrokerError::AlreadyPublished(key.clone()));
            }
            entries.insert(
                key.clone(),
                Entry::Ready {
                    result,
                    published_at: Instant::now(),
                },
            );
        }

        let woken = self.notify(key);
        debug!(key = %key, woken = woken, "Result published");
        Ok(())
    }

    /// Non-blocking read of a published result.
    #[must_use]
    pub fn try_get(&self, key: &CorrelationKey) -> Option<QueryResult> {
        match self.entries.read().get(key) {
            Some(Entry::Ready { result, .. }) => Some(result.clone()),
            _ => None,
        }
    }

    /// Current state of `key`, or `None` if nothing is registered.
    #[must_use]
    pub fn status(&self, key: &CorrelationKey) -> Option<ResultStatus> {
        self.entries.read().get(key).map(|entry| match entry {
            Entry::Pending => ResultStatus::Pending,
            Entry::Ready { .. } => ResultStatus::Ready,
        })
    }

    /// Drop whatever is stored under `key` and wake its waiters.
    ///
    /// Woken waiters observe `NotFound`. Returns whether an entry existed.
    pub fn forget(&self, key: &CorrelationKey) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        self.notify(key);
        removed
    }

    /// Wait until a result for `key` is readable.
    ///
    /// Returns immediately when the result is already published. Otherwise
    /// suspends until a publish wakes this call, `timeout` elapses, or
    /// `cancel` fires. Dropping the returned future releases the subscription.
    ///
    /// # Errors
    ///
    /// - `BrokerError::NotFound` if nothing is registered under `key`
    /// - `BrokerError::Timeout` if the deadline passes first
    /// - `BrokerError::Canceled` if `cancel` fires first
    pub async fn wait_for(
        &self,
        key: &CorrelationKey,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, BrokerError> {
        let deadline = deadline_after(timeout);

        loop {
            // Register before looking: a publish after this line reaches `rx`.
            let mut subscription = self.subscribe(key);

            if let Some(result) = self.read(key)? {
                return Ok(result);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(key = %key, "Wait canceled");
                    return Err(BrokerError::Canceled);
                }
                _ = &mut subscription.rx => {
                    // Woken: loop to re-read the store.
                }
                () = tokio::time::sleep_until(deadline) => {
                    debug!(key = %key, timeout = ?timeout, "Wait timed out");
                    return Err(BrokerError::Timeout(timeout));
                }
            }
        }
    }

    /// Remove published results older than the TTL.
    ///
    /// Returns the identifiers of evicted results. Pending placeholders are kept.
    pub fn evict_expired(&self) -> Vec<QueryId> {
        self.evict_expired_at(Instant::now())
    }

    /// Same as [`evict_expired`](Self::evict_expired) with an explicit clock reading.
    pub fn evict_expired_at(&self, now: Instant) -> Vec<QueryId> {
        let mut evicted = Vec::new();
        self.entries.write().retain(|_, entry| match entry {
            Entry::Pending => true,
            Entry::Ready {
                result,
                published_at,
            } => {
                let keep = now.saturating_duration_since(*published_at) < self.ttl;
                if !keep {
                    evicted.push(result.id);
                }
                keep
            }
        });
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted expired results");
        }
        evicted
    }

    /// Entry counts per state.
    #[must_use]
    pub fn counts(&self) -> StoreCounts {
        self.entries
            .read()
            .values()
            .fold(StoreCounts::default(), |mut counts, entry| {
                match entry {
                    Entry::Pending => counts.pending += 1,
                    Entry::Ready { .. } => counts.ready += 1,
                }
                counts
            })
    }

    /// Number of live subscriptions across all keys.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().values().map(HashMap::len).sum()
    }

    fn read(&self, key: &CorrelationKey) -> Result<Option<QueryResult>, BrokerError> {
        match self.entries.read().get(key) {
            Some(Entry::Ready { result, .. }) => Ok(Some(result.clone())),
            Some(Entry::Pending) => Ok(None),
            None => Err(BrokerError::NotFound(key.clone())),
        }
    }

    fn subscribe(&self, key: &CorrelationKey) -> Subscription<'_> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.subscribers
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(id, tx);
        Subscription {
            store: self,
            key: key.clone(),
            id,
            rx,
        }
    }

    fn unsubscribe(&self, key: &CorrelationKey, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(waiters) = subscribers.get_mut(key) {
            waiters.remove(&id);
            if waiters.is_empty() {
                subscribers.remove(key);
            }
        }
    }

    fn notify(&self, key: &CorrelationKey) -> usize {
        let waiters = self.subscribers.lock().remove(key);
        waiters.map_or(0, |waiters| {
            let count = waiters.len();
            for tx in waiters.into_values() {
                // Receiver may already be gone; that waiter is exiting anyway.
                let _ = tx.send(());
            }
            count
        })
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}
