//! The correlation service tying ingress, workers, and retrieval together.
//!
//! A `QueryBroker` owns the identifier counter, the work queue, the result
//! store, the worker pool, and the expiry janitor. Nothing here is global:
//! handlers receive the broker by handle, and several brokers can run side by
//! side in one process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::error::BrokerError;
use super::executor::ModelClient;
use super::query::{CorrelationKey, Query, QueryId, QueryResult};
use super::result_store::{ResultStatus, ResultStore};
use super::work_queue::WorkQueue;
use super::worker_pool::{WorkerContext, WorkerPool};
use crate::config::BrokerConfig;
use crate::util::clock::{deadline_after, FAR_FUTURE};

/// Grace period per worker when shutting down.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(2);

/// Snapshot of broker activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Number of workers.
    pub worker_count: usize,
    /// Work queue capacity.
    pub queue_capacity: usize,
    /// Queries waiting in the queue.
    pub queued: usize,
    /// Model calls in flight.
    pub active: u64,
    /// Queries accepted at ingress.
    pub submitted: u64,
    /// Queries refused at ingress.
    pub rejected: u64,
    /// Queries answered successfully.
    pub completed: u64,
    /// Queries answered with an error text.
    pub failed: u64,
    /// Accepted queries without a published result.
    pub pending_results: usize,
    /// Published results still retained.
    pub ready_results: usize,
}

#[derive(Debug, Default)]
struct IngressCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
}

/// Asynchronous request/response correlation service.
pub struct QueryBroker {
    config: BrokerConfig,
    next_id: AtomicU64,
    queue: WorkQueue,
    store: Arc<ResultStore>,
    pool: WorkerPool,
    counters: IngressCounters,
    audit: Option<Arc<dyn AuditSink>>,
    shutdown: CancellationToken,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl QueryBroker {
    /// Start workers and the expiry janitor on the current runtime.
    pub(crate) fn start(
        config: BrokerConfig,
        client: Arc<dyn ModelClient>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let queue = WorkQueue::new(config.max_queue_depth);
        let store = Arc::new(ResultStore::new(config.result_ttl()));
        let shutdown = CancellationToken::new();

        let pool = WorkerPool::start(
            config.worker_count,
            &WorkerContext {
                rx: queue.receiver(),
                store: Arc::clone(&store),
                client,
                task_timeout: config.task_timeout(),
                audit: audit.clone(),
            },
        );

        let janitor = tokio::spawn(run_janitor(
            Arc::clone(&store),
            audit.clone(),
            config.sweep_interval(),
            shutdown.clone(),
        ));

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            retrieval_timeout = ?config.retrieval_timeout(),
            result_ttl = ?config.result_ttl(),
            "QueryBroker started"
        );

        Self {
            config,
            next_id: AtomicU64::new(0),
            queue,
            store,
            pool,
            counters: IngressCounters::default(),
            audit,
            shutdown,
            janitor: Mutex::new(Some(janitor)),
        }
    }

    /// Accept a prompt, assign it an identifier, and enqueue it.
    ///
    /// Returns as soon as the query is queued; never waits for processing.
    ///
    /// # Errors
    ///
    /// - `BrokerError::QueueFull` if no queue slot frees up within the
    ///   configured enqueue window
    /// - `BrokerError::Shutdown` if the broker is shutting down
    pub async fn submit(&self, prompt: impl Into<String>) -> Result<QueryId, BrokerError> {
        if self.is_shut_down() {
            return Err(BrokerError::Shutdown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = CorrelationKey::for_query(id);
        let query = Query {
            id,
            prompt: prompt.into(),
        };

        // Placeholder first, so retrieval can tell "pending" from "unknown".
        // Rolled back if this future ends without enqueueing, including when
        // it is dropped mid-wait.
        let placeholder = Placeholder::register(&self.store, key);

        match self.queue.submit(query, self.config.enqueue_timeout()).await {
            Ok(()) => {
                placeholder.keep();
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.audit(id, AuditAction::Submitted, None);
                debug!(query_id = id, "Query accepted");
                Ok(id)
            }
            Err(e) => {
                drop(placeholder);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.audit(id, AuditAction::Rejected, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Wait for the result of `id` using the configured retrieval deadline.
    ///
    /// # Errors
    ///
    /// See [`retrieve_with`](Self::retrieve_with).
    pub async fn retrieve(&self, id: QueryId) -> Result<QueryResult, BrokerError> {
        self.retrieve_with(id, self.config.retrieval_timeout(), &CancellationToken::new())
            .await
    }

    /// Wait for the result of `id`, bounded by `timeout` and `cancel`.
    ///
    /// A timeout leaves the query untouched; a later call can still pick the
    /// result up.
    ///
    /// # Errors
    ///
    /// - `BrokerError::NotFound` if `id` was never accepted or has expired
    /// - `BrokerError::Timeout` if the result is not ready in time
    /// - `BrokerError::Canceled` if `cancel` fires
    /// - `BrokerError::Shutdown` if the broker shuts down while waiting
    pub async fn retrieve_with(
        &self,
        id: QueryId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, BrokerError> {
        let key = CorrelationKey::for_query(id);
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(BrokerError::Shutdown),
            outcome = self.store.wait_for(&key, timeout, cancel) => outcome,
        }
    }

    /// Non-blocking status lookup.
    #[must_use]
    pub fn status(&self, id: QueryId) -> Option<ResultStatus> {
        self.store.status(&CorrelationKey::for_query(id))
    }

    /// Run one expiry sweep now. Returns the number of evicted results.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.store, self.audit.as_ref())
    }

    /// Snapshot of broker activity.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let pool = self.pool.stats();
        let store = self.store.counts();
        BrokerStats {
            worker_count: pool.worker_count,
            queue_capacity: self.queue.capacity(),
            queued: self.queue.len(),
            active: pool.active_tasks,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            completed: pool.completed_tasks,
            failed: pool.failed_tasks,
            pending_results: store.pending,
            ready_results: store.ready,
        }
    }

    /// The result store backing this broker.
    #[must_use]
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the broker shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting work, release waiting retrievals, and stop workers.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(queued = self.queue.len(), "Shutting down QueryBroker");
        self.shutdown.cancel();

        let janitor = self.janitor.lock().take();
        if let Some(janitor) = janitor {
            janitor.abort();
        }
        self.pool.shutdown(WORKER_JOIN_GRACE).await;
    }

    fn audit(&self, id: QueryId, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(id, action, detail));
        }
    }
}

/// Pending entry registered at ingress; forgotten on drop unless kept.
struct Placeholder<'a> {
    store: &'a ResultStore,
    key: Option<CorrelationKey>,
}

impl<'a> Placeholder<'a> {
    fn register(store: &'a ResultStore, key: CorrelationKey) -> Self {
        store.register(&key);
        Self {
            store,
            key: Some(key),
        }
    }

    fn keep(mut self) {
        self.key = None;
    }
}

impl Drop for Placeholder<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.store.forget(&key);
            debug!(key = %key, "Placeholder rolled back");
        }
    }
}

impl Drop for QueryBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(janitor) = self.janitor.get_mut().take() {
            janitor.abort();
        }
    }
}

fn sweep(store: &ResultStore, audit: Option<&Arc<dyn AuditSink>>) -> usize {
    let evicted = store.evict_expired();
    if let Some(sink) = audit {
        for id in &evicted {
            sink.record(build_audit_event(*id, AuditAction::Evicted, None));
        }
    }
    evicted.len()
}

/// Periodically evict expired results until shutdown.
async fn run_janitor(
    store: Arc<ResultStore>,
    audit: Option<Arc<dyn AuditSink>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let period = period.min(FAR_FUTURE);
    let mut ticker = tokio::time::interval_at(deadline_after(period), period);
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = sweep(&store, audit.as_ref());
                if evicted > 0 {
                    info!(evicted = evicted, "Expired results evicted");
                }
            }
        }
    }
    debug!("Janitor exiting");
}
