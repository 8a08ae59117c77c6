//! Fixed-size pool of workers draining the work queue.
//!
//! Each worker takes one query at a time, calls the model, and publishes a
//! result (answer or formatted error) to the result store. Pool size bounds
//! the number of concurrent outbound model calls.
//!
//! # Design
//!
//! - **No polling**: idle workers suspend on the queue receiver
//! - **Isolated calls**: every model call runs in its own task under a
//!   deadline, so a hung or panicking call costs one result, not one worker
//! - **Clean shutdown**: cancelling the pool token stops workers between items

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::executor::ModelClient;
use super::query::{CorrelationKey, Query, QueryResult};
use super::result_store::ResultStore;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of workers.
    pub worker_count: usize,
    /// Model calls currently in flight.
    pub active_tasks: u64,
    /// Queries answered successfully.
    pub completed_tasks: u64,
    /// Queries answered with an error text.
    pub failed_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker needs; cloned once per worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub rx: Receiver<Query>,
    pub store: Arc<ResultStore>,
    pub client: Arc<dyn ModelClient>,
    pub task_timeout: Duration,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl WorkerContext {
    fn audit(&self, query: &Query, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(query.id, action, detail));
        }
    }
}

/// Outcome of one guarded model call.
enum CallOutcome {
    Answer(String),
    Failure(String),
}

/// Pool of async workers with a per-call deadline.
pub struct WorkerPool {
    worker_count: usize,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers on the current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub(crate) fn start(worker_count: usize, ctx: &WorkerContext) -> Self {
        let counters = Arc::new(PoolCounters::default());
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    ctx.clone(),
                    Arc::clone(&counters),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            worker_count = worker_count,
            task_timeout = ?ctx.task_timeout,
            "WorkerPool started"
        );

        Self {
            worker_count,
            counters,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Number of workers.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stop workers and wait up to `grace` for each to exit.
    ///
    /// Workers finish their current model call (itself bounded by the task
    /// deadline) and then exit. Workers still running after `grace` are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        info!("Shutting down worker pool");
        let worker_count = workers.len();
        for (worker_id, mut handle) in workers.into_iter().enumerate() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!(worker_id = worker_id, "Worker joined"),
                Ok(Err(e)) => warn!(worker_id = worker_id, error = %e, "Worker ended abnormally"),
                Err(_) => {
                    warn!(worker_id = worker_id, "Worker did not exit within grace period - aborting");
                    handle.abort();
                }
            }
        }
        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal only; joining requires an async context.
        self.shutdown.cancel();
    }
}

/// Worker loop: dequeue, call, publish, repeat.
async fn run_worker(
    worker_id: usize,
    ctx: WorkerContext,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
) {
    debug!(worker_id = worker_id, "Worker started");

    loop {
        let query = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(worker_id = worker_id, "Worker shutdown requested, exiting");
                break;
            }
            next = ctx.rx.recv_async() => match next {
                Ok(query) => query,
                Err(_) => {
                    debug!(worker_id = worker_id, "Work queue closed, exiting");
                    break;
                }
            },
        };

        let in_flight = InFlight::start(&counters);
        ctx.audit(&query, AuditAction::Started, None);
        debug!(worker_id = worker_id, query_id = query.id, "Worker executing query");

        let text = match call_model(&ctx, &query).await {
            CallOutcome::Answer(text) => {
                counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                ctx.audit(&query, AuditAction::Completed, None);
                text
            }
            CallOutcome::Failure(message) => {
                counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id = worker_id, query_id = query.id, error = %message, "Model call failed");
                ctx.audit(&query, AuditAction::Failed, Some(message.clone()));
                format!("Error: {message}")
            }
        };

        let key = CorrelationKey::for_query(query.id);
        let result = QueryResult { id: query.id, text };
        if let Err(e) = ctx.store.publish(&key, result) {
            error!(worker_id = worker_id, query_id = query.id, error = %e, "Failed to publish result");
        }

        drop(in_flight);
        debug!(worker_id = worker_id, query_id = query.id, "Worker completed query");
    }

    debug!(worker_id = worker_id, "Worker exiting");
}

/// Counts one item as active until dropped.
struct InFlight<'a> {
    counters: &'a PoolCounters,
}

impl<'a> InFlight<'a> {
    fn start(counters: &'a PoolCounters) -> Self {
        counters.active_tasks.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Spawned model call, aborted if its owner goes away first.
struct CallHandle<T>(JoinHandle<T>);

impl<T> Drop for CallHandle<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Result text for a call that outlived `timeout`. Whole seconds print
/// without a fraction.
fn timeout_message(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("model call timed out after {}s", timeout.as_secs())
    } else {
        format!("model call timed out after {}s", timeout.as_secs_f64())
    }
}

/// Run one model call in its own task, bounded by the pool deadline.
///
/// Dropping this future (worker aborted at shutdown) aborts the call.
async fn call_model(ctx: &WorkerContext, query: &Query) -> CallOutcome {
    let client = Arc::clone(&ctx.client);
    let prompt = query.prompt.clone();
    let mut call = CallHandle(tokio::spawn(async move { client.complete(&prompt).await }));

    match tokio::time::timeout(ctx.task_timeout, &mut call.0).await {
        Ok(Ok(Ok(text))) => CallOutcome::Answer(text),
        Ok(Ok(Err(e))) => CallOutcome::Failure(e.to_string()),
        Ok(Err(join_err)) if join_err.is_panic() => {
            CallOutcome::Failure("model call panicked".to_string())
        }
        Ok(Err(join_err)) => CallOutcome::Failure(format!("model call aborted: {join_err}")),
        Err(_) => CallOutcome::Failure(timeout_message(ctx.task_timeout)),
    }
}
