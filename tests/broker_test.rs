//! Integration tests for QueryBroker
//!
//! These tests validate real-world behavior including:
//! - Unique identifiers under concurrent submission
//! - Correct correlation of results to queries
//! - Bounded model concurrency
//! - Backpressure when the queue is saturated
//! - Timeouts that do not lose results
//! - Failure text, audit trail, stats, and expiry

use async_trait::async_trait;
use futures::future::join_all;
use prometheus_query_broker::builders::{build_broker, build_broker_with_audit};
use prometheus_query_broker::config::BrokerConfig;
use prometheus_query_broker::core::{
    AuditAction, AuditSink, BrokerError, InMemoryAuditSink, ModelClient, ModelError, QueryBroker,
    ResultStatus,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// TEST CLIENTS - Real implementations for testing
// ============================================================================

/// Answers every prompt after a short random delay, tracking peak concurrency.
#[derive(Default)]
struct EchoClient {
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelClient for EchoClient {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = rand::random_range(1..15);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prompt == "fail" {
            return Err(ModelError::Status {
                status: 500,
                body: "upstream exploded".into(),
            });
        }
        Ok(format!("answer to {prompt}"))
    }
}

/// Blocks every call until the test releases permits.
struct GatedClient {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ModelClient for GatedClient {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ModelError::Client(e.to_string()))?;
        permit.forget();
        Ok(format!("answer to {prompt}"))
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn test_config() -> BrokerConfig {
    BrokerConfig::new()
        .with_worker_count(3)
        .with_max_queue_depth(64)
        .with_retrieval_timeout(Duration::from_secs(5))
        .with_task_timeout(Duration::from_secs(5))
}

fn echo_broker(cfg: BrokerConfig) -> (QueryBroker, Arc<AtomicUsize>) {
    let client = EchoClient::default();
    let peak = Arc::clone(&client.peak);
    (build_broker(cfg, client).unwrap(), peak)
}

fn gated_broker(cfg: BrokerConfig) -> (QueryBroker, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let client = GatedClient {
        gate: Arc::clone(&gate),
    };
    (build_broker(cfg, client).unwrap(), gate)
}

// ============================================================================
// SUBMISSION AND CORRELATION
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_get_distinct_ids() {
    let (broker, _) = echo_broker(test_config());

    let ids: Vec<u64> = join_all((0..50).map(|i| broker.submit(format!("prompt-{i}"))))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(ids.iter().all(|id| *id >= 1));

    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_correlate_without_cross_talk() {
    let (broker, _) = echo_broker(test_config());

    let mut submitted = Vec::new();
    for i in 0..40 {
        let prompt = format!("prompt-{i}");
        let id = broker.submit(prompt.clone()).await.unwrap();
        submitted.push((id, prompt));
    }

    // Retrieve in reverse order, all at once.
    let outcomes = join_all(
        submitted
            .iter()
            .rev()
            .map(|(id, _)| broker.retrieve(*id)),
    )
    .await;

    for ((id, prompt), outcome) in submitted.iter().rev().zip(outcomes) {
        let result = outcome.unwrap();
        assert_eq!(result.id, *id);
        assert_eq!(result.text, format!("answer to {prompt}"));
    }

    broker.shutdown().await;
}

#[tokio::test]
async fn test_first_id_is_one() {
    let (broker, _) = echo_broker(test_config());
    assert_eq!(broker.submit("2+2?").await.unwrap(), 1);
    assert_eq!(broker.submit("3+3?").await.unwrap(), 2);
    broker.shutdown().await;
}

#[tokio::test]
async fn test_empty_prompt_is_accepted() {
    let (broker, _) = echo_broker(test_config());
    let id = broker.submit("").await.unwrap();
    assert_eq!(broker.retrieve(id).await.unwrap().text, "answer to ");
    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_model_concurrency_bounded_by_pool_size() {
    let (broker, peak) = echo_broker(test_config().with_worker_count(3));

    let mut ids = Vec::new();
    for i in 0..30 {
        ids.push(broker.submit(format!("p{i}")).await.unwrap());
    }
    for outcome in join_all(ids.iter().map(|id| broker.retrieve(*id))).await {
        outcome.unwrap();
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 3, "peak concurrency {peak} exceeded pool size");

    broker.shutdown().await;
}

// ============================================================================
// BACKPRESSURE AND TIMEOUTS
// ============================================================================

#[tokio::test]
async fn test_saturated_queue_rejects_and_accepted_queries_resolve() {
    let cfg = test_config()
        .with_worker_count(1)
        .with_max_queue_depth(2)
        .with_enqueue_timeout(Duration::ZERO);
    let (broker, gate) = gated_broker(cfg);

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for i in 0..10 {
        match broker.submit(format!("q{i}")).await {
            Ok(id) => accepted.push(id),
            Err(BrokerError::QueueFull { capacity }) => {
                assert_eq!(capacity, 2);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(rejected > 0);
    assert!(accepted.len() >= 2 && accepted.len() <= 3);
    assert_eq!(broker.stats().rejected, rejected);

    gate.add_permits(100);
    for id in &accepted {
        let result = broker.retrieve(*id).await.unwrap();
        assert_eq!(result.id, *id);
    }

    // Capacity is back once drained.
    let id = broker.submit("after drain").await.unwrap();
    assert_eq!(broker.retrieve(id).await.unwrap().text, "answer to after drain");

    broker.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_window_waits_for_a_slot() {
    let cfg = test_config()
        .with_worker_count(1)
        .with_max_queue_depth(1)
        .with_enqueue_timeout(Duration::from_secs(2));
    let (broker, gate) = gated_broker(cfg);

    let first = broker.submit("first").await.unwrap();
    let second = broker.submit("second").await.unwrap();

    let releaser = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            gate.add_permits(100);
        })
    };

    // Queue is full until the gate opens; the window absorbs the wait.
    let third = broker.submit("third").await.unwrap();
    releaser.await.unwrap();

    for id in [first, second, third] {
        broker.retrieve(id).await.unwrap();
    }
    broker.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_submit_leaves_no_placeholder() {
    let cfg = test_config()
        .with_worker_count(1)
        .with_max_queue_depth(1)
        .with_enqueue_timeout(Duration::from_secs(5));
    let (broker, gate) = gated_broker(cfg);
    let broker = Arc::new(broker);

    let first = broker.submit("first").await.unwrap();
    let second = broker.submit("second").await.unwrap();

    // Worker is parked on the gate and the queue is full: this one waits.
    let stuck = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.submit("abandoned").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.stats().pending_results, 3);

    stuck.abort();
    assert!(stuck.await.unwrap_err().is_cancelled());
    assert_eq!(broker.stats().pending_results, 2);
    assert_eq!(broker.status(3), None);

    gate.add_permits(10);
    broker.retrieve(first).await.unwrap();
    broker.retrieve(second).await.unwrap();

    let stats = broker.stats();
    assert_eq!(stats.pending_results, 0);
    assert_eq!(stats.ready_results, 2);
    assert_eq!(stats.submitted, 2);
    assert!(matches!(
        broker.retrieve(3).await.unwrap_err(),
        BrokerError::NotFound(_)
    ));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_huge_retrieval_timeout_waits_normally() {
    let (broker, gate) = gated_broker(test_config());
    let broker = Arc::new(broker);
    let id = broker.submit("patient").await.unwrap();

    let waiter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            broker
                .retrieve_with(id, Duration::MAX, &tokio_util::sync::CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(1);

    let result = waiter.await.unwrap().unwrap();
    assert_eq!(result.text, "answer to patient");

    broker.shutdown().await;
}

#[tokio::test]
async fn test_timeout_leaves_result_retrievable() {
    let cfg = test_config().with_retrieval_timeout(Duration::from_millis(100));
    let (broker, gate) = gated_broker(cfg);

    let id = broker.submit("slow").await.unwrap();
    let err = broker.retrieve(id).await.unwrap_err();
    assert!(matches!(err, BrokerError::Timeout(_)));
    assert_eq!(broker.status(id), Some(ResultStatus::Pending));

    gate.add_permits(1);
    let result = broker
        .retrieve_with(id, Duration::from_secs(5), &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.text, "answer to slow");
    assert_eq!(broker.status(id), Some(ResultStatus::Ready));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (broker, _) = echo_broker(test_config());
    let err = broker.retrieve(999).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
    assert!(broker.status(999).is_none());
    broker.shutdown().await;
}

// ============================================================================
// FAILURES, AUDIT, STATS, EXPIRY, SHUTDOWN
// ============================================================================

#[tokio::test]
async fn test_model_failure_is_delivered_as_text() {
    let (broker, _) = echo_broker(test_config());

    let id = broker.submit("fail").await.unwrap();
    let result = broker.retrieve(id).await.unwrap();
    assert_eq!(
        result.text,
        "Error: provider returned status 500: upstream exploded"
    );
    assert_eq!(broker.stats().failed, 1);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_audit_trail_records_lifecycle() {
    let sink = InMemoryAuditSink::new(100);
    let audit: Arc<dyn AuditSink> = Arc::new(sink.clone());
    let broker = build_broker_with_audit(test_config(), EchoClient::default(), Some(audit)).unwrap();

    let ok = broker.submit("hello").await.unwrap();
    let failed = broker.submit("fail").await.unwrap();
    broker.retrieve(ok).await.unwrap();
    broker.retrieve(failed).await.unwrap();

    let ok_actions = sink.actions_for(ok);
    assert!(ok_actions.contains(&AuditAction::Submitted));
    let started = ok_actions.iter().position(|a| *a == AuditAction::Started);
    let completed = ok_actions.iter().position(|a| *a == AuditAction::Completed);
    assert!(started.unwrap() < completed.unwrap());

    let failed_actions = sink.actions_for(failed);
    assert!(failed_actions.contains(&AuditAction::Failed));
    assert!(!failed_actions.contains(&AuditAction::Completed));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_stats_track_activity() {
    let (broker, _) = echo_broker(test_config().with_worker_count(2));

    let a = broker.submit("a").await.unwrap();
    let b = broker.submit("b").await.unwrap();
    broker.retrieve(a).await.unwrap();
    broker.retrieve(b).await.unwrap();

    let stats = broker.stats();
    assert_eq!(stats.worker_count, 2);
    assert_eq!(stats.queue_capacity, 64);
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.pending_results, 0);
    assert_eq!(stats.ready_results, 2);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_sweep_evicts_expired_results() {
    let (broker, _) = echo_broker(test_config().with_result_ttl(Duration::from_secs(1)));

    let id = broker.submit("short-lived").await.unwrap();
    broker.retrieve(id).await.unwrap();
    assert_eq!(broker.sweep_expired(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(broker.sweep_expired(), 1);

    let err = broker.retrieve(id).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_waiters_and_rejects_submissions() {
    let (broker, _gate) = gated_broker(test_config());
    let broker = Arc::new(broker);

    let id = broker.submit("never answered").await.unwrap();
    let waiter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.retrieve(id).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.shutdown().await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, BrokerError::Shutdown));
    assert!(broker.is_shut_down());
    assert!(matches!(
        broker.submit("late").await.unwrap_err(),
        BrokerError::Shutdown
    ));
}
