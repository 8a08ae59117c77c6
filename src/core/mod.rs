//! Core correlation engine: queue, workers, result store, and broker.

pub mod audit;
pub mod broker;
pub mod error;
pub mod executor;
pub mod query;
pub mod result_store;
pub mod work_queue;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use broker::{BrokerStats, QueryBroker};
pub use error::{AppResult, BrokerError};
pub use executor::{ModelClient, ModelError};
pub use query::{CorrelationKey, Query, QueryId, QueryResult};
pub use result_store::{ResultStatus, ResultStore, StoreCounts};
pub use work_queue::WorkQueue;
pub use worker_pool::{PoolStats, WorkerPool};
