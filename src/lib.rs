//! # Prometheus Query Broker
//!
//! An asynchronous request/response correlation service for language-model
//! queries.
//!
//! Clients submit a prompt and immediately receive a numeric identifier. A
//! fixed pool of workers drains a bounded queue, calls the model provider, and
//! publishes each answer to a shared result store. Clients later retrieve the
//! answer by identifier, waiting up to a deadline for it to become ready.
//!
//! ## Key Features
//!
//! - **Non-blocking ingress**: submission returns as soon as the query is queued
//! - **Bounded concurrency**: pool size caps outbound model calls
//! - **Backpressure**: a saturated queue rejects submissions instead of stalling them
//! - **Wake-up retrieval**: waiters are notified on publish, never poll
//! - **No lost answers**: a timed-out retrieval leaves the result retrievable later
//! - **Failure isolation**: model errors, panics, and hangs become result text
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_query_broker::builders::build_broker;
//! use prometheus_query_broker::config::BrokerConfig;
//!
//! let broker = build_broker(BrokerConfig::new().with_worker_count(3), my_client)?;
//! let id = broker.submit("What is 2+2?").await?;
//! let result = broker.retrieve(id).await?;
//! println!("{}", result.text);
//! ```
//!
//! The HTTP surface lives in [`runtime`]; see `src/main.rs` for the server binary.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Correlation engine: queue, workers, result store, and broker.
pub mod core;
/// Configuration models for the broker and the model provider.
pub mod config;
/// Builders to construct a running broker from configuration.
pub mod builders;
/// Infrastructure adapters for external services.
pub mod infra;
/// HTTP surface: routes, error mapping, and server loop.
pub mod runtime;
/// Shared utilities.
pub mod util;
