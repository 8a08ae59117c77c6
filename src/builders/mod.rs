//! Builders to construct a running broker from configuration.

pub mod broker_builder;

pub use broker_builder::{build_broker, build_broker_with_audit, build_openai_broker};
