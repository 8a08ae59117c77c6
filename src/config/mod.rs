//! Configuration models for the broker and the model provider.

pub mod broker;

pub use broker::{BrokerConfig, ModelConfig, API_KEY_ENV, MAX_RESULT_TTL, MAX_TIMEOUT};
