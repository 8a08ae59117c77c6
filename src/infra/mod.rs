//! Infrastructure adapters for external services.

pub mod model;

pub use model::OpenAiClient;
