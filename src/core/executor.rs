//! Model call abstraction used by workers.

use async_trait::async_trait;
use thiserror::Error;

/// Failures of a single model call.
///
/// Workers never propagate these; they are rendered into the result text.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as received.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The provider answered without any choices.
    #[error("no response choices received")]
    EmptyResponse,
    /// The client could not be constructed.
    #[error("client error: {0}")]
    Client(String),
}

/// Abstraction over the external language-model API.
///
/// Implementations carry their own credential and client-side timeout. The
/// worker pool adds its own per-call deadline on top.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_query_broker::core::{ModelClient, ModelError};
///
/// struct Echo;
///
/// #[async_trait]
/// impl ModelClient for Echo {
///     async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
///         Ok(format!("echo: {prompt}"))
///     }
/// }
/// ```
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    /// Send one prompt and return the model's text answer.
    ///
    /// # Errors
    ///
    /// Any transport, status, or decoding failure of the call.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}
