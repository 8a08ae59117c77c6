//! Assemble a `QueryBroker` from configuration and a model client.

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::core::{AuditSink, BrokerError, ModelClient, QueryBroker};
use crate::infra::OpenAiClient;

/// Build and start a broker around any model client.
///
/// Must be called from within a tokio runtime. Provider settings in
/// `cfg.model` are not validated here.
///
/// # Errors
///
/// Returns `BrokerError::InvalidConfig` if the broker settings are invalid.
pub fn build_broker<M>(cfg: BrokerConfig, client: M) -> Result<QueryBroker, BrokerError>
where
    M: ModelClient,
{
    build_broker_with_audit(cfg, client, None)
}

/// Same as [`build_broker`], recording lifecycle events into `audit`.
///
/// # Errors
///
/// Returns `BrokerError::InvalidConfig` if the broker settings are invalid.
pub fn build_broker_with_audit<M>(
    cfg: BrokerConfig,
    client: M,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<QueryBroker, BrokerError>
where
    M: ModelClient,
{
    cfg.validate().map_err(BrokerError::InvalidConfig)?;
    Ok(QueryBroker::start(cfg, Arc::new(client), audit))
}

/// Build and start a broker calling the OpenAI chat-completions API.
///
/// # Errors
///
/// Returns `BrokerError::InvalidConfig` if the broker or provider settings are
/// invalid, including a missing API key.
pub fn build_openai_broker(cfg: BrokerConfig) -> Result<QueryBroker, BrokerError> {
    cfg.validate_with_model().map_err(BrokerError::InvalidConfig)?;
    let client = OpenAiClient::new(&cfg.model)
        .map_err(|e| BrokerError::InvalidConfig(format!("model client: {e}")))?;
    Ok(QueryBroker::start(cfg, Arc::new(client), None))
}
