//! API-facing request/response models and route handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query as QueryString, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::error::ApiError;
use crate::core::{BrokerStats, QueryBroker, QueryId, QueryResult};

/// Acknowledgement text returned on submission.
pub const QUERY_RECEIVED: &str = "Query received";

/// Query submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySubmission {
    /// Prompt for the model. May be empty.
    pub prompt: String,
}

/// Submission acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAccepted {
    /// Fixed acknowledgement text.
    pub message: String,
    /// Identifier to retrieve the result with.
    pub id: QueryId,
}

/// Query-string parameters of the retrieval endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultParams {
    /// Raw identifier; validated by the handler.
    pub id: Option<String>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Build the HTTP router over a broker.
pub fn router(broker: Arc<QueryBroker>) -> Router {
    Router::new()
        .route("/query", post(submit_query))
        .route("/result", get(get_result))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

/// Accept a prompt and return its identifier without waiting for the answer.
///
/// POST /query
///
/// # Errors
///
/// 400 for an unparseable body, 503 when the queue is saturated or the broker
/// is shutting down.
pub async fn submit_query(
    State(broker): State<Arc<QueryBroker>>,
    body: Bytes,
) -> Result<(StatusCode, Json<QueryAccepted>), ApiError> {
    let submission: QuerySubmission = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid request payload: {e}")))?;

    let id = broker.submit(submission.prompt).await?;
    info!(query_id = id, "Query received");

    Ok((
        StatusCode::ACCEPTED,
        Json(QueryAccepted {
            message: QUERY_RECEIVED.to_string(),
            id,
        }),
    ))
}

/// Return the result for `id`, waiting up to the retrieval deadline.
///
/// GET /result?id=<integer>
///
/// If the client disconnects, the handler future is dropped and the wait is
/// released with it.
///
/// # Errors
///
/// 400 for a missing or non-numeric id, 404 for an unknown id, 408 when the
/// deadline passes, 503 during shutdown.
pub async fn get_result(
    State(broker): State<Arc<QueryBroker>>,
    QueryString(params): QueryString<ResultParams>,
) -> Result<Json<QueryResult>, ApiError> {
    let raw = params
        .id
        .ok_or_else(|| ApiError::InvalidRequest("missing id parameter".into()))?;
    let id: QueryId = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("invalid id parameter `{raw}`")))?;

    debug!(query_id = id, "Waiting for result");
    let result = broker.retrieve(id).await?;
    Ok(Json(result))
}

/// GET /health
pub async fn health() -> Json<Health> {
    Json(Health { ok: true })
}

/// GET /stats
pub async fn stats(State(broker): State<Arc<QueryBroker>>) -> Json<BrokerStats> {
    Json(broker.stats())
}
