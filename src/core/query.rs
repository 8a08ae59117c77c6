//! Query, result, and correlation key types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a query at ingress.
pub type QueryId = u64;

/// A prompt accepted for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Broker-assigned identifier.
    pub id: QueryId,
    /// Prompt forwarded to the model.
    pub prompt: String,
}

/// Outcome of processing a query.
///
/// `text` holds either the model answer or a formatted error message; both are
/// delivered to the caller the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Identifier of the originating query.
    pub id: QueryId,
    /// Model answer or error description.
    pub text: String,
}

/// Lookup key matching a result to its originating query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    const NAMESPACE: &'static str = "query_result";

    /// Derive the key for a query identifier.
    #[must_use]
    pub fn for_query(id: QueryId) -> Self {
        Self(format!("{}:{id}", Self::NAMESPACE))
    }

    /// Borrow the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<QueryId> for CorrelationKey {
    fn from(id: QueryId) -> Self {
        Self::for_query(id)
    }
}
