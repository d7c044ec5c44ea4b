use std::time::Duration;

use thiserror::Error;

use crate::models::query::RejectionReason;

/// Every way a query request can fail. The orchestrator matches on the
/// variant, not on whatever the transport or pool threw underneath.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("LLM call timed out after {:.1}s", .timeout.as_secs_f64())]
    LlmTimeout { timeout: Duration },

    #[error("LLM service unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("security violation ({}): {message}", .reason.as_str())]
    SecurityViolation {
        reason: RejectionReason,
        message: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid question: {0}")]
    InvalidQuestion(String),
}

impl QueryError {
    /// Stable machine-readable label surfaced in `QueryResponse.error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::LlmTimeout { .. } => "llm_timeout",
            QueryError::LlmUnavailable(_) => "llm_unavailable",
            QueryError::Llm(_) => "llm_error",
            QueryError::SecurityViolation { .. } => "security_violation",
            QueryError::Database(_) => "database_error",
            QueryError::InvalidQuestion(_) => "invalid_question",
        }
    }
}

/// Map a failed transport call to a typed error by matching known message
/// signatures. Signature-based on purpose: any transport can plug in, we
/// never downcast to a transport-specific error type.
pub fn classify_llm_failure(context: &str, err: anyhow::Error) -> QueryError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();

    if lower.contains("authentication")
        || lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthorized")
    {
        QueryError::LlmUnavailable(format!("{context}: authentication failed: {msg}"))
    } else if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("429")
        || lower.contains("quota")
    {
        QueryError::LlmUnavailable(format!("{context}: rate limit exceeded: {msg}"))
    } else {
        QueryError::Llm(format!("{context} failed: {msg}"))
    }
}
