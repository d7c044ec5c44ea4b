use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::QueryError;

/// Why the safety policy rejected a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    DdlDetected,
    BlockedFunction,
    BlockedTable,
    MultipleStatements,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::DdlDetected => "ddl_detected",
            RejectionReason::BlockedFunction => "blocked_function",
            RejectionReason::BlockedTable => "blocked_table",
            RejectionReason::MultipleStatements => "multiple_statements",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            RejectionReason::DdlDetected => {
                "only read-only SELECT statements are allowed"
            }
            RejectionReason::BlockedFunction => "statement invokes a blocked function",
            RejectionReason::BlockedTable => "statement references a blocked table",
            RejectionReason::MultipleStatements => {
                "multiple statements are not allowed"
            }
        }
    }
}

/// Accept/reject decision from the lexical safety classification.
/// Acceptance is policy compliance only, not semantic correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub accepted: bool,
    pub reason: Option<RejectionReason>,
}

impl SafetyVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: RejectionReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

/// One candidate statement from the generation call. Never mutated.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub tokens_used: u64,
}

/// Rows returned by the executor. Rows are JSON objects keyed by column
/// name, in the order the database produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub execution_time: Duration,
}

/// Graded relevance of a query result, from the validation call or a
/// deterministic fallback. Confidence is always within 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultValidationResult {
    pub confidence: u8,
    pub is_acceptable: bool,
    pub explanation: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// Terminal artifact of one request. Exactly one per request, immutable
/// once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub generated_sql: Option<String>,
    pub data: Option<QueryResult>,
    pub confidence: Option<u8>,
    pub tokens_used: u64,
    pub error: Option<ErrorDetail>,
}

impl QueryResponse {
    pub fn failure(err: &QueryError, generated_sql: Option<String>, tokens_used: u64) -> Self {
        Self {
            success: false,
            generated_sql,
            data: None,
            confidence: None,
            tokens_used,
            error: Some(ErrorDetail {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}
