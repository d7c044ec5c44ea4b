use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::LlmConfig;
use crate::errors::{QueryError, classify_llm_failure};
use crate::llm::{ChatMessage, ChatTransport};
use crate::models::query::GeneratedSql;
use crate::models::schema::SchemaSnapshot;
use crate::observability::MetricsRegistry;

const SYSTEM_PROMPT: &str = "You translate natural-language questions into PostgreSQL. \
Respond with exactly one read-only SELECT statement (CTEs are allowed) and nothing else: \
no explanation, no markdown. Use only tables and columns from the provided schema. \
Never write data-modifying statements.";

/// Turns (question, schema) into one candidate SQL statement via a single
/// LLM round-trip.
pub struct SqlGenerator {
    transport: Arc<dyn ChatTransport>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl SqlGenerator {
    pub fn new(
        config: &LlmConfig,
        transport: Arc<dyn ChatTransport>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            timeout: config.timeout(),
            metrics,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
    ) -> Result<GeneratedSql, QueryError> {
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Database schema:\n\n{}\nQuestion: {}\n\nSQL:",
                schema.prompt_context(),
                question
            )),
        ];

        self.metrics.record_llm_call("generate_sql");
        let started = Instant::now();
        let completion =
            match tokio::time::timeout(self.timeout, self.transport.complete(&messages)).await {
                Err(_) => {
                    return Err(QueryError::LlmTimeout {
                        timeout: self.timeout,
                    });
                }
                Ok(Err(err)) => return Err(classify_llm_failure("SQL generation", err)),
                Ok(Ok(completion)) => completion,
            };
        self.metrics
            .observe_llm_latency("generate_sql", started.elapsed().as_secs_f64());

        let tokens_used = completion.total_tokens();
        self.metrics.record_llm_tokens("generate_sql", tokens_used);

        let choice = completion.choices.first().ok_or_else(|| {
            QueryError::Llm("SQL generation returned an empty response".to_string())
        })?;
        let content = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                QueryError::Llm("SQL generation returned empty message content".to_string())
            })?;

        let sql = strip_code_fences(content).trim().to_string();
        debug!("generated SQL ({} tokens): {}", tokens_used, sql);
        Ok(GeneratedSql { sql, tokens_used })
    }
}

/// Models occasionally wrap SQL in a markdown fence despite instructions;
/// unwrap it, leave everything else verbatim.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("sql").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
