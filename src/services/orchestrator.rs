use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AskdbConfig, LimitsConfig};
use crate::db::SqlExecutor;
use crate::errors::QueryError;
use crate::llm::ChatTransport;
use crate::models::query::QueryResponse;
use crate::observability::MetricsRegistry;
use crate::schema_cache::SchemaCache;
use crate::services::result_validator::ResultValidator;
use crate::services::sql_generator::SqlGenerator;
use crate::services::sql_guard::SqlGuard;

/// Sequences one request through GENERATE -> SAFETY_CHECK -> EXECUTE ->
/// RESULT_VALIDATE and folds every outcome into exactly one terminal
/// `QueryResponse`. The first failing stage short-circuits; nothing needs
/// rolling back because only read-only SELECTs ever execute.
pub struct QueryOrchestrator {
    database: String,
    generator: SqlGenerator,
    guard: SqlGuard,
    validator: ResultValidator,
    validation_enabled: bool,
    executor: Arc<dyn SqlExecutor>,
    schema_cache: Arc<dyn SchemaCache>,
    metrics: Arc<MetricsRegistry>,
    limits: LimitsConfig,
}

impl QueryOrchestrator {
    pub fn new(
        config: &AskdbConfig,
        database: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        schema_cache: Arc<dyn SchemaCache>,
        executor: Arc<dyn SqlExecutor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            database: database.into(),
            generator: SqlGenerator::new(&config.llm, transport.clone(), metrics.clone()),
            guard: SqlGuard::new(&config.security),
            validator: ResultValidator::new(&config.validation, transport, metrics.clone()),
            validation_enabled: config.validation.enabled,
            executor,
            schema_cache,
            metrics,
            limits: config.limits.clone(),
        }
    }

    /// Handle one question end to end. Never returns an error: every
    /// failure becomes a terminal response with `success=false`, and
    /// exactly one status label is recorded per request.
    pub async fn handle(&self, question: &str) -> QueryResponse {
        let request_id = Uuid::new_v4();
        let question = question.trim();
        let question_chars = question.chars().count();
        info!(%request_id, "query request ({} chars)", question_chars);

        if question.is_empty() {
            let err = QueryError::InvalidQuestion("question is empty".to_string());
            return self.terminal(request_id, err, None, 0, "error");
        }
        if question_chars > self.limits.max_question_length {
            let err = QueryError::InvalidQuestion(format!(
                "question exceeds {} characters",
                self.limits.max_question_length
            ));
            return self.terminal(request_id, err, None, 0, "error");
        }

        let schema = match self.schema_cache.get(&self.database).await {
            Ok(schema) => schema,
            Err(err) => {
                let err = QueryError::Database(format!("schema lookup failed: {err}"));
                return self.terminal(request_id, err, None, 0, "error");
            }
        };
        if let Some(age) = self.schema_cache.cache_age(&self.database) {
            self.metrics
                .set_schema_cache_age(&self.database, age.as_secs_f64());
        }

        // GENERATE
        let generated = match self.generator.generate(question, &schema).await {
            Ok(generated) => generated,
            Err(err) => return self.terminal(request_id, err, None, 0, "error"),
        };
        let mut tokens_used = generated.tokens_used;

        // SAFETY_CHECK: a rejection is a security event, not an LLM or
        // database failure, and the SQL must never reach the executor.
        let verdict = self.guard.validate(&generated.sql);
        if let Some(reason) = verdict.reason {
            self.metrics.record_sql_rejected(reason.as_str());
            warn!(
                %request_id,
                reason = reason.as_str(),
                sql = %generated.sql,
                "generated SQL rejected by safety policy"
            );
            let err = QueryError::SecurityViolation {
                reason,
                message: reason.describe().to_string(),
            };
            return self.terminal(
                request_id,
                err,
                Some(generated.sql),
                tokens_used,
                "security_violation",
            );
        }

        // EXECUTE
        let started = Instant::now();
        let db_timeout = self.limits.db_timeout();
        let result = match tokio::time::timeout(db_timeout, self.executor.execute(&generated.sql))
            .await
        {
            Err(_) => {
                let err = QueryError::Database(format!(
                    "query timed out after {:.1}s",
                    db_timeout.as_secs_f64()
                ));
                return self.terminal(request_id, err, Some(generated.sql), tokens_used, "error");
            }
            Ok(Err(err)) => {
                let err = QueryError::Database(err.to_string());
                return self.terminal(request_id, err, Some(generated.sql), tokens_used, "error");
            }
            Ok(Ok(result)) => result,
        };
        self.metrics
            .observe_db_latency(started.elapsed().as_secs_f64());

        // RESULT_VALIDATE: transport errors here are fatal while validation
        // is enabled; the executed SQL and token spend stay in the response.
        let graded = match self
            .validator
            .validate(question, &generated.sql, &result.rows, result.row_count)
            .await
        {
            Ok(graded) => graded,
            Err(err) => {
                return self.terminal(
                    request_id,
                    err,
                    Some(generated.sql),
                    tokens_used,
                    "validation_failed",
                );
            }
        };
        tokens_used += graded.tokens_used;

        let status = if self.validation_enabled && !graded.result.is_acceptable {
            "validation_failed"
        } else {
            "success"
        };
        self.metrics.record_query(status, &self.database);
        info!(
            %request_id,
            rows = result.row_count,
            confidence = graded.result.confidence,
            tokens = tokens_used,
            status,
            "query completed"
        );

        QueryResponse {
            success: true,
            generated_sql: Some(generated.sql),
            data: Some(result),
            confidence: Some(graded.result.confidence),
            tokens_used,
            error: None,
        }
    }

    fn terminal(
        &self,
        request_id: Uuid,
        err: QueryError,
        generated_sql: Option<String>,
        tokens_used: u64,
        status: &str,
    ) -> QueryResponse {
        self.metrics.record_query(status, &self.database);
        warn!(%request_id, kind = err.kind(), status, "query failed: {err}");
        QueryResponse::failure(&err, generated_sql, tokens_used)
    }
}
