use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::errors::{QueryError, classify_llm_failure};
use crate::llm::{ChatMessage, ChatTransport};
use crate::models::query::ResultValidationResult;
use crate::observability::MetricsRegistry;

const SYSTEM_PROMPT: &str = "You grade how well a SQL query result answers a user's question. \
Respond with a single JSON object: {\"confidence\": <0-100 integer>, \
\"explanation\": \"<one or two sentences>\", \"suggestion\": \"<improvement or null>\"}. \
Respond with JSON only.";

/// Confidence used when the grading response is present but not valid JSON.
const PARSE_FALLBACK_CONFIDENCE: u8 = 60;
/// Confidence used when the JSON parses but `confidence` is missing or
/// not a number.
const MISSING_CONFIDENCE_DEFAULT: u8 = 50;

/// Result of one grading round-trip, with the tokens it cost.
#[derive(Debug, Clone)]
pub struct GradedResult {
    pub result: ResultValidationResult,
    pub tokens_used: u64,
}

/// Grades (question, SQL, sampled rows) with a second LLM call. Malformed
/// grading output degrades to a fixed moderate result instead of failing
/// the request; transport failures surface as typed errors.
pub struct ResultValidator {
    transport: Arc<dyn ChatTransport>,
    config: ValidationConfig,
    metrics: Arc<MetricsRegistry>,
}

impl ResultValidator {
    pub fn new(
        config: &ValidationConfig,
        transport: Arc<dyn ChatTransport>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            config: config.clone(),
            metrics,
        }
    }

    pub async fn validate(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
        row_count: usize,
    ) -> Result<GradedResult, QueryError> {
        if !self.config.enabled {
            return Ok(GradedResult {
                result: ResultValidationResult {
                    confidence: 100,
                    is_acceptable: true,
                    explanation: "Result validation is disabled; the result was not graded."
                        .to_string(),
                    suggestion: None,
                },
                tokens_used: 0,
            });
        }

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.build_prompt(question, sql, rows, row_count)),
        ];

        self.metrics.record_llm_call("validate_result");
        let started = Instant::now();
        let timeout = self.config.timeout();
        let completion = match tokio::time::timeout(timeout, self.transport.complete(&messages))
            .await
        {
            Err(_) => return Err(QueryError::LlmTimeout { timeout }),
            Ok(Err(err)) => return Err(classify_llm_failure("result validation", err)),
            Ok(Ok(completion)) => completion,
        };
        self.metrics
            .observe_llm_latency("validate_result", started.elapsed().as_secs_f64());

        let tokens_used = completion.total_tokens();
        self.metrics.record_llm_tokens("validate_result", tokens_used);

        let choice = completion.choices.first().ok_or_else(|| {
            QueryError::Llm("result validation returned an empty response".to_string())
        })?;
        let content = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                QueryError::Llm("result validation returned empty message content".to_string())
            })?;

        Ok(GradedResult {
            result: self.decode_grading(content),
            tokens_used,
        })
    }

    fn build_prompt(&self, question: &str, sql: &str, rows: &[Value], row_count: usize) -> String {
        // Only the leading sample rows ever reach the prompt; later rows
        // must not leak in regardless of result size.
        let sample = &rows[..rows.len().min(self.config.sample_rows)];
        let rows_json =
            serde_json::to_string_pretty(sample).unwrap_or_else(|_| "[]".to_string());
        let sample_note = if row_count > sample.len() {
            format!(" (showing {} of {} rows)", sample.len(), row_count)
        } else {
            String::new()
        };
        debug!(
            "grading {} of {} rows for question: {}",
            sample.len(),
            row_count,
            question
        );
        format!(
            "Question: {question}\n\nSQL:\n{sql}\n\nResult{sample_note}:\n{rows_json}\n\n\
             Row count: {row_count}"
        )
    }

    /// Strict decode with per-field fallbacks. Non-JSON content is a soft
    /// degradation: a wrong grade must not discard a correct query result.
    fn decode_grading(&self, content: &str) -> ResultValidationResult {
        let parsed: Value = match serde_json::from_str(content) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                warn!("grading response was not valid JSON, using fallback confidence");
                return ResultValidationResult {
                    confidence: PARSE_FALLBACK_CONFIDENCE,
                    is_acceptable: false,
                    explanation:
                        "Validation response parsing failed; treating the result as unverified."
                            .to_string(),
                    suggestion: None,
                };
            }
        };

        let confidence = coerce_confidence(parsed.get("confidence"));
        let explanation = parsed
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or("No explanation provided.")
            .to_string();
        let suggestion = parsed
            .get("suggestion")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        // Acceptability is always recomputed locally against the configured
        // threshold, never taken from the model's own judgment.
        ResultValidationResult {
            confidence,
            is_acceptable: confidence >= self.config.confidence_threshold,
            explanation,
            suggestion,
        }
    }
}

fn coerce_confidence(value: Option<&Value>) -> u8 {
    match value.and_then(Value::as_f64) {
        Some(n) => n.clamp(0.0, 100.0).round() as u8,
        None => MISSING_CONFIDENCE_DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm::{ChatChoice, ChatChoiceMessage, ChatCompletion, TokenUsage};

    struct ScriptedTransport {
        replies: Mutex<Vec<anyhow::Result<ChatCompletion>>>,
        last_messages: Mutex<Option<Vec<ChatMessage>>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<anyhow::Result<ChatCompletion>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                last_messages: Mutex::new(None),
                delay: None,
            }
        }

        fn last_user_prompt(&self) -> String {
            self.last_messages
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|m| m.iter().find(|msg| msg.role == "user").cloned())
                .map(|m| m.content)
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<ChatCompletion> {
            *self.last_messages.lock().unwrap() = Some(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn grading(confidence: Value, explanation: &str, suggestion: Value) -> ChatCompletion {
        let body = json!({
            "confidence": confidence,
            "explanation": explanation,
            "suggestion": suggestion,
        });
        content_completion(&body.to_string())
    }

    fn content_completion(content: &str) -> ChatCompletion {
        ChatCompletion {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage {
                    content: Some(content.to_string()),
                },
            }],
            usage: Some(TokenUsage { total_tokens: 20 }),
        }
    }

    fn validator_with(
        config: ValidationConfig,
        transport: Arc<ScriptedTransport>,
    ) -> ResultValidator {
        ResultValidator::new(&config, transport, Arc::new(MetricsRegistry::new()))
    }

    fn enabled_config() -> ValidationConfig {
        ValidationConfig {
            enabled: true,
            confidence_threshold: 70,
            ..ValidationConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_validation_skips_the_transport_entirely() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let config = ValidationConfig {
            enabled: false,
            ..ValidationConfig::default()
        };
        let validator = validator_with(config, transport.clone());

        let graded = validator
            .validate(
                "How many users?",
                "SELECT COUNT(*) FROM users",
                &[json!({"count": 42})],
                1,
            )
            .await
            .unwrap();

        assert_eq!(graded.result.confidence, 100);
        assert!(graded.result.is_acceptable);
        assert!(graded.result.explanation.to_lowercase().contains("disabled"));
        assert!(graded.result.suggestion.is_none());
        assert_eq!(graded.tokens_used, 0);
        assert!(transport.last_messages.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn high_confidence_is_acceptable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!(95),
            "Query correctly counts all users",
            Value::Null,
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let graded = validator
            .validate(
                "How many users?",
                "SELECT COUNT(*) FROM users",
                &[json!({"count": 42})],
                1,
            )
            .await
            .unwrap();

        assert_eq!(graded.result.confidence, 95);
        assert!(graded.result.is_acceptable);
        assert!(graded.result.explanation.contains("correctly counts"));
        assert!(graded.result.suggestion.is_none());
        assert_eq!(graded.tokens_used, 20);
    }

    #[tokio::test]
    async fn suggestion_passes_through() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!(75),
            "Results match but query could be optimized",
            json!("Add index on created_at column"),
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let graded = validator
            .validate("Recent users", "SELECT * FROM users", &[json!({"id": 1})], 1)
            .await
            .unwrap();

        assert_eq!(graded.result.confidence, 75);
        assert!(graded.result.is_acceptable);
        assert_eq!(
            graded.result.suggestion.as_deref(),
            Some("Add index on created_at column")
        );
    }

    #[tokio::test]
    async fn low_confidence_is_unacceptable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!(45),
            "Query does not match the question intent",
            json!("Use WHERE clause to filter active users"),
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let graded = validator
            .validate(
                "How many active users?",
                "SELECT COUNT(*) FROM users",
                &[json!({"count": 100})],
                1,
            )
            .await
            .unwrap();

        assert_eq!(graded.result.confidence, 45);
        assert!(!graded.result.is_acceptable);
        assert!(graded.result.suggestion.is_some());
    }

    #[tokio::test]
    async fn acceptability_is_recomputed_against_threshold() {
        // Threshold 80: a grade of 75 is unacceptable no matter what the
        // model itself claimed.
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(content_completion(
            r#"{"confidence": 75, "explanation": "ok", "suggestion": null, "is_acceptable": true}"#,
        ))]));
        let config = ValidationConfig {
            enabled: true,
            confidence_threshold: 80,
            ..ValidationConfig::default()
        };
        let validator = validator_with(config, transport);

        let graded = validator
            .validate("q", "SELECT 1", &[json!({"v": 1})], 1)
            .await
            .unwrap();
        assert_eq!(graded.result.confidence, 75);
        assert!(!graded.result.is_acceptable);
    }

    #[tokio::test]
    async fn large_result_sets_are_sampled() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!(90),
            "Results match the query",
            Value::Null,
        ))]));
        let config = ValidationConfig {
            enabled: true,
            sample_rows: 5,
            ..ValidationConfig::default()
        };
        let validator = validator_with(config, transport.clone());

        let rows: Vec<Value> = (0..100)
            .map(|i| json!({"id": i, "name": format!("User {i}")}))
            .collect();
        validator
            .validate("List all users", "SELECT * FROM users", &rows, 100)
            .await
            .unwrap();

        let prompt = transport.last_user_prompt();
        assert!(prompt.contains("User 0"));
        assert!(prompt.contains("User 4"));
        assert!(!prompt.contains("User 50"));
        assert!(!prompt.contains("User 5\""));
        assert!(prompt.contains("showing 5 of 100 rows"));
    }

    #[tokio::test]
    async fn small_result_sets_have_no_sampling_note() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!(90),
            "fine",
            Value::Null,
        ))]));
        let validator = validator_with(enabled_config(), transport.clone());

        validator
            .validate("q", "SELECT 1", &[json!({"v": 1})], 1)
            .await
            .unwrap();
        assert!(!transport.last_user_prompt().contains("showing"));
    }

    #[tokio::test]
    async fn empty_response_is_a_hard_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ChatCompletion {
            choices: vec![],
            usage: None,
        })]));
        let validator = validator_with(enabled_config(), transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::Llm(msg) => assert!(msg.contains("empty response")),
            other => panic!("expected Llm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_content_is_a_hard_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ChatCompletion {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage { content: None },
            }],
            usage: None,
        })]));
        let validator = validator_with(enabled_config(), transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::Llm(msg) => assert!(msg.contains("empty message content")),
            other => panic!("expected Llm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_moderate_confidence() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(content_completion(
            "Invalid JSON {not valid}",
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let graded = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap();

        assert_eq!(graded.result.confidence, 60);
        assert!(!graded.result.is_acceptable);
        assert!(
            graded
                .result
                .explanation
                .to_lowercase()
                .contains("parsing failed")
        );
    }

    #[tokio::test]
    async fn non_object_json_also_degrades() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(content_completion("42"))]));
        let validator = validator_with(enabled_config(), transport);

        let graded = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap();
        assert_eq!(graded.result.confidence, 60);
        assert!(!graded.result.is_acceptable);
    }

    #[tokio::test]
    async fn timeout_carries_configured_value() {
        let transport = Arc::new(ScriptedTransport {
            replies: Mutex::new(vec![Ok(grading(json!(90), "ok", Value::Null))]),
            last_messages: Mutex::new(None),
            delay: Some(Duration::from_millis(100)),
        });
        let config = ValidationConfig {
            enabled: true,
            timeout_seconds: 0.01,
            ..ValidationConfig::default()
        };
        let validator = validator_with(config, transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::LlmTimeout { timeout } => {
                assert_eq!(timeout, Duration::from_secs_f64(0.01));
            }
            other => panic!("expected LlmTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn authentication_failure_is_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "Authentication failed - invalid api_key"
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::LlmUnavailable(msg) => assert!(msg.contains("authentication failed")),
            other => panic!("expected LlmUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "Rate_limit exceeded"
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::LlmUnavailable(msg) => assert!(msg.contains("rate limit exceeded")),
            other => panic!("expected LlmUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn generic_failure_is_an_llm_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "Some unexpected error"
        ))]));
        let validator = validator_with(enabled_config(), transport);

        let err = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap_err();
        match err {
            QueryError::Llm(msg) => assert!(msg.contains("result validation failed")),
            other => panic!("expected Llm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn out_of_bounds_confidence_is_clamped() {
        for (reported, expected) in [(json!(150), 100u8), (json!(-10), 0u8)] {
            let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
                reported,
                "Test",
                Value::Null,
            ))]));
            let validator = validator_with(enabled_config(), transport);
            let graded = validator
                .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
                .await
                .unwrap();
            assert_eq!(graded.result.confidence, expected);
        }
    }

    #[tokio::test]
    async fn non_numeric_confidence_defaults_to_50() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(grading(
            json!("not_a_number"),
            "Test",
            Value::Null,
        ))]));
        let validator = validator_with(enabled_config(), transport);
        let graded = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap();
        assert_eq!(graded.result.confidence, 50);
    }

    #[tokio::test]
    async fn missing_confidence_defaults_to_50() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(content_completion(
            r#"{"explanation": "Test", "suggestion": null}"#,
        ))]));
        let validator = validator_with(enabled_config(), transport);
        let graded = validator
            .validate("Test", "SELECT 1", &[json!({"value": 1})], 1)
            .await
            .unwrap();
        assert_eq!(graded.result.confidence, 50);
        assert!(!graded.result.is_acceptable);
    }
}
