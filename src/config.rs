use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AskdbConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Deadline for one LLM round-trip, measured from call start.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// A result is acceptable iff its confidence reaches this bound (0-100).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,

    /// Row cap for the grading prompt; later rows are never serialized.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Extra function names to deny on top of the built-in list.
    #[serde(default)]
    pub blocked_functions: Vec<String>,

    /// Extra table names (bare or schema-qualified) to deny.
    #[serde(default)]
    pub blocked_tables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Question length cap, counted in characters.
    #[serde(default = "default_max_question_length")]
    pub max_question_length: usize,

    #[serde(default = "default_db_timeout")]
    pub db_timeout_seconds: f64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_timeout() -> f64 {
    30.0
}
fn default_true() -> bool {
    true
}
fn default_confidence_threshold() -> u8 {
    70
}
fn default_sample_rows() -> usize {
    10
}
fn default_max_question_length() -> usize {
    2000
}
fn default_db_timeout() -> f64 {
    30.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            sample_rows: default_sample_rows(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_functions: Vec::new(),
            blocked_tables: Vec::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_question_length: default_max_question_length(),
            db_timeout_seconds: default_db_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

impl LimitsConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.db_timeout_seconds)
    }
}

impl AskdbConfig {
    /// Load `askdb.toml` from the given directory, falling back to defaults
    /// when the file does not exist. Missing sections keep their defaults.
    pub async fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let config_path = dir.as_ref().join("askdb.toml");
        if !config_path.exists() {
            info!("No askdb.toml found, using default configuration.");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: AskdbConfig = toml::from_str(&content)?;
        info!(
            "Loaded config: model={}, validation={}, threshold={}, sample_rows={}",
            config.llm.model,
            config.validation.enabled,
            config.validation.confidence_threshold,
            config.validation.sample_rows
        );
        Ok(config)
    }
}
