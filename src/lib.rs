//! askdb: the orchestration core of a natural-language query service for
//! PostgreSQL. A question goes through SQL generation (LLM), a read-only
//! safety policy, execution against an injected executor, and a second
//! LLM call that grades how well the result answers the question.
//!
//! The database pool, schema introspection, LLM HTTP transport and metrics
//! exporter are collaborators behind traits; this crate owns the pipeline,
//! the safety policy and the error taxonomy.

pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod models;
pub mod observability;
pub mod schema_cache;
pub mod services;

pub use config::AskdbConfig;
pub use errors::QueryError;
pub use models::query::QueryResponse;
pub use services::orchestrator::QueryOrchestrator;
