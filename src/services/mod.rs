pub mod orchestrator;
pub mod result_validator;
pub mod sql_generator;
pub mod sql_guard;
