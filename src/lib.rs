pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod normalize;
pub mod probe;
pub mod sandbox;
pub mod validator;
pub mod workspace;

pub use engine::{Engine, ExecutionReport, ExecutionResult};
pub use error::{ConfigError, EngineError};

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
