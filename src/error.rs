use thiserror::Error;

use crate::validator::Rejection;

/// Everything that can stop a snippet before it produces a normal result
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unsupported language: {language}. Supported: {supported}")]
    UnsupportedLanguage { language: String, supported: String },

    #[error("Invalid code input")]
    InvalidInput,

    #[error("Code rejected for security reasons: {0}")]
    Rejected(Rejection),

    #[error("Failed to create temporary file: {0}")]
    Staging(#[source] std::io::Error),

    #[error("{}", spawn_message(.interpreter, .source))]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to supervise process: {0}")]
    Supervision(#[source] std::io::Error),
}

fn spawn_message(interpreter: &str, source: &std::io::Error) -> String {
    match source.kind() {
        std::io::ErrorKind::NotFound => format!(
            "Command not found: {interpreter}. Please ensure the interpreter is installed."
        ),
        std::io::ErrorKind::PermissionDenied => {
            format!("Permission denied executing {interpreter}: {source}")
        }
        _ => format!("OS error during execution of {interpreter}: {source}"),
    }
}

/// Problems found while turning a [`crate::config::Config`] into an engine
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Duplicate language id: {0}")]
    DuplicateLanguage(String),

    #[error("Language {0} has an empty interpreter command")]
    EmptyCommand(String),

    #[error("Execution timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Maximum code length must be greater than zero")]
    ZeroCodeLength,
}
