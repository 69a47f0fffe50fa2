use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::language::LanguageRegistry;
use crate::normalize::Normalizer;
use crate::sandbox::{Outcome, ProcessTable, Supervisor, SystemProcessTable};
use crate::validator::{Rejection, SafetyValidator};
use crate::workspace::Workspace;

static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Final result of one snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Absent when no exit code exists: rejected, never spawned, or killed
    pub return_code: Option<i32>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A result without any program output
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            error: Some(error.into()),
        }
    }

    /// The single stream shown to users: stdout on success, stderr otherwise
    pub fn output(&self) -> &str {
        if self.success {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    pub fn to_report(&self) -> ExecutionReport {
        ExecutionReport {
            success: self.success,
            output: self.output().to_string(),
            error: self.error.clone().unwrap_or_default(),
            return_code: self.return_code,
        }
    }
}

/// Serialized form of an [`ExecutionResult`] handed to callers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub success: bool,
    pub output: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub return_code: Option<i32>,
}

/// Steps one execution goes through; `Cleaned` is always last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Validated,
    Staged,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    SpawnFailed,
    Cleaned,
}

impl ExecutionPhase {
    pub fn can_advance_to(self, next: Self) -> bool {
        use ExecutionPhase::*;

        matches!(
            (self, next),
            (Validated, Staged)
                | (Validated, Cleaned)
                | (Staged, Running)
                | (Staged, SpawnFailed)
                | (Staged, Cleaned)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Cancelled)
                | (Running, Cleaned)
                | (Completed, Cleaned)
                | (TimedOut, Cleaned)
                | (Cancelled, Cleaned)
                | (SpawnFailed, Cleaned)
        )
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Tracker {
    id: u64,
    phase: ExecutionPhase,
}

impl Tracker {
    fn advance(&mut self, next: ExecutionPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.phase
        );
        log::debug!("Execution {}: {} -> {next}", self.id, self.phase);
        self.phase = next;
    }
}

/// Runs untrusted snippets: validate, stage, supervise, normalize, clean up
///
/// Calls are independent of each other and the engine holds no mutable
/// state, so one engine can be shared across tasks. Nothing limits how many
/// executions run at once; callers that need a cap must add it themselves.
pub struct Engine<T: ProcessTable = SystemProcessTable> {
    registry: LanguageRegistry,
    validator: SafetyValidator,
    workspace: Workspace,
    supervisor: Supervisor<T>,
    normalizer: Normalizer,
}

impl Engine<SystemProcessTable> {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_supervisor(config, Supervisor::new(&config.limits))
    }
}

impl<T: ProcessTable> Engine<T> {
    pub fn with_supervisor(
        config: &Config,
        supervisor: Supervisor<T>,
    ) -> Result<Self, ConfigError> {
        let limits = &config.limits;
        if limits.timeout.0 == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if limits.max_code_length == 0 {
            return Err(ConfigError::ZeroCodeLength);
        }

        Ok(Self {
            registry: LanguageRegistry::build(&config.languages)?,
            validator: SafetyValidator::new(limits.max_code_length, &config.forbidden_patterns),
            workspace: Workspace::new(limits.temp_dir.clone()),
            supervisor,
            normalizer: Normalizer::new(limits.max_output_length),
        })
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Runs `code` as `language` and always produces a result
    pub async fn execute(&self, code: &str, language: &str) -> ExecutionResult {
        self.execute_with_cancel(code, language, &CancellationToken::new()).await
    }

    /// Like [`Engine::execute`], but `cancel` tears the run down early
    pub async fn execute_with_cancel(
        &self,
        code: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.try_execute(code, language, cancel)
            .await
            .unwrap_or_else(|e| ExecutionResult::failed(e.to_string()))
    }

    pub async fn try_execute(
        &self,
        code: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let id = EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let language = language.trim().to_lowercase();
        log::info!("Starting code execution {id} - Language: {language}");

        let Some(profile) = self.registry.resolve(&language) else {
            log::warn!("Execution {id}: unsupported language {language}");
            return Err(EngineError::UnsupportedLanguage {
                language,
                supported: self.registry.supported(),
            });
        };

        match self.validator.validate(code) {
            Ok(()) => {}
            Err(Rejection::Empty) => {
                log::warn!("Execution {id}: invalid code input");
                return Err(EngineError::InvalidInput);
            }
            Err(rejection) => {
                log::warn!("Execution {id}: code rejected: {rejection}");
                return Err(EngineError::Rejected(rejection));
            }
        }

        let mut tracker = Tracker {
            id,
            phase: ExecutionPhase::Validated,
        };

        let mut staged = match self.workspace.stage(code, &profile.file_extension) {
            Ok(staged) => staged,
            Err(e) => {
                log::error!("Execution {id}: {e}");
                tracker.advance(ExecutionPhase::Cleaned);
                return Err(e);
            }
        };
        tracker.advance(ExecutionPhase::Staged);

        let started = Instant::now();
        let outcome = self
            .supervisor
            .run(&profile.interpreter_command, staged.path(), cancel)
            .await;

        let result = match outcome {
            Ok(Outcome::Completed(raw)) => {
                tracker.advance(ExecutionPhase::Running);
                tracker.advance(ExecutionPhase::Completed);
                let result = self
                    .normalizer
                    .normalize(&raw.stdout, &raw.stderr, raw.return_code);
                let status = if result.success { "SUCCESS" } else { "FAILED" };
                log::info!(
                    "Execution {id}: {status} - Return code: {:?} in {:.2?}",
                    result.return_code,
                    started.elapsed()
                );
                Ok(result)
            }
            Ok(Outcome::TimedOut) => {
                tracker.advance(ExecutionPhase::Running);
                tracker.advance(ExecutionPhase::TimedOut);
                log::info!("Execution {id}: timed out after {:.2?}", started.elapsed());
                Ok(ExecutionResult::failed(format!(
                    "Execution timed out after {} seconds",
                    format_seconds(self.supervisor.timeout())
                )))
            }
            Ok(Outcome::Cancelled) => {
                tracker.advance(ExecutionPhase::Running);
                tracker.advance(ExecutionPhase::Cancelled);
                Ok(ExecutionResult::failed("Execution cancelled"))
            }
            Err(e @ EngineError::Spawn { .. }) => {
                tracker.advance(ExecutionPhase::SpawnFailed);
                log::error!("Execution {id}: {e}");
                Err(e)
            }
            Err(e) => {
                tracker.advance(ExecutionPhase::Running);
                log::error!("Execution {id}: {e}");
                Err(e)
            }
        };

        staged.release();
        tracker.advance(ExecutionPhase::Cleaned);
        result
    }
}

fn format_seconds(duration: std::time::Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}
