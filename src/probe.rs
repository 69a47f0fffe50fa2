use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::create_timestamp;
use crate::language::LanguageRegistry;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether one language's interpreter can be started
#[derive(Serialize, Debug, Clone)]
pub struct InterpreterStatus {
    pub language: String,
    pub interpreter: String,
    pub available: bool,
    /// First line printed by `--version`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: String,
}

/// Runs `<interpreter> --version` for every registered language
pub async fn probe_interpreters(
    registry: &LanguageRegistry,
    timeout: Duration,
) -> Vec<InterpreterStatus> {
    let mut statuses = Vec::new();

    for profile in registry.profiles() {
        let interpreter = profile.interpreter().to_string();
        let (version, error) = match probe(&interpreter, timeout).await {
            Ok(version) => {
                log::info!("{} interpreter ({interpreter}): {version}", profile.id);
                (Some(version), None)
            }
            Err(reason) => {
                log::warn!(
                    "{} interpreter ({interpreter}) may not be available: {reason}",
                    profile.id
                );
                (None, Some(reason))
            }
        };

        statuses.push(InterpreterStatus {
            language: profile.id.clone(),
            interpreter,
            available: version.is_some(),
            version,
            error,
            checked_at: create_timestamp(),
        });
    }

    statuses
}

async fn probe(interpreter: &str, timeout: Duration) -> Result<String, String> {
    let output = Command::new(interpreter)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("no answer within {} seconds", timeout.as_secs())),
    };

    if !output.status.success() {
        return Err(format!("version check exited with {}", output.status));
    }

    // Some interpreters print their version on stderr
    let text = if output.stdout.iter().all(u8::is_ascii_whitespace) {
        String::from_utf8_lossy(&output.stderr)
    } else {
        String::from_utf8_lossy(&output.stdout)
    };
    Ok(text.lines().next().unwrap_or("Available").trim().to_string())
}
