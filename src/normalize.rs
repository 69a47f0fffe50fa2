use crate::engine::ExecutionResult;

pub const OUTPUT_TRUNCATED: &str = "\n... (output truncated)";
pub const ERROR_TRUNCATED: &str = "\n... (error output truncated)";

/// Turns captured bytes into an [`ExecutionResult`]
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_output_length: usize,
}

impl Normalizer {
    pub fn new(max_output_length: usize) -> Self {
        Self { max_output_length }
    }

    pub fn normalize(
        &self,
        stdout: &[u8],
        stderr: &[u8],
        return_code: Option<i32>,
    ) -> ExecutionResult {
        let stdout = truncate(
            String::from_utf8_lossy(stdout).into_owned(),
            self.max_output_length,
            OUTPUT_TRUNCATED,
        );
        let stderr = truncate(
            String::from_utf8_lossy(stderr).into_owned(),
            self.max_output_length,
            ERROR_TRUNCATED,
        );

        let success = return_code == Some(0);
        let error = if success {
            None
        } else if stderr.is_empty() {
            Some(match return_code {
                Some(code) if code < 0 => format!("Process terminated by signal {}", -code),
                Some(code) => format!("Process exited with code: {code}"),
                None => "Process terminated by a signal".to_string(),
            })
        } else {
            Some(stderr.clone())
        };

        ExecutionResult {
            success,
            stdout,
            stderr,
            return_code,
            error,
        }
    }
}

/// Cuts `text` to `limit` characters and appends `marker`
///
/// Applying it again with the same limit and marker returns the same string,
/// because the first `limit` characters are unchanged by the first cut.
pub fn truncate(text: String, limit: usize, marker: &str) -> String {
    match text.char_indices().nth(limit) {
        None => text,
        Some((cut, _)) => {
            if text[cut..] == *marker {
                return text;
            }
            log::debug!("Output truncated due to length");
            let mut truncated = text;
            truncated.truncate(cut);
            truncated.push_str(marker);
            truncated
        }
    }
}
