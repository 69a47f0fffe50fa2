use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

const FILE_PREFIX: &str = "sniprun-";

/// Creates the on-disk copies of snippets
///
/// The manager keeps no record of what it staged; every [`StagedFile`] owns
/// its path and removes it when released or dropped.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Writes `code` into a uniquely named file ending in `extension`
    pub fn stage(&self, code: &str, extension: &str) -> Result<StagedFile, EngineError> {
        let mut file = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(extension)
            .tempfile_in(&self.dir)
            .map_err(EngineError::Staging)?;

        // On error the partially written file is removed when `file` drops
        file.write_all(code.as_bytes())
            .and_then(|_| file.flush())
            .map_err(EngineError::Staging)?;

        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| EngineError::Staging(e.error))?;
        let path = fs::canonicalize(&path).unwrap_or(path);

        log::debug!("Created temp file: {}", path.display());
        Ok(StagedFile {
            path,
            released: false,
        })
    }
}

/// A staged snippet, removed exactly once
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file. Safe to call more than once; a file that is already
    /// gone is only worth a warning.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Cleaned up temp file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Temp file {} was already gone", self.path.display());
            }
            Err(e) => {
                log::warn!("Failed to cleanup temp file {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.release();
    }
}
