//! Running persisted fix scripts.

use super::ScriptLanguage;
use crate::error::{MendError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a script that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes a persisted fix script.
///
/// Implementations must return [`MendError::FixTimeout`] when the script
/// outlives `timeout`, and [`MendError::FixScript`] on a non-zero exit.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(
        &self,
        path: &str,
        language: ScriptLanguage,
        timeout: Duration,
    ) -> Result<ScriptOutput>;
}

/// Runs scripts as child processes of the current process.
#[derive(Debug, Clone, Default)]
pub struct ProcessScriptRunner {
    working_dir: Option<PathBuf>,
}

impl ProcessScriptRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ScriptRunner for ProcessScriptRunner {
    async fn run(
        &self,
        path: &str,
        language: ScriptLanguage,
        timeout: Duration,
    ) -> Result<ScriptOutput> {
        let interpreter =
            which::which(language.interpreter()).map_err(|_| MendError::MissingInterpreter {
                interpreter: language.interpreter().to_string(),
            })?;

        let mut command = Command::new(interpreter);
        command
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(%path, interpreter = language.interpreter(), "Running fix script");
        let child = command.spawn()?;

        // Dropping the pending future on timeout kills the child
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_elapsed) => {
                return Err(MendError::FixTimeout {
                    path: path.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(MendError::FixScript {
                path: path.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(ScriptOutput { stdout, stderr })
    }
}
