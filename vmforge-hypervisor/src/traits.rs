//! Seam between the orchestration logic and the VBoxManage process.

use async_trait::async_trait;

use crate::command::VBoxCommand;

/// Captured result of one VBoxManage invocation.
///
/// A nonzero exit, a spawn failure and a timeout all surface as `ok == false`
/// rather than as an error, so callers decide what a failure means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    /// The call was killed at its deadline
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            ok: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            ok: false,
            timed_out: true,
            stderr: "timed out".into(),
            ..Default::default()
        }
    }

    /// Most useful text for an error message.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        "command failed without output".to_string()
    }
}

/// Executes VBoxManage commands.
///
/// Implemented by [`crate::client::ProcessRunner`] for the real tool and by
/// [`crate::mock::MockVBoxManage`] for tests. Implementations must bound
/// every call in time and must not panic on failure.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command to completion or timeout.
    async fn run(&self, command: &VBoxCommand) -> CommandOutput;

    /// Human-readable identity of the runner (e.g. the executable path).
    fn describe(&self) -> String;
}
