//! VBoxManage client.
//!
//! [`ProcessRunner`] spawns the real executable with a deadline per command
//! class. [`VBoxManage`] wraps any [`CommandRunner`] and adds the listing
//! queries every component uses to re-validate VM state.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::command::VBoxCommand;
use crate::config::ClientSettings;
use crate::error::{HypervisorError, Result};
use crate::traits::{CommandOutput, CommandRunner};
use crate::types::VmListEntry;

/// Runs the VBoxManage executable as a child process.
pub struct ProcessRunner {
    program: PathBuf,
    settings: ClientSettings,
}

impl ProcessRunner {
    /// Use a known executable without probing it.
    pub fn new(program: impl Into<PathBuf>, settings: ClientSettings) -> Self {
        Self {
            program: program.into(),
            settings,
        }
    }

    /// Probe the configured candidates and keep the first that answers
    /// `--version`.
    #[instrument(skip(settings), fields(candidates = settings.candidates.len()))]
    pub async fn locate(settings: ClientSettings) -> Result<Self> {
        for candidate in &settings.candidates {
            let probe = Self::new(candidate.clone(), settings.clone());
            let output = probe.run(&VBoxCommand::version()).await;
            if output.ok {
                info!(
                    path = %candidate.display(),
                    version = %output.stdout.trim(),
                    "Found VBoxManage"
                );
                return Ok(probe);
            }
            debug!(path = %candidate.display(), "VBoxManage candidate did not respond");
        }

        let searched = settings
            .candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(HypervisorError::ToolNotFound { searched })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &VBoxCommand) -> CommandOutput {
        let deadline = self.settings.timeout_for(command.kind());
        debug!(command = %command, timeout_secs = deadline.as_secs(), "Running VBoxManage");

        let child = Command::new(&self.program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(deadline, child).await {
            Ok(Ok(output)) => CommandOutput {
                ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            },
            Ok(Err(e)) => {
                debug!(error = %e, program = %self.program.display(), "Failed to spawn VBoxManage");
                CommandOutput::failure(format!("failed to spawn {}: {}", self.program.display(), e))
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = deadline.as_secs(), "VBoxManage timed out");
                CommandOutput::timeout()
            }
        }
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}

/// Injected VBoxManage client shared by all components.
#[derive(Clone)]
pub struct VBoxManage {
    runner: Arc<dyn CommandRunner>,
}

impl VBoxManage {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Locate the real executable and wrap it.
    pub async fn locate(settings: ClientSettings) -> Result<Self> {
        let runner = ProcessRunner::locate(settings).await?;
        Ok(Self::new(Arc::new(runner)))
    }

    /// Run a command, returning the structured output.
    pub async fn run(&self, command: &VBoxCommand) -> CommandOutput {
        self.runner.run(command).await
    }

    pub fn describe(&self) -> String {
        self.runner.describe()
    }

    /// Tool version, first line of `--version`.
    pub async fn version(&self) -> Result<String> {
        let output = self.run(&VBoxCommand::version()).await;
        if !output.ok {
            return Err(HypervisorError::ToolNotFound {
                searched: self.describe(),
            });
        }
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Whether a VM with exactly this name is registered.
    ///
    /// Fails closed: a tool error reads as "does not exist".
    pub async fn exists(&self, name: &str) -> bool {
        self.listing_contains(VBoxCommand::list_vms(), name).await
    }

    /// Whether a VM with exactly this name is running.
    ///
    /// Fails closed: a tool error reads as "not running".
    pub async fn is_running(&self, name: &str) -> bool {
        self.listing_contains(VBoxCommand::list_running_vms(), name).await
    }

    async fn listing_contains(&self, command: VBoxCommand, name: &str) -> bool {
        let output = self.run(&command).await;
        if !output.ok {
            warn!(command = %command, error = %output.error_text(), "VM listing failed, assuming absent");
            return false;
        }
        parse_vm_list(&output.stdout).iter().any(|e| e.name == name)
    }

    /// Raw `showvminfo` text.
    pub async fn show_vm_info(&self, name: &str) -> Result<String> {
        let command = VBoxCommand::show_vm_info(name)?;
        let output = self.run(&command).await;
        if output.timed_out {
            return Err(HypervisorError::Timeout(command.to_string()));
        }
        if !output.ok {
            return Err(HypervisorError::CommandFailed {
                operation: "show VM info".into(),
                message: output.error_text(),
            });
        }
        Ok(output.stdout)
    }

    /// All registered VMs.
    pub async fn list_vms(&self) -> Result<Vec<VmListEntry>> {
        self.list(VBoxCommand::list_vms()).await
    }

    /// Running VMs.
    pub async fn list_running_vms(&self) -> Result<Vec<VmListEntry>> {
        self.list(VBoxCommand::list_running_vms()).await
    }

    async fn list(&self, command: VBoxCommand) -> Result<Vec<VmListEntry>> {
        let output = self.run(&command).await;
        if output.timed_out {
            return Err(HypervisorError::Timeout(command.to_string()));
        }
        if !output.ok {
            return Err(HypervisorError::CommandFailed {
                operation: "list VMs".into(),
                message: output.error_text(),
            });
        }
        Ok(parse_vm_list(&output.stdout))
    }
}

/// Parse `"name" {uuid}` lines. Names are matched whole, never by substring.
pub fn parse_vm_list(text: &str) -> Vec<VmListEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix('"')?;
            let (name, tail) = rest.rsplit_once("\" {")?;
            let uuid = tail.strip_suffix('}')?;
            Some(VmListEntry {
                name: name.to_string(),
                uuid: uuid.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;

    const LISTING: &str = r#""test1" {2b1c7e0a-1111-4c55-9d5e-0a1b2c3d4e5f}
"test10" {5e6f7a8b-2222-4c55-9d5e-0a1b2c3d4e5f}
"my vm" {9a8b7c6d-3333-4c55-9d5e-0a1b2c3d4e5f}
"#;

    #[test]
    fn test_parse_vm_list() {
        let entries = parse_vm_list(LISTING);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "test1");
        assert_eq!(entries[0].uuid, "2b1c7e0a-1111-4c55-9d5e-0a1b2c3d4e5f");
        assert_eq!(entries[2].name, "my vm");
    }

    #[test]
    fn test_parse_ignores_noise() {
        let entries = parse_vm_list("WARNING: something odd\n\n\"ok\" {abc}\n");
        assert_eq!(entries, vec![VmListEntry { name: "ok".into(), uuid: "abc".into() }]);
    }

    #[test]
    fn test_exact_name_matching() {
        let entries = parse_vm_list(LISTING);
        assert!(entries.iter().any(|e| e.name == "test10"));
        assert!(!entries.iter().any(|e| e.name == "test"));
        assert!(!entries.iter().any(|e| e.name == "vm"));
    }

    #[tokio::test]
    async fn test_locate_fails_with_no_candidates() {
        let settings = ClientSettings {
            candidates: vec![PathBuf::from("/nonexistent/VBoxManage-vmforge-test")],
            ..Default::default()
        };
        let err = ProcessRunner::locate(settings).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/nonexistent/VBoxManage-vmforge-test"));
    }
}
