//! Lifecycle controller: create, start, stop, delete and inspect named VMs.
//!
//! Every operation re-validates existence through the client before acting;
//! nothing is cached between calls.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use crate::client::VBoxManage;
use crate::command::VBoxCommand;
use crate::config::{HypervisorSettings, LifecycleSettings, NetworkSettings};
use crate::error::{HypervisorError, Result};
use crate::guest_os::OsLookup;
use crate::ports::{PortStrategy, SshEndpoint};
use crate::provision::Provisioner;
use crate::traits::CommandOutput;
use crate::types::{ProvisionReport, VmInfo, VmSpec, VmState, VmSummary};

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The VM was not running; no signal was sent
    AlreadyStopped,
    /// The guest shut down after the ACPI power button
    Graceful,
    /// The guest ignored ACPI and was powered off
    Forced,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStopped => write!(f, "already stopped"),
            Self::Graceful => write!(f, "stopped gracefully"),
            Self::Forced => write!(f, "powered off after ACPI shutdown timed out"),
        }
    }
}

/// What a delete removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// The VM was running and got a forced power-off first
    pub powered_off: bool,
    pub disk_path: PathBuf,
    /// The disk file was still present after unregistering and was removed
    pub disk_removed: bool,
}

impl fmt::Display for DeleteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deleted")?;
        if self.powered_off {
            write!(f, " (powered off first)")?;
        }
        if self.disk_removed {
            write!(f, ", removed {}", self.disk_path.display())?;
        }
        Ok(())
    }
}

/// Operates on named VMs after provisioning.
pub struct LifecycleController {
    client: VBoxManage,
    provisioner: Provisioner,
    network: NetworkSettings,
    timing: LifecycleSettings,
}

impl LifecycleController {
    pub fn new(client: VBoxManage, settings: &HypervisorSettings) -> Result<Self> {
        Ok(Self {
            provisioner: Provisioner::new(client.clone(), settings)?,
            client,
            network: settings.network.clone(),
            timing: settings.lifecycle.clone(),
        })
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Provision a new VM.
    pub async fn create(&self, spec: &VmSpec) -> Result<ProvisionReport> {
        self.provisioner.provision(spec).await
    }

    /// Current state as reported by the listings.
    pub async fn state(&self, name: &str) -> VmState {
        if !self.client.exists(name).await {
            VmState::Absent
        } else if self.client.is_running(name).await {
            VmState::Running
        } else {
            VmState::Stopped
        }
    }

    async fn require(&self, name: &str) -> Result<()> {
        if self.client.exists(name).await {
            Ok(())
        } else {
            Err(HypervisorError::NotFound(name.to_string()))
        }
    }

    /// Boot the VM headless.
    #[instrument(skip(self), fields(vm_name = %name))]
    pub async fn start(&self, name: &str) -> Result<()> {
        self.require(name).await?;

        let command = VBoxCommand::start_headless(name)?;
        check(self.client.run(&command).await, &command, "start VM")?;

        if !self.timing.start_settle().is_zero() {
            tokio::time::sleep(self.timing.start_settle()).await;
        }
        info!("VM started");
        Ok(())
    }

    /// ACPI shutdown, escalating to exactly one forced power-off.
    #[instrument(skip(self), fields(vm_name = %name))]
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        self.require(name).await?;

        if !self.client.is_running(name).await {
            info!("VM already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }

        let acpi = VBoxCommand::acpi_power_button(name)?;
        let output = self.client.run(&acpi).await;
        if output.ok {
            debug!(grace_secs = self.timing.stop_grace_secs, "ACPI signal sent, waiting");
            tokio::time::sleep(self.timing.stop_grace()).await;
        } else {
            warn!(error = %output.error_text(), "ACPI shutdown request failed");
        }

        if !self.client.is_running(name).await {
            info!("VM stopped gracefully");
            return Ok(StopOutcome::Graceful);
        }

        warn!("VM still running, forcing power off");
        let power_off = VBoxCommand::power_off(name)?;
        check(self.client.run(&power_off).await, &power_off, "power off VM")?;
        info!("VM powered off");
        Ok(StopOutcome::Forced)
    }

    /// Power off if needed, unregister with `--delete`, then remove the
    /// disk file if it survived.
    #[instrument(skip(self), fields(vm_name = %name))]
    pub async fn delete(&self, name: &str) -> Result<DeleteReport> {
        self.require(name).await?;

        let mut powered_off = false;
        if self.client.is_running(name).await {
            let power_off = VBoxCommand::power_off(name)?;
            let output = self.client.run(&power_off).await;
            if output.ok {
                powered_off = true;
            } else {
                warn!(error = %output.error_text(), "Power off before delete failed");
            }
            tokio::time::sleep(self.timing.delete_settle()).await;
        }

        let unregister = VBoxCommand::unregister_and_delete(name)?;
        check(self.client.run(&unregister).await, &unregister, "delete VM")?;

        let disk_path = self.provisioner.disk_path(name);
        let disk_removed = match tokio::fs::remove_file(&disk_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %disk_path.display(), error = %e, "Failed to remove disk file");
                false
            }
        };

        info!(disk_removed, "VM deleted");
        Ok(DeleteReport {
            powered_off,
            disk_path,
            disk_removed,
        })
    }

    /// State, SSH endpoint and raw `showvminfo` text for one VM.
    #[instrument(skip(self), fields(vm_name = %name))]
    pub async fn info(&self, name: &str, os: &str, identifier: Option<u32>) -> Result<VmInfo> {
        let ssh = self.ssh_info(name, os, identifier).await?;
        let state = if self.client.is_running(name).await {
            VmState::Running
        } else {
            VmState::Stopped
        };

        let details = self.client.show_vm_info(name).await.unwrap_or_else(|e| {
            warn!(error = %e, "showvminfo failed");
            String::new()
        });

        let disk_path = self.provisioner.disk_path(name);
        Ok(VmInfo {
            name: name.to_string(),
            state,
            ssh,
            disk_present: disk_path.exists(),
            disk_path,
            details,
        })
    }

    /// Every registered VM with its running flag.
    pub async fn list(&self) -> Result<Vec<VmSummary>> {
        let all = self.client.list_vms().await?;
        let running = self.client.list_running_vms().await?;
        Ok(all
            .into_iter()
            .map(|entry| VmSummary {
                running: running.iter().any(|r| r.uuid == entry.uuid),
                name: entry.name,
                uuid: entry.uuid,
            })
            .collect())
    }

    /// SSH endpoint for an existing VM.
    pub async fn ssh_info(&self, name: &str, os: &str, identifier: Option<u32>) -> Result<SshEndpoint> {
        self.require(name).await?;
        let template = OsLookup::resolve(os).template();
        SshEndpoint::new(
            PortStrategy::for_vm(name, identifier),
            template.default_user,
            self.network.host_address.as_str(),
            self.network.guest_ip.as_str(),
        )
    }
}

fn check(output: CommandOutput, command: &VBoxCommand, operation: &str) -> Result<()> {
    if output.ok {
        return Ok(());
    }
    if output.timed_out {
        return Err(HypervisorError::Timeout(command.to_string()));
    }
    Err(HypervisorError::CommandFailed {
        operation: operation.to_string(),
        message: output.error_text(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::mock::MockVBoxManage;
    use std::sync::Arc;

    fn controller(mock: MockVBoxManage) -> (Arc<MockVBoxManage>, LifecycleController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(mock);
        let settings = HypervisorSettings {
            storage: StorageSettings {
                storage_dir: Some(dir.path().to_path_buf()),
            },
            lifecycle: LifecycleSettings::immediate(),
            ..Default::default()
        };
        let controller = LifecycleController::new(VBoxManage::new(mock.clone()), &settings).unwrap();
        (mock, controller, dir)
    }

    #[tokio::test]
    async fn test_operations_on_missing_vm() {
        let (mock, lc, _dir) = controller(MockVBoxManage::new());
        assert!(matches!(lc.start("ghost").await, Err(HypervisorError::NotFound(_))));
        assert!(matches!(lc.stop("ghost").await, Err(HypervisorError::NotFound(_))));
        assert!(matches!(lc.delete("ghost").await, Err(HypervisorError::NotFound(_))));
        assert!(matches!(lc.info("ghost", "ubuntu", None).await, Err(HypervisorError::NotFound(_))));
        assert!(mock.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let (_mock, lc, _dir) = controller(MockVBoxManage::new().with_vm("vm", false).fail_on("startvm"));
        let err = lc.start("vm").await.unwrap_err();
        assert!(matches!(err, HypervisorError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_stop_when_already_stopped_sends_nothing() {
        let (mock, lc, _dir) = controller(MockVBoxManage::new().with_vm("idle", false));
        assert_eq!(lc.stop("idle").await.unwrap(), StopOutcome::AlreadyStopped);
        assert!(mock.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_graceful_stop_skips_power_off() {
        let (mock, lc, _dir) = controller(MockVBoxManage::new().with_vm("web", true));
        assert_eq!(lc.stop("web").await.unwrap(), StopOutcome::Graceful);
        assert_eq!(mock.count_calls(&["poweroff"]), 0);
    }

    #[tokio::test]
    async fn test_failed_acpi_still_escalates() {
        let (mock, lc, _dir) =
            controller(MockVBoxManage::new().with_vm("web", true).fail_on("acpipowerbutton"));
        assert_eq!(lc.stop("web").await.unwrap(), StopOutcome::Forced);
        assert_eq!(mock.count_calls(&["poweroff"]), 1);
        assert!(!mock.vm_running("web"));
    }

    #[tokio::test]
    async fn test_list_marks_running() {
        let (_mock, lc, _dir) =
            controller(MockVBoxManage::new().with_vm("a", true).with_vm("b", false));
        let vms = lc.list().await.unwrap();
        assert_eq!(vms.len(), 2);
        assert!(vms.iter().find(|v| v.name == "a").unwrap().running);
        assert!(!vms.iter().find(|v| v.name == "b").unwrap().running);
    }

    #[tokio::test]
    async fn test_ssh_info_prefers_identifier() {
        let (_mock, lc, _dir) = controller(MockVBoxManage::new().with_vm("test1", false));
        let with_id = lc.ssh_info("test1", "ubuntu", Some(7)).await.unwrap();
        assert_eq!(with_id.port, 2207);
        assert_eq!(with_id.username, "ubuntu");

        let hashed = lc.ssh_info("test1", "ubuntu", None).await.unwrap();
        assert_eq!(hashed.port, 2307);
        assert_eq!(hashed.strategy, PortStrategy::NameHash(107));
    }

    #[tokio::test]
    async fn test_info_reports_state_and_disk() {
        let (_mock, lc, dir) = controller(MockVBoxManage::new().with_vm("box", true));
        std::fs::write(dir.path().join("box.vdi"), b"").unwrap();

        let info = lc.info("box", "debian", Some(1)).await.unwrap();
        assert_eq!(info.state, VmState::Running);
        assert!(info.disk_present);
        assert!(info.details.contains("running"));
        assert_eq!(info.ssh.port, 2201);
    }
}
