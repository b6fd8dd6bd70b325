//! Provisioning pipeline: from nothing to a configured, stopped VM.
//!
//! Steps run strictly in order. Mandatory steps abort the run on failure
//! with [`HypervisorError::StepFailed`]; best-effort steps (port forward,
//! secondary adapter, peripherals) log a warning and continue.
//!
//! There is no rollback. Once `createvm` has succeeded, a later failure
//! leaves a registered, partially configured VM (and possibly its disk
//! file) behind; the caller cleans up with an explicit delete before
//! retrying. The failure message says so.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::client::VBoxManage;
use crate::command::{
    MediumType, NicMode, VBoxCommand, VmSetting, IDE_CONTROLLER, SATA_CONTROLLER,
};
use crate::config::{HypervisorSettings, NetworkSettings};
use crate::error::{HypervisorError, Result};
use crate::guest_os::OsLookup;
use crate::ports::{PortStrategy, SshEndpoint};
use crate::types::{
    disk_path_for, BootOrder, ProvisionReport, ProvisionStep, SecondaryNetwork, StepOutcome,
    StepRecord, VmSpec,
};

/// Drives the ordered provisioning steps against VBoxManage.
pub struct Provisioner {
    client: VBoxManage,
    network: NetworkSettings,
    storage_dir: PathBuf,
}

impl Provisioner {
    /// Create a provisioner, resolving the storage directory now.
    pub fn new(client: VBoxManage, settings: &HypervisorSettings) -> Result<Self> {
        Ok(Self {
            client,
            network: settings.network.clone(),
            storage_dir: settings.storage.resolve_dir()?,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Where the disk image for `vm_name` lives.
    pub fn disk_path(&self, vm_name: &str) -> PathBuf {
        disk_path_for(&self.storage_dir, vm_name)
    }

    /// Run the full pipeline for `spec`.
    ///
    /// Every argument vector is built before the preflight check, so a
    /// malformed mandatory argument is rejected before anything is
    /// registered. A best-effort command that cannot be built is recorded
    /// as a warning like any other optional failure.
    #[instrument(skip(self, spec), fields(vm_name = %spec.name, os = %spec.os))]
    pub async fn provision(&self, spec: &VmSpec) -> Result<ProvisionReport> {
        spec.validate()?;

        let os = OsLookup::resolve(&spec.os);
        let template = os.template();
        let strategy = PortStrategy::for_vm(&spec.name, spec.identifier);
        let ssh = SshEndpoint::new(
            strategy,
            template.default_user,
            self.network.host_address.as_str(),
            self.network.guest_ip.as_str(),
        )?;
        let disk_path = self.disk_path(&spec.name);

        // Media presence is decided once, at submission.
        let media = match &spec.install_media {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) => {
                warn!(path = %path.display(), "Install media not found, booting from disk only");
                None
            }
            None => None,
        };
        let boot_order = if media.is_some() {
            BootOrder::OpticalThenDisk
        } else {
            BootOrder::DiskOnly
        };

        let plan = self.plan(
            spec,
            template.os_type,
            &ssh,
            &disk_path,
            media.as_deref(),
            boot_order,
        )?;
        let mut run = PipelineRun::new(&self.client, &spec.name);

        // 1. Preflight
        if self.client.exists(&spec.name).await {
            warn!("VM already exists, nothing changed");
            return Err(HypervisorError::AlreadyExists(spec.name.clone()));
        }
        run.note(ProvisionStep::Preflight, "name is free", StepOutcome::Ok, None);

        info!(
            cpus = spec.cpu_count,
            ram_gb = spec.ram_gb,
            storage_gb = spec.storage_gb,
            ssh = %ssh,
            port_source = %strategy,
            "Provisioning VM"
        );

        // 2. Register
        run.required(ProvisionStep::Register, plan.register).await?;

        // 3. Guest type
        if os.fell_back {
            warn!(
                requested = %os.requested,
                fallback = %os.os.key(),
                "Unknown OS key, using generic Linux template"
            );
        }
        run.required(ProvisionStep::OsType, plan.os_type).await?;
        if os.fell_back {
            run.annotate_last(format!("unknown OS key '{}', used {}", os.requested, os.os.key()));
        }

        // 4-5. Memory and CPUs
        run.required(ProvisionStep::Memory, plan.memory).await?;
        run.required(ProvisionStep::Cpus, plan.cpus).await?;

        // 6. Primary NAT adapter and SSH forward
        run.required(ProvisionStep::PrimaryNetwork, plan.primary_nic).await?;
        run.best_effort(ProvisionStep::PortForward, plan.port_forward).await;

        // 7. Optional second adapter
        for command in plan.secondary {
            run.best_effort(ProvisionStep::SecondaryNetwork, command).await;
        }

        // 8-10. Disk
        run.required(ProvisionStep::CreateDisk, plan.create_disk).await?;
        run.required(ProvisionStep::SataController, plan.sata_controller).await?;
        run.required(ProvisionStep::AttachDisk, plan.attach_disk).await?;

        // 11. Install media and boot order
        if let Some((controller, attach)) = plan.media {
            run.required(ProvisionStep::IdeController, controller).await?;
            run.required(ProvisionStep::AttachMedia, attach).await?;
        }
        run.required(ProvisionStep::BootOrder, plan.boot).await?;
        if media.is_none() {
            if let Some(missing) = &spec.install_media {
                run.annotate_last(format!("install media {} not found", missing.display()));
            }
        }

        // 12. Peripherals
        for command in plan.peripherals {
            run.best_effort(ProvisionStep::Peripherals, command).await;
        }

        let report = ProvisionReport {
            vm_name: spec.name.clone(),
            os_type: template.os_type.to_string(),
            os_fell_back: os.fell_back,
            ssh,
            disk_path,
            boot_order,
            steps: run.finish(),
        };

        info!(
            warnings = report.warnings(),
            ssh = %report.ssh,
            boot = ?report.boot_order,
            "VM provisioned"
        );
        Ok(report)
    }

    /// Build the argument vector of every step, in pipeline order.
    fn plan(
        &self,
        spec: &VmSpec,
        os_type: &str,
        ssh: &SshEndpoint,
        disk_path: &Path,
        media: Option<&Path>,
        boot_order: BootOrder,
    ) -> Result<StepPlan> {
        let name = spec.name.as_str();
        let media = match media {
            Some(iso) => Some((
                VBoxCommand::add_ide_controller(name)?,
                VBoxCommand::attach_medium(name, IDE_CONTROLLER, MediumType::Optical, iso)?,
            )),
            None => None,
        };

        Ok(StepPlan {
            register: VBoxCommand::create_vm(name)?,
            os_type: VBoxCommand::modify_vm(name, VmSetting::OsType(os_type.to_string()))?,
            memory: VBoxCommand::modify_vm(name, VmSetting::MemoryMb(spec.ram_mb()))?,
            cpus: VBoxCommand::modify_vm(name, VmSetting::Cpus(spec.cpu_count))?,
            primary_nic: VBoxCommand::modify_vm(name, VmSetting::Nic { slot: 1, mode: NicMode::Nat })?,
            port_forward: VBoxCommand::modify_vm(
                name,
                VmSetting::NatPortForward {
                    slot: 1,
                    rule: ssh.nat_rule(),
                },
            ),
            secondary: self.secondary_network(name, spec.secondary_network),
            create_disk: VBoxCommand::create_disk(disk_path, spec.storage_mb())?,
            sata_controller: VBoxCommand::add_sata_controller(name)?,
            attach_disk: VBoxCommand::attach_medium(
                name,
                SATA_CONTROLLER,
                MediumType::HardDisk,
                disk_path,
            )?,
            media,
            boot: VBoxCommand::modify_vm(name, VmSetting::Boot(boot_order))?,
            peripherals: [
                VmSetting::Graphics(spec.graphics),
                VmSetting::VramMb(spec.vram_mb),
                VmSetting::Usb,
                VmSetting::AudioOff,
                VmSetting::VrdeOff,
            ]
            .into_iter()
            .map(|setting| VBoxCommand::modify_vm(name, setting))
            .collect(),
        })
    }

    fn secondary_network(&self, name: &str, network: SecondaryNetwork) -> Vec<Result<VBoxCommand>> {
        let (mode, binding) = match network {
            SecondaryNetwork::None => return Vec::new(),
            SecondaryNetwork::Bridged => (
                NicMode::Bridged,
                VmSetting::BridgeAdapter {
                    slot: 2,
                    adapter: self.network.bridge_adapter.clone(),
                },
            ),
            SecondaryNetwork::HostOnly => (
                NicMode::HostOnly,
                VmSetting::HostOnlyAdapter {
                    slot: 2,
                    adapter: self.network.host_only_adapter.clone(),
                },
            ),
            SecondaryNetwork::NatNetwork => (
                NicMode::NatNetwork,
                VmSetting::NatNetwork {
                    slot: 2,
                    network: self.network.nat_network.clone(),
                },
            ),
        };

        vec![
            VBoxCommand::modify_vm(name, VmSetting::Nic { slot: 2, mode }),
            VBoxCommand::modify_vm(name, binding),
        ]
    }
}

/// Prebuilt commands for one pipeline run. Best-effort entries keep their
/// build error so it can be reported as a warning in place.
struct StepPlan {
    register: VBoxCommand,
    os_type: VBoxCommand,
    memory: VBoxCommand,
    cpus: VBoxCommand,
    primary_nic: VBoxCommand,
    port_forward: Result<VBoxCommand>,
    secondary: Vec<Result<VBoxCommand>>,
    create_disk: VBoxCommand,
    sata_controller: VBoxCommand,
    attach_disk: VBoxCommand,
    media: Option<(VBoxCommand, VBoxCommand)>,
    boot: VBoxCommand,
    peripherals: Vec<Result<VBoxCommand>>,
}

/// Step log and runner for one pipeline invocation.
struct PipelineRun<'a> {
    client: &'a VBoxManage,
    vm_name: &'a str,
    steps: Vec<StepRecord>,
    registered: bool,
}

impl<'a> PipelineRun<'a> {
    fn new(client: &'a VBoxManage, vm_name: &'a str) -> Self {
        Self {
            client,
            vm_name,
            steps: Vec::new(),
            registered: false,
        }
    }

    fn note(&mut self, step: ProvisionStep, text: &str, outcome: StepOutcome, detail: Option<String>) {
        self.steps.push(StepRecord {
            step,
            command: text.to_string(),
            outcome,
            detail,
        });
    }

    fn annotate_last(&mut self, detail: String) {
        if let Some(last) = self.steps.last_mut() {
            last.detail = Some(detail);
        }
    }

    /// Run a mandatory step; failure aborts the pipeline.
    async fn required(&mut self, step: ProvisionStep, command: VBoxCommand) -> Result<()> {
        let output = self.client.run(&command).await;
        if output.ok {
            info!(step = %step, "Step complete");
            if step == ProvisionStep::Register {
                self.registered = true;
            }
            self.note(step, &command.to_string(), StepOutcome::Ok, None);
            return Ok(());
        }

        let mut message = if output.timed_out {
            format!("{} timed out", command)
        } else {
            output.error_text()
        };
        if self.registered {
            message.push_str(&format!(
                "; VM '{}' is left partially configured, delete it before retrying",
                self.vm_name
            ));
        }
        warn!(step = %step, error = %message, "Provisioning step failed");
        self.note(step, &command.to_string(), StepOutcome::Failed, Some(message.clone()));
        Err(HypervisorError::StepFailed { step, message })
    }

    /// Run a best-effort step; failure is logged and the pipeline continues.
    async fn best_effort(&mut self, step: ProvisionStep, command: Result<VBoxCommand>) -> bool {
        let command = match command {
            Ok(command) => command,
            Err(e) => {
                let error = e.to_string();
                warn!(step = %step, error = %error, "Optional step has invalid arguments, skipping");
                self.note(step, "(not run)", StepOutcome::Warning, Some(error));
                return false;
            }
        };
        let output = self.client.run(&command).await;
        if output.ok {
            self.note(step, &command.to_string(), StepOutcome::Ok, None);
            return true;
        }
        let error = output.error_text();
        warn!(step = %step, command = %command, error = %error, "Optional step failed, continuing");
        self.note(step, &command.to_string(), StepOutcome::Warning, Some(error));
        false
    }

    fn finish(self) -> Vec<StepRecord> {
        self.steps
    }
}
