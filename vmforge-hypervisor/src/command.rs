//! Typed VBoxManage command builders.
//!
//! Every invocation is built here as a validated argument vector. Nothing is
//! ever passed through a shell, and VM names and paths are checked before a
//! process is spawned.

use std::fmt;
use std::path::Path;

use crate::error::{HypervisorError, Result};
use crate::types::{validate_vm_name, BootOrder, GraphicsController};

/// Storage controller names used for every VM.
pub const SATA_CONTROLLER: &str = "SATA Controller";
pub const IDE_CONTROLLER: &str = "IDE Controller";

/// Timeout class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Read-only listing and counter queries
    Query,
    /// Configuration changes
    Mutation,
    /// Start, shutdown and power-off, which block on the VM
    Power,
}

/// Network attachment mode for `--nicN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicMode {
    Nat,
    Bridged,
    HostOnly,
    NatNetwork,
}

impl NicMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::Bridged => "bridged",
            Self::HostOnly => "hostonly",
            Self::NatNetwork => "natnetwork",
        }
    }
}

/// A single `modifyvm` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSetting {
    OsType(String),
    MemoryMb(u64),
    Cpus(u32),
    Nic { slot: u8, mode: NicMode },
    /// Rule in VBoxManage's `name,proto,hostip,hostport,guestip,guestport` form
    NatPortForward { slot: u8, rule: String },
    BridgeAdapter { slot: u8, adapter: String },
    HostOnlyAdapter { slot: u8, adapter: String },
    NatNetwork { slot: u8, network: String },
    Boot(BootOrder),
    Graphics(GraphicsController),
    VramMb(u32),
    Usb,
    AudioOff,
    VrdeOff,
}

impl VmSetting {
    fn to_args(&self) -> Vec<String> {
        match self {
            Self::OsType(os_type) => vec!["--ostype".into(), os_type.clone()],
            Self::MemoryMb(mb) => vec!["--memory".into(), mb.to_string()],
            Self::Cpus(n) => vec!["--cpus".into(), n.to_string()],
            Self::Nic { slot, mode } => vec![format!("--nic{}", slot), mode.as_str().into()],
            Self::NatPortForward { slot, rule } => vec![format!("--natpf{}", slot), rule.clone()],
            Self::BridgeAdapter { slot, adapter } => {
                vec![format!("--bridgeadapter{}", slot), adapter.clone()]
            }
            Self::HostOnlyAdapter { slot, adapter } => {
                vec![format!("--hostonlyadapter{}", slot), adapter.clone()]
            }
            Self::NatNetwork { slot, network } => {
                vec![format!("--nat-network{}", slot), network.clone()]
            }
            Self::Boot(BootOrder::DiskOnly) => vec!["--boot1".into(), "disk".into()],
            Self::Boot(BootOrder::OpticalThenDisk) => vec![
                "--boot1".into(),
                "dvd".into(),
                "--boot2".into(),
                "disk".into(),
            ],
            Self::Graphics(kind) => vec!["--graphicscontroller".into(), kind.as_str().into()],
            Self::VramMb(mb) => vec!["--vram".into(), mb.to_string()],
            Self::Usb => vec![
                "--usb".into(),
                "on".into(),
                "--usbehci".into(),
                "on".into(),
            ],
            Self::AudioOff => vec!["--audio".into(), "none".into()],
            Self::VrdeOff => vec!["--vrde".into(), "off".into()],
        }
    }

    fn validate(&self) -> Result<()> {
        let slot = match self {
            Self::Nic { slot, .. }
            | Self::NatPortForward { slot, .. }
            | Self::BridgeAdapter { slot, .. }
            | Self::HostOnlyAdapter { slot, .. }
            | Self::NatNetwork { slot, .. } => Some(*slot),
            _ => None,
        };
        if let Some(slot) = slot {
            if !(1..=8).contains(&slot) {
                return Err(HypervisorError::InvalidConfig(format!(
                    "network adapter slot {} out of range 1..=8",
                    slot
                )));
            }
        }
        match self {
            Self::OsType(v)
            | Self::NatPortForward { rule: v, .. }
            | Self::BridgeAdapter { adapter: v, .. }
            | Self::HostOnlyAdapter { adapter: v, .. }
            | Self::NatNetwork { network: v, .. } => check_value(v),
            _ => Ok(()),
        }
    }
}

/// Storage device kind for `storageattach --type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumType {
    HardDisk,
    Optical,
}

impl MediumType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::HardDisk => "hdd",
            Self::Optical => "dvddrive",
        }
    }
}

/// A validated VBoxManage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VBoxCommand {
    kind: CommandKind,
    args: Vec<String>,
}

impl VBoxCommand {
    fn new(kind: CommandKind, args: Vec<String>) -> Self {
        Self { kind, args }
    }

    /// `--version`
    pub fn version() -> Self {
        Self::new(CommandKind::Query, vec!["--version".into()])
    }

    /// `list vms`
    pub fn list_vms() -> Self {
        Self::new(CommandKind::Query, vec!["list".into(), "vms".into()])
    }

    /// `list runningvms`
    pub fn list_running_vms() -> Self {
        Self::new(CommandKind::Query, vec!["list".into(), "runningvms".into()])
    }

    /// `showvminfo <name>`
    pub fn show_vm_info(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Query,
            vec!["showvminfo".into(), name.into()],
        ))
    }

    /// `metrics query <name>`
    pub fn metrics_query(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Query,
            vec!["metrics".into(), "query".into(), name.into()],
        ))
    }

    /// `createvm --name <name> --register`
    pub fn create_vm(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Mutation,
            vec![
                "createvm".into(),
                "--name".into(),
                name.into(),
                "--register".into(),
            ],
        ))
    }

    /// `modifyvm <name> <setting...>`
    pub fn modify_vm(name: &str, setting: VmSetting) -> Result<Self> {
        validate_vm_name(name)?;
        setting.validate()?;
        let mut args = vec!["modifyvm".to_string(), name.to_string()];
        args.extend(setting.to_args());
        Ok(Self::new(CommandKind::Mutation, args))
    }

    /// `createmedium disk --filename <path> --size <mb> --format VDI`
    pub fn create_disk(path: &Path, size_mb: u64) -> Result<Self> {
        if size_mb == 0 {
            return Err(HypervisorError::InvalidConfig("disk size must be positive".into()));
        }
        Ok(Self::new(
            CommandKind::Mutation,
            vec![
                "createmedium".into(),
                "disk".into(),
                "--filename".into(),
                path_arg(path)?,
                "--size".into(),
                size_mb.to_string(),
                "--format".into(),
                "VDI".into(),
            ],
        ))
    }

    /// `storagectl <name> --name "SATA Controller" --add sata --controller IntelAHCI`
    pub fn add_sata_controller(name: &str) -> Result<Self> {
        Self::add_controller(name, SATA_CONTROLLER, "sata", "IntelAHCI")
    }

    /// `storagectl <name> --name "IDE Controller" --add ide --controller PIIX4`
    pub fn add_ide_controller(name: &str) -> Result<Self> {
        Self::add_controller(name, IDE_CONTROLLER, "ide", "PIIX4")
    }

    fn add_controller(name: &str, controller: &str, bus: &str, chipset: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Mutation,
            vec![
                "storagectl".into(),
                name.into(),
                "--name".into(),
                controller.into(),
                "--add".into(),
                bus.into(),
                "--controller".into(),
                chipset.into(),
            ],
        ))
    }

    /// `storageattach <name> --storagectl <ctl> --port 0 --device 0 --type <t> --medium <path>`
    pub fn attach_medium(
        name: &str,
        controller: &str,
        medium_type: MediumType,
        medium: &Path,
    ) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Mutation,
            vec![
                "storageattach".into(),
                name.into(),
                "--storagectl".into(),
                controller.into(),
                "--port".into(),
                "0".into(),
                "--device".into(),
                "0".into(),
                "--type".into(),
                medium_type.as_str().into(),
                "--medium".into(),
                path_arg(medium)?,
            ],
        ))
    }

    /// `startvm <name> --type headless`
    pub fn start_headless(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Power,
            vec![
                "startvm".into(),
                name.into(),
                "--type".into(),
                "headless".into(),
            ],
        ))
    }

    /// `controlvm <name> acpipowerbutton`
    pub fn acpi_power_button(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Power,
            vec!["controlvm".into(), name.into(), "acpipowerbutton".into()],
        ))
    }

    /// `controlvm <name> poweroff`
    pub fn power_off(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Power,
            vec!["controlvm".into(), name.into(), "poweroff".into()],
        ))
    }

    /// `unregistervm <name> --delete`
    pub fn unregister_and_delete(name: &str) -> Result<Self> {
        validate_vm_name(name)?;
        Ok(Self::new(
            CommandKind::Mutation,
            vec!["unregistervm".into(), name.into(), "--delete".into()],
        ))
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Subcommand name (first argument).
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    /// Whether this command changes hypervisor state.
    pub fn is_mutating(&self) -> bool {
        self.kind != CommandKind::Query
    }
}

impl fmt::Display for VBoxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a.contains(' ') {
                    format!("\"{}\"", a)
                } else {
                    a.clone()
                }
            })
            .collect();
        write!(f, "VBoxManage {}", rendered.join(" "))
    }
}

fn path_arg(path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| {
        HypervisorError::InvalidConfig(format!("path is not valid UTF-8: {}", path.display()))
    })?;
    check_value(s)?;
    Ok(s.to_string())
}

fn check_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(HypervisorError::InvalidConfig("argument must not be empty".into()));
    }
    if value.chars().any(char::is_control) {
        return Err(HypervisorError::InvalidConfig(format!(
            "argument contains control characters: {:?}",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_modify_vm_args() {
        let cmd = VBoxCommand::modify_vm("test1", VmSetting::MemoryMb(4096)).unwrap();
        assert_eq!(cmd.args(), ["modifyvm", "test1", "--memory", "4096"]);
        assert_eq!(cmd.kind(), CommandKind::Mutation);

        let cmd = VBoxCommand::modify_vm("test1", VmSetting::Boot(BootOrder::OpticalThenDisk)).unwrap();
        assert_eq!(
            cmd.args(),
            ["modifyvm", "test1", "--boot1", "dvd", "--boot2", "disk"]
        );
    }

    #[test]
    fn test_port_forward_args() {
        let cmd = VBoxCommand::modify_vm(
            "test1",
            VmSetting::NatPortForward {
                slot: 1,
                rule: "ssh,tcp,127.0.0.1,2207,10.0.2.15,22".into(),
            },
        )
        .unwrap();
        assert_eq!(
            cmd.args(),
            ["modifyvm", "test1", "--natpf1", "ssh,tcp,127.0.0.1,2207,10.0.2.15,22"]
        );
    }

    #[test]
    fn test_storage_commands() {
        let disk = PathBuf::from("/var/vms/test1.vdi");
        let cmd = VBoxCommand::create_disk(&disk, 20480).unwrap();
        assert_eq!(
            cmd.args(),
            ["createmedium", "disk", "--filename", "/var/vms/test1.vdi", "--size", "20480", "--format", "VDI"]
        );

        let cmd = VBoxCommand::attach_medium("test1", SATA_CONTROLLER, MediumType::HardDisk, &disk).unwrap();
        assert_eq!(cmd.args()[3], "SATA Controller");
        assert_eq!(cmd.args()[9], "hdd");
        assert_eq!(cmd.to_string(), "VBoxManage storageattach test1 --storagectl \"SATA Controller\" --port 0 --device 0 --type hdd --medium /var/vms/test1.vdi");
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(VBoxCommand::create_vm("--register").is_err());
        assert!(VBoxCommand::create_vm("").is_err());
        assert!(VBoxCommand::start_headless("bad\nname").is_err());
        assert!(VBoxCommand::modify_vm("vm", VmSetting::Nic { slot: 9, mode: NicMode::Nat }).is_err());
        assert!(VBoxCommand::modify_vm("vm", VmSetting::BridgeAdapter { slot: 2, adapter: String::new() }).is_err());
        assert!(VBoxCommand::create_disk(Path::new("/tmp/x.vdi"), 0).is_err());
    }

    #[test]
    fn test_command_kinds() {
        assert!(!VBoxCommand::list_vms().is_mutating());
        assert_eq!(VBoxCommand::power_off("vm").unwrap().kind(), CommandKind::Power);
        assert!(VBoxCommand::unregister_and_delete("vm").unwrap().is_mutating());
        assert_eq!(VBoxCommand::metrics_query("vm").unwrap().subcommand(), "metrics");
    }
}
