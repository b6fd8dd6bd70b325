//! Type definitions for VM specifications, provisioning reports and status.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

// =============================================================================
// VM SPECIFICATION
// =============================================================================

/// Video memory applied when the caller does not pick one.
pub const DEFAULT_VRAM_MB: u32 = 128;

/// VM specification submitted for provisioning.
///
/// Built by the caller and treated as immutable once handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    /// Unique name, used as the hypervisor object's key
    pub name: String,
    /// Logical OS key (e.g. "ubuntu"), resolved through the guest OS registry
    pub os: String,
    /// Number of virtual CPUs
    pub cpu_count: u32,
    /// RAM in GB
    pub ram_gb: u32,
    /// Disk size in GB
    pub storage_gb: u32,
    /// Optional installation media (ISO) path
    pub install_media: Option<PathBuf>,
    /// Second network adapter mode
    pub secondary_network: SecondaryNetwork,
    /// Graphics controller kind
    pub graphics: GraphicsController,
    /// Video memory in MB
    pub vram_mb: u32,
    /// Persistent numeric identifier assigned by the record store
    pub identifier: Option<u32>,
}

impl VmSpec {
    /// Create a specification with the smallest accepted sizes.
    pub fn new(name: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            os: os.into(),
            cpu_count: 1,
            ram_gb: 1,
            storage_gb: 10,
            install_media: None,
            secondary_network: SecondaryNetwork::None,
            graphics: GraphicsController::default(),
            vram_mb: DEFAULT_VRAM_MB,
            identifier: None,
        }
    }

    /// Set the number of CPUs.
    pub fn with_cpu(mut self, count: u32) -> Self {
        self.cpu_count = count;
        self
    }

    /// Set the RAM size in GB.
    pub fn with_ram_gb(mut self, gb: u32) -> Self {
        self.ram_gb = gb;
        self
    }

    /// Set the disk size in GB.
    pub fn with_storage_gb(mut self, gb: u32) -> Self {
        self.storage_gb = gb;
        self
    }

    /// Attach installation media.
    pub fn with_install_media(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_media = Some(path.into());
        self
    }

    /// Set the secondary network adapter mode.
    pub fn with_secondary_network(mut self, network: SecondaryNetwork) -> Self {
        self.secondary_network = network;
        self
    }

    /// Set the graphics controller.
    pub fn with_graphics(mut self, graphics: GraphicsController) -> Self {
        self.graphics = graphics;
        self
    }

    /// Set video memory in MB.
    pub fn with_vram_mb(mut self, mb: u32) -> Self {
        self.vram_mb = mb;
        self
    }

    /// Set the persistent identifier used for port allocation.
    pub fn with_identifier(mut self, identifier: u32) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// RAM converted to the MB figure VBoxManage expects.
    pub fn ram_mb(&self) -> u64 {
        u64::from(self.ram_gb) * 1024
    }

    /// Disk size converted to MB.
    pub fn storage_mb(&self) -> u64 {
        u64::from(self.storage_gb) * 1024
    }

    /// Check field bounds. Pure; never touches the hypervisor.
    pub fn validate(&self) -> Result<()> {
        validate_vm_name(&self.name)?;

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
        {
            return Err(HypervisorError::InvalidConfig(format!(
                "VM name '{}' may only contain letters, digits, spaces, '-' and '_'",
                self.name
            )));
        }

        check_range("cpu_count", self.cpu_count, 1, 32)?;
        check_range("ram_gb", self.ram_gb, 1, 128)?;
        check_range("storage_gb", self.storage_gb, 10, 1000)?;
        check_range("vram_mb", self.vram_mb, 16, 256)?;

        if self.os.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("OS key must not be empty".into()));
        }

        Ok(())
    }
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(HypervisorError::InvalidConfig(format!(
            "{} must be between {} and {} (got {})",
            field, min, max, value
        )));
    }
    Ok(())
}

/// Reject names VBoxManage would misread as flags or that carry control
/// characters.
pub fn validate_vm_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(HypervisorError::InvalidConfig("VM name must not be empty".into()));
    }
    if name.starts_with('-') {
        return Err(HypervisorError::InvalidConfig(format!(
            "VM name '{}' must not start with '-'",
            name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(HypervisorError::InvalidConfig(
            "VM name must not contain control characters".into(),
        ));
    }
    Ok(())
}

/// Mode of the optional second network adapter.
///
/// The first adapter is always NAT and is not configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryNetwork {
    #[default]
    None,
    Bridged,
    HostOnly,
    NatNetwork,
}

impl SecondaryNetwork {
    /// VBoxManage `--nicN` value, `None` when no adapter is configured.
    pub fn nic_mode(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Bridged => Some("bridged"),
            Self::HostOnly => Some("hostonly"),
            Self::NatNetwork => Some("natnetwork"),
        }
    }
}

impl FromStr for SecondaryNetwork {
    type Err = HypervisorError;

    /// "nat" maps to `None`: adapter 1 already provides NAT.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "nat" => Ok(Self::None),
            "bridged" | "bridge" => Ok(Self::Bridged),
            "hostonly" | "host-only" | "host_only" => Ok(Self::HostOnly),
            "natnetwork" | "nat-network" | "nat_network" => Ok(Self::NatNetwork),
            other => Err(HypervisorError::InvalidConfig(format!(
                "unknown network type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SecondaryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nic_mode().unwrap_or("none"))
    }
}

/// Graphics controller kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsController {
    #[default]
    VmSvga,
    VboxSvga,
    VboxVga,
    None,
}

impl GraphicsController {
    /// Get the VBoxManage controller name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VmSvga => "vmsvga",
            Self::VboxSvga => "vboxsvga",
            Self::VboxVga => "vboxvga",
            Self::None => "none",
        }
    }
}

impl FromStr for GraphicsController {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "vmsvga" => Ok(Self::VmSvga),
            "vboxsvga" => Ok(Self::VboxSvga),
            "vboxvga" => Ok(Self::VboxVga),
            "none" => Ok(Self::None),
            other => Err(HypervisorError::InvalidConfig(format!(
                "unknown graphics controller '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for GraphicsController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boot device order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootOrder {
    DiskOnly,
    OpticalThenDisk,
}

// =============================================================================
// PROVISIONING
// =============================================================================

/// Ordered steps of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStep {
    Preflight,
    Register,
    OsType,
    Memory,
    Cpus,
    PrimaryNetwork,
    PortForward,
    SecondaryNetwork,
    CreateDisk,
    SataController,
    AttachDisk,
    IdeController,
    AttachMedia,
    BootOrder,
    Peripherals,
}

impl ProvisionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Register => "register",
            Self::OsType => "os-type",
            Self::Memory => "memory",
            Self::Cpus => "cpus",
            Self::PrimaryNetwork => "primary-network",
            Self::PortForward => "port-forward",
            Self::SecondaryNetwork => "secondary-network",
            Self::CreateDisk => "create-disk",
            Self::SataController => "sata-controller",
            Self::AttachDisk => "attach-disk",
            Self::IdeController => "ide-controller",
            Self::AttachMedia => "attach-media",
            Self::BootOrder => "boot-order",
            Self::Peripherals => "peripherals",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single attempted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    /// Best-effort step failed; the pipeline continued
    Warning,
    /// Mandatory step failed; the pipeline stopped here
    Failed,
}

/// Narrative log line for one attempted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: ProvisionStep,
    /// Human-readable command line or description
    pub command: String,
    pub outcome: StepOutcome,
    /// Error output or explanatory note
    pub detail: Option<String>,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.outcome {
            StepOutcome::Ok => "ok",
            StepOutcome::Warning => "warn",
            StepOutcome::Failed => "FAILED",
        };
        write!(f, "[{}] {}: {}", mark, self.step, self.command)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Summary of a successful provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub vm_name: String,
    /// Guest type identifier that was applied
    pub os_type: String,
    /// True when the OS key was unknown and the generic entry was used
    pub os_fell_back: bool,
    pub ssh: crate::ports::SshEndpoint,
    pub disk_path: PathBuf,
    pub boot_order: BootOrder,
    pub steps: Vec<StepRecord>,
}

impl ProvisionReport {
    /// Number of best-effort steps that failed.
    pub fn warnings(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Warning)
            .count()
    }

    /// Narrative text suitable for storing as status.
    pub fn narrative(&self) -> String {
        self.steps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// VM STATUS
// =============================================================================

/// Runtime state as seen through the hypervisor listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Absent,
    Stopped,
    Running,
}

/// Status values handed to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// Success flag plus message: the shape every operation is reduced to for
/// callers that only persist text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Reduce an operation result, using `describe` to word the success case.
    pub fn from_result<T>(result: &Result<T>, describe: impl FnOnce(&T) -> String) -> Self {
        match result {
            Ok(value) => Self::succeeded(describe(value)),
            Err(e) => Self::failed(e.to_string()),
        }
    }

    /// Status to record: `on_success` when the operation succeeded, else error.
    pub fn status(&self, on_success: VmStatus) -> VmStatus {
        if self.success {
            on_success
        } else {
            VmStatus::Error
        }
    }

    /// Process exit code for the command surface.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// One line of `VBoxManage list vms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmListEntry {
    pub name: String,
    pub uuid: String,
}

/// VM entry with its running flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSummary {
    pub name: String,
    pub uuid: String,
    pub running: bool,
}

/// Detailed information about one VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub name: String,
    pub state: VmState,
    pub ssh: crate::ports::SshEndpoint,
    pub disk_path: PathBuf,
    pub disk_present: bool,
    /// Raw `showvminfo` output; empty when the query failed
    pub details: String,
}

// =============================================================================
// METRICS
// =============================================================================

/// Four normalised usage figures for one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmMetrics {
    pub success: bool,
    /// CPU load percentage
    pub cpu_usage: f64,
    /// Memory usage percentage (heuristic)
    pub memory_usage: f64,
    /// Disk usage percentage (always synthetic)
    pub disk_usage: f64,
    /// Network throughput in MB/s (rx + tx)
    pub network_usage: f64,
    pub is_running: bool,
    pub timestamp: DateTime<Utc>,
}

impl VmMetrics {
    /// Zeroed, unsuccessful metrics: tool unavailable or VM missing.
    pub fn unavailable() -> Self {
        Self {
            success: false,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            network_usage: 0.0,
            is_running: false,
            timestamp: Utc::now(),
        }
    }

    /// Zeroed, successful metrics for a VM that exists but is stopped.
    pub fn stopped() -> Self {
        Self {
            success: true,
            ..Self::unavailable()
        }
    }
}

/// Disk image path for a VM inside the storage directory.
pub fn disk_path_for(storage_dir: &Path, vm_name: &str) -> PathBuf {
    storage_dir.join(format!("{}.vdi", vm_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_unit_conversions() {
        let spec = VmSpec::new("test1", "ubuntu").with_ram_gb(4).with_storage_gb(20);
        assert_eq!(spec.ram_mb(), 4096);
        assert_eq!(spec.storage_mb(), 20480);
    }

    #[test]
    fn test_spec_validation_bounds() {
        let valid = VmSpec::new("web-01", "debian").with_cpu(2).with_ram_gb(4).with_storage_gb(20);
        assert!(valid.validate().is_ok());

        assert!(valid.clone().with_cpu(0).validate().is_err());
        assert!(valid.clone().with_cpu(33).validate().is_err());
        assert!(valid.clone().with_ram_gb(129).validate().is_err());
        assert!(valid.clone().with_storage_gb(5).validate().is_err());
        assert!(valid.clone().with_vram_mb(8).validate().is_err());
    }

    #[test]
    fn test_spec_rejects_bad_names() {
        assert!(VmSpec::new("", "ubuntu").validate().is_err());
        assert!(VmSpec::new("-rf", "ubuntu").validate().is_err());
        assert!(VmSpec::new("a;b", "ubuntu").validate().is_err());
        assert!(VmSpec::new("my vm_1", "ubuntu").validate().is_ok());
    }

    #[test]
    fn test_secondary_network_parsing() {
        assert_eq!("none".parse::<SecondaryNetwork>().unwrap(), SecondaryNetwork::None);
        assert_eq!("nat".parse::<SecondaryNetwork>().unwrap(), SecondaryNetwork::None);
        assert_eq!("Bridged".parse::<SecondaryNetwork>().unwrap(), SecondaryNetwork::Bridged);
        assert_eq!("hostonly".parse::<SecondaryNetwork>().unwrap(), SecondaryNetwork::HostOnly);
        assert_eq!("nat-network".parse::<SecondaryNetwork>().unwrap(), SecondaryNetwork::NatNetwork);
        assert!("wifi".parse::<SecondaryNetwork>().is_err());
    }

    #[test]
    fn test_outcome_status_mapping() {
        let ok = OperationOutcome::succeeded("started");
        assert_eq!(ok.status(VmStatus::Running), VmStatus::Running);
        assert_eq!(ok.exit_code(), 0);

        let failed = OperationOutcome::failed("boom");
        assert_eq!(failed.status(VmStatus::Running), VmStatus::Error);
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_stopped_metrics_are_zero() {
        let m = VmMetrics::stopped();
        assert!(m.success);
        assert!(!m.is_running);
        assert_eq!(m.cpu_usage, 0.0);
        assert_eq!(m.network_usage, 0.0);
    }
}
