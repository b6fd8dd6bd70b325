//! Settings shared by the client, pipeline, lifecycle and metrics components.
//!
//! All sections deserialize with defaults so a partial YAML file is enough.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::command::CommandKind;
use crate::ports::{DEFAULT_GUEST_IP, DEFAULT_HOST_ADDRESS};

/// Top-level hypervisor settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HypervisorSettings {
    pub client: ClientSettings,
    pub network: NetworkSettings,
    pub storage: StorageSettings,
    pub lifecycle: LifecycleSettings,
    pub metrics: MetricsSettings,
}

/// VBoxManage discovery and per-call deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Candidate executables, probed in order
    pub candidates: Vec<PathBuf>,
    /// Deadline for listings, version and counter queries
    pub query_timeout_secs: u64,
    /// Deadline for configuration changes
    pub mutation_timeout_secs: u64,
    /// Deadline for start, ACPI shutdown and power-off
    pub power_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            query_timeout_secs: 10,
            mutation_timeout_secs: 30,
            power_timeout_secs: 90,
        }
    }
}

impl ClientSettings {
    /// Deadline for a command of the given class.
    pub fn timeout_for(&self, kind: CommandKind) -> Duration {
        let secs = match kind {
            CommandKind::Query => self.query_timeout_secs,
            CommandKind::Mutation => self.mutation_timeout_secs,
            CommandKind::Power => self.power_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

fn default_candidates() -> Vec<PathBuf> {
    [
        "VBoxManage",
        "/usr/bin/VBoxManage",
        "/usr/local/bin/VBoxManage",
        "/Applications/VirtualBox.app/Contents/MacOS/VBoxManage",
        "C:\\Program Files\\Oracle\\VirtualBox\\VBoxManage.exe",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// Adapter names and addresses used when wiring VM networking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Physical adapter for bridged mode
    pub bridge_adapter: String,
    /// Host-only adapter name
    pub host_only_adapter: String,
    /// Isolated NAT network name
    pub nat_network: String,
    /// Host address the SSH forward binds to
    pub host_address: String,
    /// Guest address on the default NAT network
    pub guest_ip: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bridge_adapter: "en0".to_string(),
            host_only_adapter: "VirtualBox Host-Only Ethernet Adapter".to_string(),
            nat_network: "NatNetwork".to_string(),
            host_address: DEFAULT_HOST_ADDRESS.to_string(),
            guest_ip: DEFAULT_GUEST_IP.to_string(),
        }
    }
}

/// Where disk images live.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for `<name>.vdi` files; the working directory when unset
    pub storage_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolve the storage directory, falling back to the working directory.
    pub fn resolve_dir(&self) -> std::io::Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }
}

/// Waits used by the lifecycle controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Wait after the ACPI signal before checking whether the VM stopped
    pub stop_grace_secs: u64,
    /// Wait after a forced power-off before unregistering
    pub delete_settle_secs: u64,
    /// Optional wait after a successful start
    pub start_settle_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: 10,
            delete_settle_secs: 5,
            start_settle_secs: 0,
        }
    }
}

impl LifecycleSettings {
    /// All waits zeroed; used by tests.
    pub fn immediate() -> Self {
        Self {
            stop_grace_secs: 0,
            delete_settle_secs: 0,
            start_settle_secs: 0,
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn delete_settle(&self) -> Duration {
        Duration::from_secs(self.delete_settle_secs)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_secs(self.start_settle_secs)
    }
}

/// Metrics collection bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Overall deadline for the counter query and parse
    pub timeout_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

impl MetricsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
