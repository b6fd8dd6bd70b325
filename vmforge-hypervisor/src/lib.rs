//! # vmforge Hypervisor
//!
//! VirtualBox orchestration core, driven through the `VBoxManage` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐   ┌───────────────────────┐
//! │  LifecycleController  │   │   MetricsCollector    │
//! │ (start, stop, delete) │   │ (counters + fallback) │
//! └───────────┬───────────┘   └───────────┬───────────┘
//!             │ create                    │
//!             ▼                           │
//! ┌───────────────────────┐               │
//! │      Provisioner      │── guest_os    │
//! │   (ordered steps)     │── ports       │
//! └───────────┬───────────┘               │
//!             ▼                           ▼
//! ┌─────────────────────────────────────────────────┐
//! │    VBoxManage client (Arc<dyn CommandRunner>)    │
//! └─────────────┬───────────────────────┬───────────┘
//!               ▼                       ▼
//!      ┌─────────────────┐     ┌─────────────────┐
//!      │  ProcessRunner  │     │ MockVBoxManage  │
//!      │ (real binary)   │     │    (tests)      │
//!      └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmforge_hypervisor::{HypervisorSettings, LifecycleController, MockVBoxManage, VBoxManage, VmSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = VBoxManage::new(Arc::new(MockVBoxManage::new()));
//!     let lifecycle = LifecycleController::new(client, &HypervisorSettings::default()).unwrap();
//!
//!     let spec = VmSpec::new("web-01", "ubuntu").with_cpu(2).with_ram_gb(4).with_storage_gb(20);
//!     let report = lifecycle.create(&spec).await.unwrap();
//!     println!("{}", report.ssh.command());
//!     lifecycle.start("web-01").await.unwrap();
//! }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod guest_os;
pub mod lifecycle;
pub mod metrics;
pub mod mock;
pub mod ports;
pub mod provision;
pub mod traits;
pub mod types;

pub use client::{parse_vm_list, ProcessRunner, VBoxManage};
pub use command::{CommandKind, VBoxCommand, VmSetting};
pub use config::HypervisorSettings;
pub use error::{HypervisorError, Result};
pub use guest_os::{GuestOs, GuestOsTemplate, OsLookup};
pub use lifecycle::{DeleteReport, LifecycleController, StopOutcome};
pub use metrics::MetricsCollector;
pub use mock::MockVBoxManage;
pub use ports::{port_for, PortStrategy, SshEndpoint};
pub use provision::Provisioner;
pub use traits::{CommandOutput, CommandRunner};
pub use types::*;
