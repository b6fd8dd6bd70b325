//! Command-line argument parsing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vmforge_hypervisor::{GraphicsController, SecondaryNetwork, VmSpec};

/// vmforge - VirtualBox VM provisioning and lifecycle
#[derive(Parser, Debug)]
#[command(name = "vmforge")]
#[command(about = "vmforge - VirtualBox VM provisioning and lifecycle")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to ./vmforge.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// VBoxManage executable to use instead of probing the usual locations
    #[arg(long, env = "VMFORGE_VBOXMANAGE")]
    pub vboxmanage: Option<PathBuf>,

    /// Directory for disk images (defaults to the working directory)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision a new VM
    Create(CreateArgs),
    /// Boot a VM headless
    Start { name: String },
    /// ACPI shutdown, forcing power-off if the guest ignores it
    Stop { name: String },
    /// Remove a VM and its disk
    Delete { name: String },
    /// Show state, SSH endpoint and hypervisor details
    Info(LookupArgs),
    /// Show the SSH command for a VM
    Ssh(LookupArgs),
    /// List registered VMs
    List,
    /// Print usage metrics as JSON
    Metrics { name: String },
}

impl Command {
    /// Name of the VM the verb targets, if any.
    pub fn vm_name(&self) -> Option<&str> {
        match self {
            Self::Create(args) => Some(&args.name),
            Self::Start { name } | Self::Stop { name } | Self::Delete { name } => Some(name),
            Self::Metrics { name } => Some(name),
            Self::Info(args) | Self::Ssh(args) => Some(&args.name),
            Self::List => None,
        }
    }
}

/// Positional arguments for `create`. Empty strings count as absent.
#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    pub name: String,
    /// Logical OS key (ubuntu, debian, windows11, ...)
    pub os: String,
    pub cpu: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    /// Install media path
    pub iso: Option<String>,
    /// Secondary network: none, bridged, hostonly, natnetwork
    pub network: Option<String>,
    /// Graphics controller: vmsvga, vboxsvga, vboxvga, none
    pub graphics: Option<String>,
    /// Video memory in MB
    pub vram: Option<String>,
    /// Persistent numeric identifier used for the SSH port
    pub id: Option<String>,
}

impl CreateArgs {
    /// Build the VM specification.
    pub fn to_spec(&self) -> Result<VmSpec> {
        let mut spec = VmSpec::new(self.name.clone(), self.os.clone())
            .with_cpu(self.cpu)
            .with_ram_gb(self.ram_gb)
            .with_storage_gb(self.storage_gb);

        if let Some(iso) = present(&self.iso) {
            spec = spec.with_install_media(iso);
        }
        if let Some(network) = present(&self.network) {
            spec = spec.with_secondary_network(network.parse::<SecondaryNetwork>()?);
        }
        if let Some(graphics) = present(&self.graphics) {
            spec = spec.with_graphics(graphics.parse::<GraphicsController>()?);
        }
        if let Some(vram) = present(&self.vram) {
            let vram = vram
                .parse::<u32>()
                .with_context(|| format!("invalid VRAM size '{}'", vram))?;
            spec = spec.with_vram_mb(vram);
        }
        if let Some(id) = parse_identifier(&self.id)? {
            spec = spec.with_identifier(id);
        }
        Ok(spec)
    }
}

/// Arguments for verbs that only need to find a VM.
#[derive(clap::Args, Debug)]
pub struct LookupArgs {
    pub name: String,
    /// OS key, used to pick the SSH login
    #[arg(long)]
    pub os: Option<String>,
    /// Persistent numeric identifier used for the SSH port
    #[arg(long)]
    pub id: Option<String>,
}

impl LookupArgs {
    pub fn os(&self) -> &str {
        present(&self.os).unwrap_or("linux")
    }

    pub fn identifier(&self) -> Result<Option<u32>> {
        parse_identifier(&self.id)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_identifier(value: &Option<String>) -> Result<Option<u32>> {
    present(value)
        .map(|id| {
            id.parse::<u32>()
                .with_context(|| format!("invalid identifier '{}'", id))
        })
        .transpose()
}
