//! Host port allocation for SSH forwarding.
//!
//! Ports are derived, never stored: `host_port = 2200 + identifier`. Two
//! strategies produce the identifier:
//!
//! - [`PortStrategy::Identifier`] uses the persistent numeric ID assigned by
//!   the record store. Distinct IDs give distinct ports.
//! - [`PortStrategy::NameHash`] derives a pseudo-ID in `[10, 109]` from the
//!   VM name, for invocations that happen before a record exists.
//!
//! The two ranges overlap, so a name-hash port can equal an identifier port.
//! [`PortStrategy::for_vm`] only uses the name hash when no identifier is
//! known.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

/// First host port; identifier 0 maps here.
pub const BASE_SSH_PORT: u16 = 2200;

/// Largest identifier that still yields a valid TCP port.
pub const MAX_IDENTIFIER: u32 = (u16::MAX - BASE_SSH_PORT) as u32;

/// Guest address VirtualBox hands out on the default NAT network.
pub const DEFAULT_GUEST_IP: &str = "10.0.2.15";

/// Host address the forwarded port binds to.
pub const DEFAULT_HOST_ADDRESS: &str = "127.0.0.1";

/// SSH port inside the guest.
pub const GUEST_SSH_PORT: u16 = 22;

/// Map a persistent identifier to its host port.
pub fn port_for(identifier: u32) -> Result<u16> {
    if identifier > MAX_IDENTIFIER {
        return Err(HypervisorError::InvalidConfig(format!(
            "identifier {} is out of range (0..={})",
            identifier, MAX_IDENTIFIER
        )));
    }
    // Bounded above, cannot overflow.
    Ok(BASE_SSH_PORT + identifier as u16)
}

/// Pseudo-identifier in `[10, 109]`: byte sum of the name, mod 100, plus 10.
///
/// Stable across processes and platforms.
pub fn name_hash_identifier(name: &str) -> u32 {
    let sum: u32 = name.bytes().map(u32::from).sum();
    sum % 100 + 10
}

/// How a VM's host port was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum PortStrategy {
    /// Persistent identifier from the record store
    Identifier(u32),
    /// Name-derived pseudo-identifier
    NameHash(u32),
}

impl PortStrategy {
    /// Prefer the persistent identifier; hash the name only without one.
    pub fn for_vm(name: &str, identifier: Option<u32>) -> Self {
        match identifier {
            Some(id) => Self::Identifier(id),
            None => Self::NameHash(name_hash_identifier(name)),
        }
    }

    /// The identifier fed into [`port_for`].
    pub fn identifier(&self) -> u32 {
        match self {
            Self::Identifier(id) | Self::NameHash(id) => *id,
        }
    }

    pub fn host_port(&self) -> Result<u16> {
        port_for(self.identifier())
    }
}

impl fmt::Display for PortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(id) => write!(f, "record identifier {}", id),
            Self::NameHash(id) => write!(f, "name hash {}", id),
        }
    }
}

/// Everything a client needs to reach a guest over the NAT port-forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub guest_ip: String,
    pub guest_port: u16,
    pub username: String,
    pub strategy: PortStrategy,
}

impl SshEndpoint {
    /// Build the endpoint for a VM.
    pub fn new(
        strategy: PortStrategy,
        username: impl Into<String>,
        host: impl Into<String>,
        guest_ip: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            port: strategy.host_port()?,
            guest_ip: guest_ip.into(),
            guest_port: GUEST_SSH_PORT,
            username: username.into(),
            strategy,
        })
    }

    /// Ready-to-run client command line.
    pub fn command(&self) -> String {
        format!("ssh {}@{} -p {}", self.username, self.host, self.port)
    }

    /// VBoxManage `--natpf1` rule: `ssh,tcp,<host>,<port>,<guest>,22`.
    pub fn nat_rule(&self) -> String {
        format!(
            "ssh,tcp,{},{},{},{}",
            self.host, self.port, self.guest_ip, self.guest_port
        )
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.host, self.port, self.guest_ip, self.guest_port
        )
    }
}
