//! Guest OS templates: logical OS keys mapped to VirtualBox guest types.
//!
//! Every supported key resolves to a [`GuestOsTemplate`] carrying the
//! `--ostype` identifier VirtualBox uses to tune its defaults and the login
//! account the image ships with.
//!
//! ## Fallback
//!
//! Unknown keys resolve to [`GuestOs::Linux`] (`Linux_64`). The lookup
//! result says so through [`OsLookup::fell_back`]; the provisioning pipeline
//! logs a warning and records it in its report.
//!
//! ```rust
//! use vmforge_hypervisor::guest_os::{GuestOs, OsLookup};
//!
//! let lookup = OsLookup::resolve("Ubuntu");
//! assert_eq!(lookup.os, GuestOs::Ubuntu);
//! assert_eq!(lookup.template().os_type, "Ubuntu_64");
//! ```

use serde::{Deserialize, Serialize};

/// Supported guest operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestOs {
    // Linux variants
    Ubuntu,
    Debian,
    /// CentOS and other RHEL rebuilds
    CentOs,
    Fedora,
    ArchLinux,
    OpenSuse,
    Gentoo,
    /// Generic 64-bit Linux, the fallback entry
    Linux,
    Oracle,

    // Windows variants
    /// Windows Server 2019
    Windows,
    Windows10,
    Windows11,

    // Others
    FreeBsd,
    Solaris,
}

/// Hypervisor-facing data for a guest OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuestOsTemplate {
    /// VirtualBox `--ostype` identifier
    pub os_type: &'static str,
    /// Default login account of the guest image
    pub default_user: &'static str,
}

impl GuestOs {
    /// Every entry, in table order.
    pub const ALL: [GuestOs; 14] = [
        Self::Ubuntu,
        Self::Debian,
        Self::CentOs,
        Self::Fedora,
        Self::ArchLinux,
        Self::OpenSuse,
        Self::Gentoo,
        Self::Linux,
        Self::Oracle,
        Self::Windows,
        Self::Windows10,
        Self::Windows11,
        Self::FreeBsd,
        Self::Solaris,
    ];

    /// Entry used for unrecognised keys.
    pub const FALLBACK: GuestOs = GuestOs::Linux;

    /// Parse a logical OS key, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "ubuntu" => Some(Self::Ubuntu),
            "debian" => Some(Self::Debian),
            "centos" | "rhel" | "redhat" => Some(Self::CentOs),
            "fedora" => Some(Self::Fedora),
            "archlinux" | "arch" => Some(Self::ArchLinux),
            "opensuse" | "suse" => Some(Self::OpenSuse),
            "gentoo" => Some(Self::Gentoo),
            "linux" => Some(Self::Linux),
            "oracle" => Some(Self::Oracle),
            "windows" | "windows_server" => Some(Self::Windows),
            "windows10" | "win10" => Some(Self::Windows10),
            "windows11" | "win11" => Some(Self::Windows11),
            "freebsd" => Some(Self::FreeBsd),
            "solaris" => Some(Self::Solaris),
            _ => None,
        }
    }

    /// Canonical key for this entry.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::CentOs => "centos",
            Self::Fedora => "fedora",
            Self::ArchLinux => "archlinux",
            Self::OpenSuse => "opensuse",
            Self::Gentoo => "gentoo",
            Self::Linux => "linux",
            Self::Oracle => "oracle",
            Self::Windows => "windows",
            Self::Windows10 => "windows10",
            Self::Windows11 => "windows11",
            Self::FreeBsd => "freebsd",
            Self::Solaris => "solaris",
        }
    }

    /// Template for this entry.
    pub fn template(&self) -> GuestOsTemplate {
        let (os_type, default_user) = match self {
            Self::Ubuntu => ("Ubuntu_64", "ubuntu"),
            Self::Debian => ("Debian_64", "debian"),
            Self::CentOs => ("RedHat_64", "centos"),
            Self::Fedora => ("Fedora_64", "fedora"),
            Self::ArchLinux => ("ArchLinux_64", "arch"),
            Self::OpenSuse => ("openSUSE_64", "opensuse"),
            Self::Gentoo => ("Gentoo_64", "gentoo"),
            Self::Linux => ("Linux_64", "linux"),
            Self::Oracle => ("Oracle_64", "oracle"),
            Self::Windows => ("Windows2019_64", "administrator"),
            Self::Windows10 => ("Windows10_64", "administrator"),
            Self::Windows11 => ("Windows11_64", "administrator"),
            Self::FreeBsd => ("FreeBSD_64", "freebsd"),
            Self::Solaris => ("Solaris_64", "solaris"),
        };
        GuestOsTemplate {
            os_type,
            default_user,
        }
    }

    /// Is this a Windows guest?
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows | Self::Windows10 | Self::Windows11)
    }
}

/// Result of resolving a logical OS key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsLookup {
    /// Key as the caller supplied it
    pub requested: String,
    pub os: GuestOs,
    /// True when `requested` was not recognised and [`GuestOs::FALLBACK`]
    /// was substituted
    pub fell_back: bool,
}

impl OsLookup {
    /// Resolve a key, falling back to the generic Linux entry.
    pub fn resolve(key: &str) -> Self {
        match GuestOs::from_key(key) {
            Some(os) => Self {
                requested: key.to_string(),
                os,
                fell_back: false,
            },
            None => Self {
                requested: key.to_string(),
                os: GuestOs::FALLBACK,
                fell_back: true,
            },
        }
    }

    pub fn template(&self) -> GuestOsTemplate {
        self.os.template()
    }
}
