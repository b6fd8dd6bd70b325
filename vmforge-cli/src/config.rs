//! Configuration management for the vmforge command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use vmforge_common::LogFormat;
use vmforge_hypervisor::HypervisorSettings;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// VBoxManage, networking, storage and timing settings
    pub hypervisor: HypervisorSettings,
}

impl Config {
    /// Looked up in the working directory when `--config` is not given.
    pub const DEFAULT_PATH: &'static str = "vmforge.yaml";

    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the explicit file, else the default file if present, else
    /// defaults. Returns the path that was read, if any.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let default_path = PathBuf::from(Self::DEFAULT_PATH);
        if default_path.exists() {
            return Ok((Self::load(&default_path)?, Some(default_path)));
        }
        Ok((Self::default(), None))
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.log_json {
            self.logging.format = LogFormat::Json.to_string();
        }

        if let Some(ref program) = args.vboxmanage {
            self.hypervisor.client.candidates = vec![program.clone()];
        }

        if let Some(ref dir) = args.storage_dir {
            self.hypervisor.storage.storage_dir = Some(dir.clone());
        }

        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format: pretty or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty.to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn log_format(&self) -> Result<LogFormat> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
logging:
  level: debug
hypervisor:
  client:
    power_timeout_secs: 120
  network:
    bridge_adapter: eth0
  storage:
    storage_dir: /var/lib/vmforge
  lifecycle:
    stop_grace_secs: 20
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.log_format().unwrap(), LogFormat::Pretty);
        assert_eq!(config.hypervisor.client.power_timeout_secs, 120);
        assert_eq!(config.hypervisor.client.query_timeout_secs, 10);
        assert_eq!(config.hypervisor.network.bridge_adapter, "eth0");
        assert_eq!(
            config.hypervisor.storage.storage_dir,
            Some(PathBuf::from("/var/lib/vmforge"))
        );
        assert_eq!(config.hypervisor.lifecycle.stop_grace_secs, 20);
        assert_eq!(config.hypervisor.lifecycle.delete_settle_secs, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmforge.yaml");
        std::fs::write(&path, "logging:\n  format: json\n").unwrap();

        let (config, source) = Config::resolve(Some(&path)).unwrap();
        assert_eq!(source, Some(path));
        assert_eq!(config.logging.log_format().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::resolve(Some(Path::new("/nonexistent/vmforge.yaml"))).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "vmforge",
            "--log-level",
            "trace",
            "--log-json",
            "--vboxmanage",
            "/opt/vbox/VBoxManage",
            "--storage-dir",
            "/data/vms",
            "list",
        ])
        .unwrap();

        let config = Config::default().with_cli_overrides(&args);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.log_format().unwrap(), LogFormat::Json);
        assert_eq!(
            config.hypervisor.client.candidates,
            vec![PathBuf::from("/opt/vbox/VBoxManage")]
        );
        assert_eq!(
            config.hypervisor.storage.storage_dir,
            Some(PathBuf::from("/data/vms"))
        );
    }
}
