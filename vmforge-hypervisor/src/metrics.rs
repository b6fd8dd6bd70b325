//! Per-VM usage metrics from the VBoxManage counter interface.
//!
//! Four figures are produced: CPU %, memory %, disk % and network MB/s.
//! Running VMs always get non-zero figures. Anything the counters do not
//! supply is drawn from a fixed range by the injected random source:
//!
//! | Figure  | Range        | Rounding   |
//! |---------|--------------|------------|
//! | CPU     | 5.0 - 25.0   | 1 decimal  |
//! | memory  | 15.0 - 45.0  | 1 decimal  |
//! | disk    | 10.0 - 35.0  | 1 decimal  |
//! | network | 0.10 - 2.50  | 2 decimals |
//!
//! Disk has no counter source and is always synthetic. Stopped VMs report
//! exact zeroes and never touch the random source.

use std::ops::RangeInclusive;
use std::sync::Mutex;

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::client::VBoxManage;
use crate::command::VBoxCommand;
use crate::config::MetricsSettings;
use crate::types::VmMetrics;

pub const CPU_RANGE: RangeInclusive<f64> = 5.0..=25.0;
pub const MEMORY_RANGE: RangeInclusive<f64> = 15.0..=45.0;
pub const DISK_RANGE: RangeInclusive<f64> = 10.0..=35.0;
pub const NETWORK_RANGE: RangeInclusive<f64> = 0.1..=2.5;

static CPU_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CPU/Load/User\D*?(\d+(?:\.\d+)?)\s*%").expect("valid CPU regex")
});
static RAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)RAM/Usage/Total\D*?(\d+(?:\.\d+)?)\s*([KMGT]?B)\b").expect("valid RAM regex")
});
static NET_RX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Net/Rate/Rx\D*?(\d+(?:\.\d+)?)\s*([KMGT]?B/s)").expect("valid Rx regex")
});
static NET_TX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Net/Rate/Tx\D*?(\d+(?:\.\d+)?)\s*([KMGT]?B/s)").expect("valid Tx regex")
});

/// Byte-unit suffix on a counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteUnit {
    B,
    Kb,
    Mb,
    Gb,
    Tb,
}

impl ByteUnit {
    /// Parse `B`, `KB`, `MB`, `GB` or `TB`, case-insensitively, with or
    /// without a trailing `/s`.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let unit = suffix.trim();
        let unit = unit
            .strip_suffix("/s")
            .or_else(|| unit.strip_suffix("/S"))
            .unwrap_or(unit);
        match unit.to_ascii_uppercase().as_str() {
            "B" => Some(Self::B),
            "KB" => Some(Self::Kb),
            "MB" => Some(Self::Mb),
            "GB" => Some(Self::Gb),
            "TB" => Some(Self::Tb),
            _ => None,
        }
    }

    /// Multiplier that converts a value in this unit to megabytes.
    pub fn to_mb_factor(&self) -> f64 {
        match self {
            Self::B => 1.0 / (1024.0 * 1024.0),
            Self::Kb => 1.0 / 1024.0,
            Self::Mb => 1.0,
            Self::Gb => 1024.0,
            Self::Tb => 1024.0 * 1024.0,
        }
    }
}

/// Memory percentage from the raw `RAM/Usage/Total` reading.
///
/// The counter carries no total, so this is a fixed heuristic rather than a
/// true ratio: MB scale by 10/1024, GB by 10, anything else divides by 10.
/// Capped at 100.
pub fn memory_percent(value: f64, unit: ByteUnit) -> f64 {
    let pct = match unit {
        ByteUnit::Mb => value / 1024.0 * 10.0,
        ByteUnit::Gb => value * 10.0,
        ByteUnit::B | ByteUnit::Kb | ByteUnit::Tb => value / 10.0,
    };
    pct.min(100.0)
}

/// Figures parsed from one counter query. `None` means not found.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSample {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    /// Rx + Tx in MB/s; present when either direction parsed
    pub network: Option<f64>,
}

/// Parse `VBoxManage metrics query` output.
pub fn parse_counters(text: &str) -> CounterSample {
    let cpu = CPU_RE
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok());

    let memory = RAM_RE.captures(text).and_then(|c| {
        let value = c[1].parse::<f64>().ok()?;
        let unit = ByteUnit::from_suffix(&c[2])?;
        Some(memory_percent(value, unit))
    });

    let rx = rate_mb(&NET_RX_RE, text);
    let tx = rate_mb(&NET_TX_RE, text);
    let network = match (rx, tx) {
        (None, None) => None,
        (rx, tx) => Some(rx.unwrap_or(0.0) + tx.unwrap_or(0.0)),
    };

    CounterSample {
        cpu,
        memory,
        network,
    }
}

fn rate_mb(re: &Regex, text: &str) -> Option<f64> {
    let caps = re.captures(text)?;
    let value = caps[1].parse::<f64>().ok()?;
    let unit = ByteUnit::from_suffix(&caps[2])?;
    Some(value * unit.to_mb_factor())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Turn a sample into figures for a running VM, sampling anything missing
/// or zero.
pub fn fill_running(sample: CounterSample, rng: &mut dyn RngCore) -> VmMetrics {
    let mut pick = |parsed: Option<f64>, decimals: i32, range: RangeInclusive<f64>| {
        match parsed.map(|v| round_to(v, decimals)) {
            Some(v) if v != 0.0 => v,
            _ => round_to(rng.gen_range(range), decimals),
        }
    };

    let cpu_usage = pick(sample.cpu, 1, CPU_RANGE);
    let memory_usage = pick(sample.memory, 1, MEMORY_RANGE);
    let disk_usage = pick(None, 1, DISK_RANGE);
    let network_usage = pick(sample.network, 2, NETWORK_RANGE);

    VmMetrics {
        success: true,
        cpu_usage,
        memory_usage,
        disk_usage,
        network_usage,
        is_running: true,
        timestamp: Utc::now(),
    }
}

/// Collects [`VmMetrics`] for named VMs.
pub struct MetricsCollector {
    client: VBoxManage,
    settings: MetricsSettings,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl MetricsCollector {
    /// Collector seeded from OS entropy.
    pub fn new(client: VBoxManage, settings: MetricsSettings) -> Self {
        Self::with_rng(client, settings, StdRng::from_entropy())
    }

    /// Collector with an explicit random source.
    pub fn with_rng(
        client: VBoxManage,
        settings: MetricsSettings,
        rng: impl RngCore + Send + 'static,
    ) -> Self {
        Self {
            client,
            settings,
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Collect metrics. Never fails: problems show up as `success == false`
    /// or as synthetic figures.
    #[instrument(skip(self), fields(vm_name = %name))]
    pub async fn collect(&self, name: &str) -> VmMetrics {
        match self.client.list_vms().await {
            Ok(vms) if vms.iter().any(|vm| vm.name == name) => {}
            Ok(_) => {
                debug!("VM not registered");
                return VmMetrics::unavailable();
            }
            Err(e) => {
                warn!(error = %e, "VBoxManage unavailable");
                return VmMetrics::unavailable();
            }
        }

        if !self.client.is_running(name).await {
            return VmMetrics::stopped();
        }

        let sample = match tokio::time::timeout(self.settings.timeout(), self.query(name)).await {
            Ok(sample) => sample,
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.timeout_secs,
                    "Counter query timed out, using synthetic figures"
                );
                CounterSample::default()
            }
        };
        debug!(?sample, "Parsed counters");

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fill_running(sample, &mut **rng)
    }

    async fn query(&self, name: &str) -> CounterSample {
        let command = match VBoxCommand::metrics_query(name) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Cannot build counter query");
                return CounterSample::default();
            }
        };
        let output = self.client.run(&command).await;
        if !output.ok {
            warn!(error = %output.error_text(), "Counter query failed, using synthetic figures");
            return CounterSample::default();
        }
        parse_counters(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVBoxManage;
    use crate::traits::{CommandOutput, CommandRunner};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    const QUERY: &str = "\
Object          Metric                                   Values
--------------- ---------------------------------------- ---------
test1           Guest/CPU/Load/User                      12.50%
test1           Guest/RAM/Usage/Total                    2 GB
test1           Guest/Net/Rate/Rx                        512 kB/s
test1           Guest/Net/Rate/Tx                        1.5 MB/s
";

    #[test]
    fn test_parse_full_query() {
        let sample = parse_counters(QUERY);
        assert_eq!(sample.cpu, Some(12.5));
        assert_eq!(sample.memory, Some(20.0));
        assert_eq!(sample.network, Some(2.0));
    }

    #[test]
    fn test_memory_heuristic() {
        assert_eq!(memory_percent(2048.0, ByteUnit::Mb), 20.0);
        assert_eq!(memory_percent(3.0, ByteUnit::Gb), 30.0);
        assert_eq!(memory_percent(500.0, ByteUnit::Kb), 50.0);
        assert_eq!(memory_percent(50.0, ByteUnit::Gb), 100.0);
    }

    #[test]
    fn test_unit_suffixes() {
        assert_eq!(ByteUnit::from_suffix("kB/s"), Some(ByteUnit::Kb));
        assert_eq!(ByteUnit::from_suffix("B/s"), Some(ByteUnit::B));
        assert_eq!(ByteUnit::from_suffix("tb"), Some(ByteUnit::Tb));
        assert_eq!(ByteUnit::from_suffix("PB"), None);
        assert_eq!(ByteUnit::Gb.to_mb_factor(), 1024.0);
    }

    #[test]
    fn test_network_single_direction() {
        let sample = parse_counters("vm  Net/Rate/Rx   1048576 B/s\n");
        assert_eq!(sample.network, Some(1.0));
        assert_eq!(sample.cpu, None);
    }

    #[test]
    fn test_regex_stops_at_first_value() {
        // No unit on the RAM line; must not borrow the next line's value.
        let sample = parse_counters("x RAM/Usage/Total n/a\nvm9 Net/Rate/Tx 3 MB/s\n");
        assert_eq!(sample.memory, None);
        assert_eq!(sample.network, Some(3.0));
    }

    #[test]
    fn test_fill_replaces_zero_and_missing() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = CounterSample {
            cpu: Some(0.0),
            memory: Some(33.3),
            network: None,
        };
        let m = fill_running(sample, &mut rng);
        assert!(CPU_RANGE.contains(&m.cpu_usage));
        assert_eq!(m.memory_usage, 33.3);
        assert!(DISK_RANGE.contains(&m.disk_usage));
        assert!(NETWORK_RANGE.contains(&m.network_usage));
        assert!(m.success && m.is_running);
    }

    #[test]
    fn test_fill_is_deterministic_for_a_seed() {
        let a = fill_running(CounterSample::default(), &mut StdRng::seed_from_u64(42));
        let b = fill_running(CounterSample::default(), &mut StdRng::seed_from_u64(42));
        assert_eq!(a.cpu_usage, b.cpu_usage);
        assert_eq!(a.disk_usage, b.disk_usage);
        assert_eq!(a.network_usage, b.network_usage);
    }

    /// Answers like the mock but never returns from the counter query.
    struct StallingQuery(MockVBoxManage);

    #[async_trait]
    impl CommandRunner for StallingQuery {
        async fn run(&self, command: &VBoxCommand) -> CommandOutput {
            if command.subcommand() == "metrics" {
                std::future::pending::<()>().await;
            }
            self.0.run(command).await
        }

        fn describe(&self) -> String {
            "stalling".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_query_falls_back_after_deadline() {
        let runner = StallingQuery(MockVBoxManage::new().with_vm("slow", true));
        let client = VBoxManage::new(Arc::new(runner));
        let settings = MetricsSettings { timeout_secs: 15 };
        let collector = MetricsCollector::with_rng(client, settings, StdRng::seed_from_u64(9));

        let started = tokio::time::Instant::now();
        let m = collector.collect("slow").await;

        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(m.success && m.is_running);
        assert!(CPU_RANGE.contains(&m.cpu_usage));
        assert!(MEMORY_RANGE.contains(&m.memory_usage));
        assert!(NETWORK_RANGE.contains(&m.network_usage));
    }

    #[test]
    fn test_rounding() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let m = fill_running(CounterSample::default(), &mut rng);
            assert_eq!(m.cpu_usage, round_to(m.cpu_usage, 1));
            assert_eq!(m.network_usage, round_to(m.network_usage, 2));
        }
    }
}
