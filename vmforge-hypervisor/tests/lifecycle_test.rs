//! Integration tests for provisioning, lifecycle and metrics.
//!
//! Everything runs against `MockVBoxManage` with a temporary storage
//! directory and zeroed lifecycle delays.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use vmforge_hypervisor::config::{LifecycleSettings, MetricsSettings, StorageSettings};
use vmforge_hypervisor::metrics::{CPU_RANGE, DISK_RANGE, MEMORY_RANGE, NETWORK_RANGE};
use vmforge_hypervisor::{
    BootOrder, HypervisorError, HypervisorSettings, LifecycleController, MetricsCollector,
    MockVBoxManage, OperationOutcome, PortStrategy, StepOutcome, StopOutcome, VBoxManage,
    VmMetrics, VmSpec, VmStatus,
};

struct Harness {
    mock: Arc<MockVBoxManage>,
    client: VBoxManage,
    lifecycle: LifecycleController,
    dir: TempDir,
}

fn harness(mock: MockVBoxManage) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(mock);
    let client = VBoxManage::new(mock.clone());
    let settings = HypervisorSettings {
        storage: StorageSettings {
            storage_dir: Some(dir.path().to_path_buf()),
        },
        lifecycle: LifecycleSettings::immediate(),
        ..Default::default()
    };
    let lifecycle = LifecycleController::new(client.clone(), &settings).expect("controller");
    Harness {
        mock,
        client,
        lifecycle,
        dir,
    }
}

fn collector(h: &Harness, seed: u64) -> MetricsCollector {
    MetricsCollector::with_rng(
        h.client.clone(),
        MetricsSettings::default(),
        StdRng::seed_from_u64(seed),
    )
}

/// End to end: test1 / ubuntu / 2 CPU / 4 GB / 20 GB / identifier 7, no media.
#[tokio::test]
async fn test_provision_end_to_end() {
    let h = harness(MockVBoxManage::new());
    let spec = VmSpec::new("test1", "ubuntu")
        .with_cpu(2)
        .with_ram_gb(4)
        .with_storage_gb(20)
        .with_identifier(7);

    let report = h.lifecycle.create(&spec).await.expect("provision");

    assert_eq!(report.boot_order, BootOrder::DiskOnly);
    assert_eq!(report.ssh.to_string(), "127.0.0.1:2207 -> 10.0.2.15:22");
    assert_eq!(report.ssh.strategy, PortStrategy::Identifier(7));
    assert_eq!(report.ssh.command(), "ssh ubuntu@127.0.0.1 -p 2207");
    assert_eq!(report.os_type, "Ubuntu_64");
    assert_eq!(report.warnings(), 0);
    assert!(report.steps.iter().all(|s| s.outcome == StepOutcome::Ok));

    assert!(h.mock.vm_exists("test1"));
    assert!(!h.mock.vm_running("test1"));
    assert!(h.dir.path().join("test1.vdi").exists());
    assert_eq!(report.disk_path, h.dir.path().join("test1.vdi"));

    assert_eq!(h.mock.count_calls(&["--memory", "4096"]), 1);
    assert_eq!(h.mock.count_calls(&["--cpus", "2"]), 1);
    assert_eq!(h.mock.count_calls(&["--size", "20480"]), 1);
    assert_eq!(
        h.mock.count_calls(&["--natpf1", "ssh,tcp,127.0.0.1,2207,10.0.2.15,22"]),
        1
    );
    assert_eq!(h.mock.count_calls(&["--boot1", "disk"]), 1);
    assert_eq!(h.mock.count_calls(&["--vrde", "off"]), 1);
}

#[tokio::test]
async fn test_missing_media_boots_from_disk_only() {
    let h = harness(MockVBoxManage::new());
    let missing = h.dir.path().join("nowhere.iso");
    let spec = VmSpec::new("nomedia", "debian").with_install_media(&missing);

    let report = h.lifecycle.create(&spec).await.expect("provision");

    assert_eq!(report.boot_order, BootOrder::DiskOnly);
    assert_eq!(h.mock.count_calls(&["IDE Controller"]), 0);
    assert_eq!(h.mock.count_calls(&["dvddrive"]), 0);
    assert_eq!(h.mock.count_calls(&["--boot2"]), 0);
}

#[tokio::test]
async fn test_create_existing_name_mutates_nothing() {
    let h = harness(MockVBoxManage::new().with_vm("taken", true));
    let err = h
        .lifecycle
        .create(&VmSpec::new("taken", "ubuntu"))
        .await
        .unwrap_err();

    assert!(matches!(err, HypervisorError::AlreadyExists(_)));
    assert!(h.mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_start_then_stop_gracefully() {
    let h = harness(MockVBoxManage::new().with_vm("web", false));

    h.lifecycle.start("web").await.expect("start");
    assert!(h.mock.vm_running("web"));
    assert_eq!(h.mock.count_calls(&["startvm", "headless"]), 1);

    assert_eq!(h.lifecycle.stop("web").await.expect("stop"), StopOutcome::Graceful);
    assert!(!h.mock.vm_running("web"));
}

#[tokio::test]
async fn test_stop_escalates_exactly_once() {
    let h = harness(MockVBoxManage::new().with_vm("stubborn", true).ignore_acpi());

    let outcome = h.lifecycle.stop("stubborn").await.expect("stop");

    assert_eq!(outcome, StopOutcome::Forced);
    assert_eq!(h.mock.count_calls(&["acpipowerbutton"]), 1);
    assert_eq!(h.mock.count_calls(&["poweroff"]), 1);
    assert!(!h.mock.vm_running("stubborn"));
}

#[tokio::test]
async fn test_stop_reports_failed_power_off() {
    let h = harness(
        MockVBoxManage::new()
            .with_vm("stuck", true)
            .ignore_acpi()
            .fail_on("poweroff"),
    );

    let result = h.lifecycle.stop("stuck").await;
    let outcome = OperationOutcome::from_result(&result, |o| o.to_string());

    assert!(!outcome.success);
    assert_eq!(outcome.status(VmStatus::Stopped), VmStatus::Error);
    assert_eq!(h.mock.count_calls(&["poweroff"]), 1);
}

#[tokio::test]
async fn test_delete_removes_disk_file() {
    let h = harness(MockVBoxManage::new());
    let spec = VmSpec::new("gone", "fedora").with_storage_gb(10);
    h.lifecycle.create(&spec).await.expect("provision");
    h.lifecycle.start("gone").await.expect("start");
    let disk = h.dir.path().join("gone.vdi");
    assert!(disk.exists());

    let report = h.lifecycle.delete("gone").await.expect("delete");

    assert!(report.powered_off);
    assert!(report.disk_removed);
    assert!(!disk.exists());
    assert!(!h.mock.vm_exists("gone"));
}

#[tokio::test]
async fn test_delete_without_disk_file_succeeds() {
    let h = harness(MockVBoxManage::new().with_vm("bare", false));

    let report = h.lifecycle.delete("bare").await.expect("delete");

    assert!(!report.powered_off);
    assert!(!report.disk_removed);
    assert_eq!(h.mock.count_calls(&["poweroff"]), 0);
}

#[tokio::test]
async fn test_failed_unregister_keeps_disk() {
    let h = harness(MockVBoxManage::new().with_vm("keep", false).fail_on("unregistervm"));
    let disk = h.dir.path().join("keep.vdi");
    std::fs::write(&disk, b"data").expect("write disk");

    let err = h.lifecycle.delete("keep").await.unwrap_err();

    assert!(matches!(err, HypervisorError::CommandFailed { .. }));
    assert!(disk.exists());
}

#[tokio::test]
async fn test_metrics_for_stopped_vm_are_zero() {
    let h = harness(MockVBoxManage::new().with_vm("idle", false));

    let m = collector(&h, 1).collect("idle").await;

    assert!(m.success);
    assert!(!m.is_running);
    assert_eq!(
        (m.cpu_usage, m.memory_usage, m.disk_usage, m.network_usage),
        (0.0, 0.0, 0.0, 0.0)
    );
    assert_eq!(h.mock.count_calls(&["metrics"]), 0);
}

#[tokio::test]
async fn test_metrics_unparsable_counters_fall_in_ranges() {
    let h = harness(
        MockVBoxManage::new()
            .with_vm("busy", true)
            .with_metrics_output("garbage without any counters\n"),
    );
    let metrics = collector(&h, 99);

    for _ in 0..20 {
        let m = metrics.collect("busy").await;
        assert!(m.success && m.is_running);
        assert!(CPU_RANGE.contains(&m.cpu_usage), "cpu {}", m.cpu_usage);
        assert!(MEMORY_RANGE.contains(&m.memory_usage), "mem {}", m.memory_usage);
        assert!(DISK_RANGE.contains(&m.disk_usage), "disk {}", m.disk_usage);
        assert!(NETWORK_RANGE.contains(&m.network_usage), "net {}", m.network_usage);
    }
}

#[tokio::test]
async fn test_metrics_use_parsed_counters() {
    let h = harness(MockVBoxManage::new().with_vm("busy", true).with_metrics_output(
        "busy  Guest/CPU/Load/User  42.0%\n\
         busy  Guest/RAM/Usage/Total  1024 MB\n\
         busy  Guest/Net/Rate/Rx  3 MB/s\n",
    ));

    let m = collector(&h, 5).collect("busy").await;

    assert_eq!(m.cpu_usage, 42.0);
    assert_eq!(m.memory_usage, 10.0);
    assert_eq!(m.network_usage, 3.0);
    assert!(DISK_RANGE.contains(&m.disk_usage));
}

#[tokio::test]
async fn test_metrics_query_failure_is_synthetic() {
    let h = harness(MockVBoxManage::new().with_vm("busy", true).time_out_on("metrics"));

    let m = collector(&h, 3).collect("busy").await;

    assert!(m.success);
    assert!(CPU_RANGE.contains(&m.cpu_usage));
}

#[tokio::test]
async fn test_metrics_when_tool_unavailable() {
    let h = harness(MockVBoxManage::new().with_vm("any", true).unavailable());

    let m = collector(&h, 0).collect("any").await;

    assert_eq!(
        VmMetrics {
            timestamp: m.timestamp,
            ..VmMetrics::unavailable()
        },
        m
    );
}

#[tokio::test]
async fn test_metrics_for_missing_vm() {
    let h = harness(MockVBoxManage::new());
    let m = collector(&h, 0).collect("ghost").await;
    assert!(!m.success);
    assert_eq!(m.cpu_usage, 0.0);
}
