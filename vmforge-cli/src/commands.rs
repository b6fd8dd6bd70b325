//! Verb dispatch: wire the hypervisor components and print results.
//!
//! Human-readable results go to stdout, errors to stderr. `metrics` prints
//! JSON and succeeds whenever it printed something.

use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info};

use vmforge_hypervisor::{
    HypervisorError, LifecycleController, MetricsCollector, OperationOutcome, ProvisionReport,
    VBoxManage, VmInfo, VmMetrics, VmState, VmSummary,
};

use crate::cli::Command;
use crate::config::Config;

/// Run one verb to completion.
pub async fn execute(command: Command, config: &Config) -> Result<ExitCode> {
    let settings = &config.hypervisor;

    let client = match VBoxManage::locate(settings.client.clone()).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "VBoxManage is not available");
            if let Command::Metrics { .. } = command {
                print_json(&VmMetrics::unavailable())?;
                return Ok(ExitCode::SUCCESS);
            }
            return Ok(emit(OperationOutcome::failed(e.to_string())));
        }
    };
    info!(vboxmanage = %client.describe(), verb = ?command, "Dispatching");

    let lifecycle = LifecycleController::new(client.clone(), settings)?;

    let outcome = match command {
        Command::Metrics { name } => {
            let metrics = MetricsCollector::new(client, settings.metrics.clone())
                .collect(&name)
                .await;
            print_json(&metrics)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Create(args) => {
            let spec = match args.to_spec() {
                Ok(spec) => spec,
                Err(e) => return Ok(emit(OperationOutcome::failed(format!("{:#}", e)))),
            };
            let result = lifecycle.create(&spec).await;
            if let Err(HypervisorError::StepFailed { step, .. }) = &result {
                error!(step = %step, "Provisioning aborted");
            }
            OperationOutcome::from_result(&result, describe_report)
        }
        Command::Start { name } => {
            let result = lifecycle.start(&name).await;
            OperationOutcome::from_result(&result, |_| format!("VM '{}' started", name))
        }
        Command::Stop { name } => {
            let result = lifecycle.stop(&name).await;
            OperationOutcome::from_result(&result, |o| format!("VM '{}' {}", name, o))
        }
        Command::Delete { name } => {
            let result = lifecycle.delete(&name).await;
            OperationOutcome::from_result(&result, |r| format!("VM '{}' {}", name, r))
        }
        Command::Info(args) => {
            let identifier = args.identifier()?;
            let result = lifecycle.info(&args.name, args.os(), identifier).await;
            OperationOutcome::from_result(&result, describe_info)
        }
        Command::Ssh(args) => {
            let identifier = args.identifier()?;
            let result = lifecycle.ssh_info(&args.name, args.os(), identifier).await;
            OperationOutcome::from_result(&result, |ssh| {
                format!("{}\n{} ({})", ssh.command(), ssh, ssh.strategy)
            })
        }
        Command::List => {
            let result = lifecycle.list().await;
            OperationOutcome::from_result(&result, |vms| describe_list(vms))
        }
    };

    Ok(emit(outcome))
}

fn emit(outcome: OperationOutcome) -> ExitCode {
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        eprintln!("Error: {}", outcome.message);
    }
    ExitCode::from(outcome.exit_code() as u8)
}

fn print_json(metrics: &VmMetrics) -> Result<()> {
    println!("{}", serde_json::to_string(metrics)?);
    Ok(())
}

fn describe_report(report: &ProvisionReport) -> String {
    let mut text = report.narrative();
    text.push_str(&format!(
        "\nVM '{}' created ({}, boot {:?})\nSSH: {} via {}\nDisk: {}",
        report.vm_name,
        report.os_type,
        report.boot_order,
        report.ssh,
        report.ssh.strategy,
        report.disk_path.display(),
    ));
    if report.warnings() > 0 {
        text.push_str(&format!("\n{} optional step(s) failed", report.warnings()));
    }
    text
}

fn describe_info(info: &VmInfo) -> String {
    let state = match info.state {
        VmState::Running => "running",
        VmState::Stopped => "stopped",
        VmState::Absent => "absent",
    };
    format!(
        "VM '{}': {}\nSSH: {} ({})\nDisk: {}{}\n\n{}",
        info.name,
        state,
        info.ssh,
        info.ssh.command(),
        info.disk_path.display(),
        if info.disk_present { "" } else { " (missing)" },
        info.details.trim_end(),
    )
}

fn describe_list(vms: &[VmSummary]) -> String {
    if vms.is_empty() {
        return "No VMs registered".to_string();
    }
    vms.iter()
        .map(|vm| {
            format!(
                "{:<24} {} {}",
                vm.name,
                vm.uuid,
                if vm.running { "running" } else { "stopped" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
