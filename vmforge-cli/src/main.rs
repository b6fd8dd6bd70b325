//! # vmforge
//!
//! Provisions, operates and tears down VirtualBox VMs through VBoxManage and
//! reports lightweight usage metrics.
//!
//! ## Usage
//! ```bash
//! vmforge create web-01 ubuntu 2 4 20 "" bridged "" "" 7
//! vmforge start web-01
//! vmforge ssh web-01 --os ubuntu --id 7
//! vmforge metrics web-01
//! vmforge --config /etc/vmforge.yaml stop web-01
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;
mod commands;
mod config;

use cli::Args;
use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments; usage errors exit 1 like any other failure
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => return usage_exit(e),
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn usage_exit(error: clap::Error) -> ExitCode {
    let _ = error.print();
    if is_usage_failure(&error) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// `--help` and `--version` also arrive as errors; only real ones fail.
fn is_usage_failure(error: &clap::Error) -> bool {
    error.use_stderr()
}

async fn run(args: Args) -> Result<ExitCode> {
    // Load configuration, then let flags win
    let (config, source) = Config::resolve(args.config.as_deref())?;
    let config = config.with_cli_overrides(&args);

    // Initialize logging
    vmforge_common::init_logging_with(&config.logging.level, config.logging.log_format()?)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?source,
        vm_name = args.command.vm_name().unwrap_or("-"),
        "Starting vmforge"
    );

    commands::execute(args.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors_are_failures() {
        let unknown = Args::try_parse_from(["vmforge", "frobnicate"]).unwrap_err();
        assert!(is_usage_failure(&unknown));

        let missing = Args::try_parse_from(["vmforge", "start"]).unwrap_err();
        assert!(is_usage_failure(&missing));

        let help = Args::try_parse_from(["vmforge", "--help"]).unwrap_err();
        assert!(!is_usage_failure(&help));

        let version = Args::try_parse_from(["vmforge", "--version"]).unwrap_err();
        assert!(!is_usage_failure(&version));
    }
}
