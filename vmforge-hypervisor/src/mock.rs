//! Mock VBoxManage for testing and development.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::VBoxCommand;
use crate::traits::{CommandOutput, CommandRunner};

/// In-memory stand-in for the VBoxManage executable.
///
/// Tracks registered and running VMs, creates real (empty) disk files for
/// `createmedium` so filesystem effects can be checked, and records every
/// command it receives. Useful for:
/// - Unit and integration testing
/// - Development without VirtualBox installed
pub struct MockVBoxManage {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    vms: BTreeMap<String, MockVm>,
    calls: Vec<VBoxCommand>,
    /// Commands carrying any of these arguments fail
    fail_on: HashSet<String>,
    /// Commands carrying any of these arguments time out
    time_out_on: HashSet<String>,
    /// Every command fails, as if the tool were missing
    unavailable: bool,
    /// ACPI shutdown requests are accepted but the guest keeps running
    ignore_acpi: bool,
    metrics_output: Option<String>,
    next_id: u32,
}

struct MockVm {
    uuid: String,
    running: bool,
    settings: Vec<Vec<String>>,
}

impl MockVBoxManage {
    /// Create an empty mock hypervisor.
    pub fn new() -> Self {
        info!("Creating mock VBoxManage");
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a VM up front.
    pub fn with_vm(self, name: &str, running: bool) -> Self {
        {
            let mut state = self.state();
            let uuid = state.allocate_uuid();
            state.vms.insert(
                name.to_string(),
                MockVm {
                    uuid,
                    running,
                    settings: Vec::new(),
                },
            );
        }
        self
    }

    /// Fail every command that carries `arg` (a subcommand or flag).
    pub fn fail_on(self, arg: &str) -> Self {
        self.state().fail_on.insert(arg.to_string());
        self
    }

    /// Time out every command that carries `arg`.
    pub fn time_out_on(self, arg: &str) -> Self {
        self.state().time_out_on.insert(arg.to_string());
        self
    }

    /// Make every command fail.
    pub fn unavailable(self) -> Self {
        self.state().unavailable = true;
        self
    }

    /// Keep guests running after an ACPI power button press.
    pub fn ignore_acpi(self) -> Self {
        self.state().ignore_acpi = true;
        self
    }

    /// Text returned by `metrics query`.
    pub fn with_metrics_output(self, output: impl Into<String>) -> Self {
        self.state().metrics_output = Some(output.into());
        self
    }

    /// Every command received so far.
    pub fn calls(&self) -> Vec<VBoxCommand> {
        self.state().calls.clone()
    }

    /// Commands received that change hypervisor state.
    pub fn mutating_calls(&self) -> Vec<VBoxCommand> {
        self.calls().into_iter().filter(|c| c.is_mutating()).collect()
    }

    /// Number of received commands whose arguments contain all of `args`.
    pub fn count_calls(&self, args: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| args.iter().all(|a| c.args().iter().any(|x| x == a)))
            .count()
    }

    pub fn vm_exists(&self, name: &str) -> bool {
        self.state().vms.contains_key(name)
    }

    pub fn vm_running(&self, name: &str) -> bool {
        self.state().vms.get(name).map(|vm| vm.running).unwrap_or(false)
    }

    /// `modifyvm` settings applied to a VM, flags and values only.
    pub fn vm_settings(&self, name: &str) -> Vec<Vec<String>> {
        self.state()
            .vms
            .get(name)
            .map(|vm| vm.settings.clone())
            .unwrap_or_default()
    }
}

impl Default for MockVBoxManage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn allocate_uuid(&mut self) -> String {
        self.next_id += 1;
        format!("00000000-0000-4000-8000-{:012x}", self.next_id)
    }

    fn listing(&self, running_only: bool) -> String {
        self.vms
            .iter()
            .filter(|(_, vm)| !running_only || vm.running)
            .map(|(name, vm)| format!("\"{}\" {{{}}}\n", name, vm.uuid))
            .collect()
    }

    fn execute(&mut self, args: &[String]) -> CommandOutput {
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();

        match arg(0) {
            "--version" => CommandOutput::success("7.0.14r161095\n"),
            "list" => match arg(1) {
                "vms" => CommandOutput::success(self.listing(false)),
                "runningvms" => CommandOutput::success(self.listing(true)),
                other => CommandOutput::failure(format!("unknown list type {}", other)),
            },
            "createvm" => {
                let name = arg(2);
                if self.vms.contains_key(name) {
                    return CommandOutput::failure(format!(
                        "Machine settings file for '{}' already exists",
                        name
                    ));
                }
                let uuid = self.allocate_uuid();
                self.vms.insert(
                    name.to_string(),
                    MockVm {
                        uuid: uuid.clone(),
                        running: false,
                        settings: Vec::new(),
                    },
                );
                CommandOutput::success(format!(
                    "Virtual machine '{}' is created and registered.\nUUID: {}\n",
                    name, uuid
                ))
            }
            "modifyvm" => match self.vms.get_mut(arg(1)) {
                Some(vm) => {
                    vm.settings.push(args[2..].to_vec());
                    CommandOutput::success("")
                }
                None => not_found(arg(1)),
            },
            "storagectl" | "storageattach" | "showvminfo" if !self.vms.contains_key(arg(1)) => {
                not_found(arg(1))
            }
            "storagectl" | "storageattach" => CommandOutput::success(""),
            "showvminfo" => {
                let running = self.vms.get(arg(1)).map(|vm| vm.running).unwrap_or(false);
                CommandOutput::success(format!(
                    "Name:            {}\nState:           {}\n",
                    arg(1),
                    if running { "running" } else { "powered off" }
                ))
            }
            "createmedium" => {
                let path = args
                    .iter()
                    .position(|a| a == "--filename")
                    .and_then(|i| args.get(i + 1))
                    .map(PathBuf::from);
                match path {
                    Some(path) if path.exists() => CommandOutput::failure(format!(
                        "Could not create the medium storage unit '{}': already exists",
                        path.display()
                    )),
                    Some(path) => match std::fs::write(&path, b"") {
                        Ok(()) => CommandOutput::success("Medium created. UUID: mock\n"),
                        Err(e) => CommandOutput::failure(e.to_string()),
                    },
                    None => CommandOutput::failure("--filename missing"),
                }
            }
            "startvm" => match self.vms.get_mut(arg(1)) {
                Some(vm) if vm.running => CommandOutput::failure("The machine is already running"),
                Some(vm) => {
                    vm.running = true;
                    CommandOutput::success(format!(
                        "VM \"{}\" has been successfully started.\n",
                        arg(1)
                    ))
                }
                None => not_found(arg(1)),
            },
            "controlvm" => {
                let ignore_acpi = self.ignore_acpi;
                match self.vms.get_mut(arg(1)) {
                    Some(vm) if !vm.running => {
                        CommandOutput::failure(format!("Machine '{}' is not currently running", arg(1)))
                    }
                    Some(vm) => {
                        match arg(2) {
                            "acpipowerbutton" if ignore_acpi => {}
                            "acpipowerbutton" | "poweroff" => vm.running = false,
                            other => {
                                return CommandOutput::failure(format!("unknown action {}", other))
                            }
                        }
                        CommandOutput::success("")
                    }
                    None => not_found(arg(1)),
                }
            }
            "unregistervm" => match self.vms.get(arg(1)) {
                Some(vm) if vm.running => CommandOutput::failure("Cannot unregister a running machine"),
                Some(_) => {
                    self.vms.remove(arg(1));
                    CommandOutput::success("")
                }
                None => not_found(arg(1)),
            },
            "metrics" => {
                if !self.vms.contains_key(arg(2)) {
                    return not_found(arg(2));
                }
                CommandOutput::success(self.metrics_output.clone().unwrap_or_else(|| {
                    "Object          Metric                                   Values\n\
                     --------------- ---------------------------------------- ---------\n"
                        .to_string()
                }))
            }
            other => CommandOutput::failure(format!("Syntax error: unknown command {}", other)),
        }
    }
}

fn not_found(name: &str) -> CommandOutput {
    CommandOutput::failure(format!("Could not find a registered machine named '{}'", name))
}

#[async_trait]
impl CommandRunner for MockVBoxManage {
    async fn run(&self, command: &VBoxCommand) -> CommandOutput {
        debug!(command = %command, "Mock VBoxManage");
        let mut state = self.state();
        state.calls.push(command.clone());

        if state.unavailable {
            return CommandOutput::failure("VBoxManage: command not found");
        }
        if command.args().iter().any(|a| state.time_out_on.contains(a)) {
            return CommandOutput::timeout();
        }
        if command.args().iter().any(|a| state.fail_on.contains(a)) {
            return CommandOutput::failure(format!("injected failure: {}", command));
        }

        state.execute(command.args())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
