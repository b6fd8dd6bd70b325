//! Error types for the VirtualBox orchestration layer.

use thiserror::Error;

use crate::types::ProvisionStep;

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// No candidate VBoxManage executable answered a version query.
    #[error("VBoxManage not found (searched: {searched})")]
    ToolNotFound {
        /// Candidate locations that were probed, comma separated.
        searched: String,
    },

    /// A VM with this name is already registered.
    #[error("VM already exists: {0}")]
    AlreadyExists(String),

    /// VM was not found.
    #[error("VM not found: {0}")]
    NotFound(String),

    /// A mandatory provisioning step failed; later steps were not attempted.
    #[error("Provisioning step '{step}' failed: {message}")]
    StepFailed {
        step: ProvisionStep,
        message: String,
    },

    /// A bounded call ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A start/stop/delete command reported failure.
    #[error("Failed to {operation}: {message}")]
    CommandFailed {
        operation: String,
        message: String,
    },

    /// Invalid configuration or arguments, rejected before execution.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HypervisorError {
    /// Step at which provisioning stopped, if this is a pipeline failure.
    pub fn failed_step(&self) -> Option<ProvisionStep> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether nothing further can be done without the tool.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolNotFound { .. })
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
