//! # vmforge Common
//!
//! Shared utilities for the vmforge crates.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use vmforge_common::{init_logging_with, LogFormat};
//!
//! init_logging_with("info", LogFormat::Pretty).unwrap();
//! tracing::info!(vm_name = "web-01", "VM started");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, init_logging_with, LogFormat};
