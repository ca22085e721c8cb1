//! Hysteria2 provisioning
//!
//! Each submodule owns one step of the install sequence; [`run_install`]
//! drives them in order and [`run_check`] re-runs the read-only diagnostics
//! against an existing installation.

pub mod binary;
pub mod diagnostics;
pub mod file_ops;
pub mod firewall;
mod orchestration;
pub mod packages;
pub mod preflight;
pub mod render;
pub mod report;
pub mod secrets;
pub mod service;
pub mod uri;

pub use orchestration::{CheckSummary, InstallRequest, InstallSummary, run_check, run_install};
pub use report::Reporter;
