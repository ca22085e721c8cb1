//! hy2setup: provision a Hysteria2 proxy server on an Ubuntu host
//!
//! The binary is a thin shell around [`install::run_install`] and
//! [`install::run_check`]. All host access goes through [`host::Host`], so
//! the workflows run unchanged against the doubles in [`test_utils`].

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod install;
pub mod test_utils;
