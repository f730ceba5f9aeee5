//! microseg agent daemon library.
//!
//! Exposes the daemon's building blocks for integration testing.
//! In production, `microseg-daemon` is used as a binary (main.rs).

pub mod agent;
pub mod cli;
pub mod logging;
pub mod metrics_server;
