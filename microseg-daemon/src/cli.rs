//! CLI argument definitions for microseg-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Flags take precedence over the config file and environment variables.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use microseg_core::config::MicrosegConfig;

/// eBPF microsegmentation agent.
///
/// Attaches the TC ingress classifier to one interface, restores persisted
/// policies, and reports flow events and statistics until interrupted.
#[derive(Parser, Debug, Default)]
#[command(name = "microseg-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to microseg.toml. Built-in defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Network interface to attach the classifier to.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Statistics print interval in seconds.
    #[arg(short = 's', long)]
    pub stats_interval: Option<u64>,

    /// Path to the compiled eBPF object.
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Path to the policy storage file. Enables storage.
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Do not install the default allow-all policy (rule 1).
    #[arg(long)]
    pub no_default_policy: bool,

    /// Run against an in-memory data plane instead of the kernel.
    #[arg(long)]
    pub dry_run: bool,

    /// Validate configuration and exit without starting the agent.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Load the config file (or defaults), then apply env and flag overrides.
    pub async fn load_config(&self) -> Result<MicrosegConfig> {
        let mut config = match &self.config {
            Some(path) => MicrosegConfig::load(path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?,
            None => {
                let mut config = MicrosegConfig::default();
                config.apply_env_overrides();
                config
            }
        };

        self.apply_overrides(&mut config);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Ok(config)
    }

    /// Apply command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut MicrosegConfig) {
        if let Some(interface) = &self.interface {
            config.dataplane.interface.clone_from(interface);
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.to_lowercase();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.to_lowercase();
        }
        if let Some(secs) = self.stats_interval {
            config.dataplane.stats_interval_secs = secs;
        }
        if let Some(program) = &self.program {
            config.dataplane.program_path = program.display().to_string();
        }
        if let Some(path) = &self.storage {
            config.storage.enabled = true;
            config.storage.path = path.display().to_string();
        }
        if self.no_default_policy {
            config.dataplane.install_default_policy = false;
        }
    }
}
