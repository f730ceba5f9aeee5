use anyhow::Result;
use clap::Parser;

use microseg_core::config::MicrosegConfig;
use microseg_daemon::agent::{self, Agent, AgentSummary, ShutdownSignals};
use microseg_daemon::cli::DaemonCli;
use microseg_daemon::{logging, metrics_server};
use microseg_dataplane::MemoryBackend;
use microseg_policy::TomlFileStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let config = cli.load_config().await?;

    if cli.validate {
        println!("configuration OK");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let signals = ShutdownSignals::install()?;
    let storage = agent::open_storage(&config.storage).await?;

    tracing::info!(
        interface = %config.dataplane.interface,
        dry_run = cli.dry_run,
        "starting microsegmentation agent"
    );

    let summary = if cli.dry_run {
        let backend = MemoryBackend::new().with_interfaces([config.dataplane.interface.clone()]);
        Agent::start(config, backend, storage)
            .await?
            .run_until(signals.wait())
            .await?
    } else {
        run_kernel(config, storage, signals).await?
    };

    if let Some(monitor) = summary.monitor {
        tracing::info!(
            flow_events = monitor.received,
            malformed = monitor.malformed,
            "flow monitor summary"
        );
    }
    tracing::info!(stats = %summary.last_stats, "microseg-daemon shut down");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_kernel(
    config: MicrosegConfig,
    storage: Option<TomlFileStorage>,
    signals: ShutdownSignals,
) -> Result<AgentSummary> {
    let backend = microseg_dataplane::AyaBackend::new(&config.dataplane.program_path);
    Agent::start(config, backend, storage)
        .await?
        .run_until(signals.wait())
        .await
}

#[cfg(not(target_os = "linux"))]
async fn run_kernel(
    _config: MicrosegConfig,
    _storage: Option<TomlFileStorage>,
    _signals: ShutdownSignals,
) -> Result<AgentSummary> {
    anyhow::bail!("the kernel data plane requires Linux; use --dry-run")
}
