//! Agent lifecycle -- data plane, policy manager, and background tasks.
//!
//! # Startup Order
//!
//! 1. Attach the data plane (TCX first, legacy clsact fallback)
//! 2. Build the policy manager on the data plane's tables
//! 3. Restore persisted policies (when storage is enabled)
//! 4. Install the default allow-all rule unless one already exists
//!
//! # Shutdown Order
//!
//! 1. Cancel the flow monitor and the statistics ticker
//! 2. Close policy storage
//! 3. Detach and unload the classifier

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use microseg_core::config::{MicrosegConfig, StorageConfig};
use microseg_core::types::{FlowEvent, Policy, Statistics};
use microseg_dataplane::{DataPlane, MonitorSummary, StatsReader, TcBackend, TrafficRates};
use microseg_policy::{PolicyManager, Storage, TomlFileStorage};

/// Rule ID of the default allow-all policy.
pub const DEFAULT_RULE_ID: u32 = 1;

/// What the background tasks saw before shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentSummary {
    /// Flow monitor counters. `None` if no monitor ran.
    pub monitor: Option<MonitorSummary>,
    /// Last statistics snapshot taken by the ticker.
    pub last_stats: Statistics,
}

/// A running agent bound to one interface.
pub struct Agent<B: TcBackend, S: Storage = TomlFileStorage> {
    config: MicrosegConfig,
    dataplane: DataPlane<B>,
    policies: PolicyManager<S>,
    flow_tap: Option<mpsc::Sender<FlowEvent>>,
}

impl<B: TcBackend, S: Storage> Agent<B, S> {
    /// Attach the data plane and prepare the policy tables.
    ///
    /// # Errors
    ///
    /// An invalid configuration and data plane setup failures are fatal.
    /// Restore and default-policy failures are logged.
    pub async fn start(config: MicrosegConfig, backend: B, storage: Option<S>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

        let dataplane = DataPlane::builder()
            .config(&config.dataplane)
            .backend(backend)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create data plane: {}", e))?;
        info!(
            interface = dataplane.interface(),
            mode = %dataplane.attach_mode(),
            "data plane initialized"
        );

        let policies = PolicyManager::from_kernel_tables(&dataplane.tables(), storage);
        if policies.storage().is_some() {
            match policies.load_persisted().await {
                Ok(report) if report.failed > 0 => {
                    warn!(failed = report.failed, "some persisted policies were not restored");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to restore persisted policies"),
            }
        }

        if config.dataplane.install_default_policy {
            install_default_policy(&policies).await;
        }
        info!("policy manager initialized");

        Ok(Self {
            config,
            dataplane,
            policies,
            flow_tap: None,
        })
    }

    /// Forward decoded flow events to `tx` in addition to logging them.
    pub fn with_flow_tap(mut self, tx: mpsc::Sender<FlowEvent>) -> Self {
        self.flow_tap = Some(tx);
        self
    }

    pub fn config(&self) -> &MicrosegConfig {
        &self.config
    }

    pub fn dataplane(&self) -> &DataPlane<B> {
        &self.dataplane
    }

    pub fn policies(&self) -> &PolicyManager<S> {
        &self.policies
    }

    /// Run the flow monitor and statistics ticker until `shutdown` resolves,
    /// then tear everything down.
    ///
    /// # Errors
    ///
    /// Returns an error if detaching or unloading the classifier fails.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<AgentSummary>
    where
        F: Future<Output = ()>,
    {
        let monitor = self.spawn_flow_monitor();

        let stats_cancel = CancellationToken::new();
        let period = Duration::from_secs(self.config.dataplane.stats_interval_secs);
        let stats_task = tokio::spawn(stats_loop(
            self.dataplane.stats_reader(),
            period,
            stats_cancel.clone(),
        ));

        info!("agent running");
        shutdown.await;
        info!("shutting down");

        stats_cancel.cancel();
        let monitor = match monitor {
            Some((task, cancel)) => {
                cancel.cancel();
                join_logged(task, "flow monitor").await
            }
            None => None,
        };
        let last_stats = join_logged(stats_task, "statistics ticker")
            .await
            .unwrap_or_default();

        self.shutdown().await?;
        Ok(AgentSummary {
            monitor,
            last_stats,
        })
    }

    /// Close storage, then detach and unload the classifier.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.policies.close().await {
            warn!(error = %e, "failed to close policy storage");
        }
        self.dataplane
            .close()
            .map_err(|e| anyhow::anyhow!("data plane teardown failed: {}", e))?;
        info!("data plane closed");
        Ok(())
    }

    fn spawn_flow_monitor(&mut self) -> Option<(JoinHandle<MonitorSummary>, CancellationToken)> {
        let Some((mut monitor, cancel)) = self.dataplane.flow_monitor() else {
            warn!("flow event stream already taken, monitor not started");
            return None;
        };
        if let Some(tap) = self.flow_tap.take() {
            monitor = monitor.with_tap(tap);
        }
        let task = tokio::spawn(monitor.run(cancel.clone()));
        Some((task, cancel))
    }
}

/// Open the policy file when storage is enabled.
pub async fn open_storage(config: &StorageConfig) -> Result<Option<TomlFileStorage>> {
    if !config.enabled {
        debug!("policy storage disabled");
        return Ok(None);
    }
    let storage = TomlFileStorage::open(&config.path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open policy storage: {}", e))?;
    Ok(Some(storage))
}

async fn install_default_policy<S: Storage>(policies: &PolicyManager<S>) {
    match policies.get_policy(DEFAULT_RULE_ID) {
        Ok(Some(existing)) => {
            debug!(policy = %existing, "rule 1 already present, keeping it");
            return;
        }
        Ok(None) => {}
        Err(e) => debug!(error = %e, "could not check for rule 1"),
    }
    if let Err(e) = policies.add_policy(&Policy::allow_all(DEFAULT_RULE_ID)).await {
        warn!(error = %e, "failed to add default policy");
    }
}

/// Periodically read, publish, and log the data plane counters.
///
/// Returns the last snapshot taken once `cancel` fires.
pub async fn stats_loop(
    reader: StatsReader,
    period: Duration,
    cancel: CancellationToken,
) -> Statistics {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rates = TrafficRates::new();
    let mut last = Statistics::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                last = reader.read_and_publish();
                let rate = rates.update(last);
                info!(
                    total = last.total_packets,
                    allowed = last.allowed_packets,
                    denied = last.denied_packets,
                    new_sessions = last.new_sessions,
                    active_sessions = last.active_sessions,
                    policy_hits = last.policy_hits,
                    policy_misses = last.policy_misses,
                    allow_rate = format_args!("{:.1}%", last.allow_rate()),
                    hit_rate = format_args!("{:.1}%", last.hit_rate()),
                    pps = format_args!("{:.1}", rate.packets_per_sec),
                    "statistics"
                );
            }
        }
    }
    last
}

async fn join_logged<T>(task: JoinHandle<T>, name: &'static str) -> Option<T> {
    match task.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(task = name, error = %e, "background task failed");
            None
        }
    }
}

/// SIGTERM/SIGINT handlers, installed before the data plane is attached.
pub struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Resolve on the first signal received.
    pub async fn wait(mut self) {
        let signal = tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        };
        info!(signal, "shutdown signal received");
    }
}
