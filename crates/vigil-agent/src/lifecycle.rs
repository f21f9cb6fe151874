//! Startup wiring and graceful shutdown.
//!
//! The controller owns the cancellation root and the only reference graph:
//! services never hold each other, they meet here (and in
//! [`services::Coordinator`]) instead.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_client::identity::IdentityStore;
use vigil_client::PlatformClient;
use vigil_collector::builtin::BuiltinKeyRegistry;
use vigil_collector::command::CommandMapper;
use vigil_collector::dispatch::ValueDispatcher;
use vigil_collector::snapshot::{ProbeConfig, SystemProber};

use crate::config::{AgentConfig, SystemSection};
use crate::scheduler::ItemScheduler;
use crate::services::config_manager::ConfigManager;
use crate::services::heartbeat::HeartbeatService;
use crate::services::metrics_sender::MetricsSender;
use crate::services::register::{self, RegisterService};
use crate::services::Coordinator;

/// Per-stage ceiling for orderly shutdown.
const SHUTDOWN_STAGE_CEILING: Duration = Duration::from_secs(5);

/// Startup registration retry policy.
const REGISTER_ATTEMPTS: u32 = 3;
const REGISTER_DELAY: Duration = Duration::from_secs(5);

/// Run the agent until `shutdown` resolves. Startup-fatal errors (invalid
/// base URL) surface as `Err`; a failed registration degrades to local
/// health logging instead so the process stays restart-friendly.
pub async fn run(config: AgentConfig, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    if !config.device_monitor.enabled {
        info!("Platform connectivity disabled, local health logging only");
        return run_degraded(&config, shutdown).await;
    }

    let identity = Arc::new(IdentityStore::new(register::collect_host_facts()));
    let client = Arc::new(PlatformClient::new(
        &config.device_monitor.base_url,
        Duration::from_secs(config.device_monitor.timeout_secs),
        identity,
    )?);

    let registry = Arc::new(BuiltinKeyRegistry::new());
    let prober = SystemProber::new(probe_config(&config.collect.system));
    let map_path = Path::new(&config.device_monitor.command_map_path);
    let mapper = match CommandMapper::load(map_path) {
        Ok(mapper) => Arc::new(mapper),
        Err(e) => {
            warn!(
                path = %map_path.display(),
                error = %e,
                "Command map unavailable, continuing without mapped commands"
            );
            Arc::new(CommandMapper::disabled())
        }
    };
    let dispatcher = Arc::new(ValueDispatcher::new(mapper, registry, prober));

    let sender = Arc::new(MetricsSender::new(
        client.clone(),
        config.device_monitor.metrics_buffer_size,
        Duration::from_secs(config.device_monitor.metrics_flush_interval_secs),
    ));
    let heartbeat = Arc::new(HeartbeatService::new(
        client.clone(),
        Duration::from_secs(config.device_monitor.heartbeat_interval_secs),
    ));
    let config_manager = Arc::new(ConfigManager::new(
        client.clone(),
        Duration::from_secs(config.device_monitor.config_refresh_interval_secs),
    ));

    let root = CancellationToken::new();

    let register_service = RegisterService::new(client.clone());
    if let Err(e) = register_service
        .register_with_retry(REGISTER_ATTEMPTS, REGISTER_DELAY, &root)
        .await
    {
        error!(error = %e, "Registration failed, entering degraded mode");
        return run_degraded(&config, shutdown).await;
    }
    let coordinator = Arc::new(Coordinator::new(register_service, config_manager.clone()));

    let sender_task = {
        let sender = sender.clone();
        let cancel = root.child_token();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    let heartbeat_task = {
        let heartbeat = heartbeat.clone();
        let coordinator = coordinator.clone();
        let cancel = root.child_token();
        tokio::spawn(async move { heartbeat.run(coordinator, cancel).await })
    };

    if let Err(e) = config_manager.start().await {
        warn!(error = %e, "Initial config fetch rejected, re-registering");
        if coordinator.reregister(&root).await {
            if let Err(e) = config_manager.start().await {
                warn!(error = %e, "Config fetch still failing, starting with empty plan");
            }
        }
    }
    // Subscribe before the refresh loop starts so no published plan can slip
    // between the initial reshape and the bridge loop below.
    let mut updates = config_manager.subscribe();
    let config_task = {
        let config_manager = config_manager.clone();
        let cancel = root.child_token();
        tokio::spawn(async move { config_manager.run(cancel).await })
    };

    let scheduler = ItemScheduler::new(dispatcher, sender, root.clone());
    scheduler.reshape(&config_manager.items());

    info!(agent = %config.agent.name, "Agent started");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let items = updates.borrow_and_update().clone();
                scheduler.reshape(&items);
            }
        }
    }

    info!("Shutting down");
    root.cancel();
    await_stage("item-scheduler", scheduler.shutdown()).await;
    await_stage("config-manager", async {
        let _ = config_task.await;
    })
    .await;
    await_stage("heartbeat", async {
        let _ = heartbeat_task.await;
    })
    .await;
    await_stage("metrics-sender", async {
        let _ = sender_task.await;
    })
    .await;
    info!("Agent stopped");
    Ok(())
}

async fn await_stage(stage: &str, fut: impl Future<Output = ()>) {
    if tokio::time::timeout(SHUTDOWN_STAGE_CEILING, fut).await.is_err() {
        warn!(stage, "Shutdown stage exceeded its ceiling");
    }
}

fn probe_config(system: &SystemSection) -> ProbeConfig {
    if !system.enabled {
        return ProbeConfig {
            cpu: false,
            memory: false,
            disk: false,
            network: false,
        };
    }
    ProbeConfig {
        cpu: system.cpu,
        memory: system.memory,
        disk: system.disk,
        network: system.network,
    }
}

/// Keep the process alive and observable when the platform is unreachable or
/// disabled: log a local health line per agent interval until shutdown.
async fn run_degraded(
    config: &AgentConfig,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let prober = SystemProber::new(probe_config(&config.collect.system));
    let mut ticker = interval(Duration::from_secs(config.agent.interval_secs.max(1)));

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let snapshot = prober.capture_async().await;
                info!(
                    cpu_pct = format!("{:.1}", snapshot.cpu.usage_percent),
                    memory_pct = format!("{:.1}", snapshot.memory.usage_percent),
                    disk_pct = format!("{:.1}", snapshot.disk.usage_percent),
                    "Local health"
                );
            }
        }
    }
    info!("Agent stopped");
    Ok(())
}
