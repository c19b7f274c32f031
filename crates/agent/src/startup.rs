use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adapters::alert::log_stats_reporter::LogStatsReporter;
use adapters::clock::boot_clock::BootClock;
use adapters::conntrack::cli_refresher::ConntrackCliRefresher;
use adapters::conntrack::event_reader::ConntrackEventReader;
use adapters::ebpf::offload_map_manager::OffloadMapManager;
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use anyhow::Context;
use application::offload_coordinator::{
    CoordinatorDeps, CoordinatorHandle, CoordinatorSettings, OffloadCoordinator,
};
use infrastructure::config::{AgentConfig, OffloadConfig};
use infrastructure::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Tasks backing the offload path, joined in order at shutdown.
struct OffloadTasks {
    handle: CoordinatorHandle,
    coordinator: JoinHandle<OffloadCoordinator>,
    reader: JoinHandle<()>,
}

/// Load and validate the configuration without starting anything.
pub fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = AgentConfig::load(Path::new(&cli.config))
        .with_context(|| format!("invalid configuration at {}", cli.config))?;
    println!(
        "{}: ok (offload {}, maps in {}, poll interval {} ms)",
        cli.config,
        if config.offload.enabled { "enabled" } else { "disabled" },
        config.offload.map_pin_dir,
        config.offload.poll_interval_ms,
    );
    Ok(())
}

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    let (log_level, log_format) = cli.logging(config.agent.log_level, config.agent.log_format);
    init_logging(log_level, log_format)?;

    // Root span; its fields are attached to every log line below.
    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "tether-offload",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        offload_enabled = config.offload.enabled,
        "tether offload agent starting"
    );

    // ── 3. Metrics and cancellation ─────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 4. Offload coordinator ──────────────────────────────────────
    let offload = if config.offload.enabled {
        let metrics_port = Arc::clone(&metrics) as Arc<dyn MetricsPort>;
        Some(start_offload(&config.offload, metrics_port, &cancel_token).await?)
    } else {
        warn!("offload disabled in configuration, serving metrics only");
        None
    };

    // ── 5. HTTP server ──────────────────────────────────────────────
    let app_state = Arc::new(AppState::new(
        Arc::clone(&metrics),
        offload.as_ref().map(|o| o.handle.clone()),
    ));
    let http_bind = config.agent.bind_address.clone();
    let http_port = config.agent.metrics_port;
    let http_shutdown = cancel_token.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = run_http_server(
            app_state,
            &http_bind,
            http_port,
            http_shutdown.cancelled_owned(),
        )
        .await
        {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("agent running, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 6. Ordered shutdown sequence ───────────────────────────────
    info!("shutdown phase 1: draining HTTP connections");
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, http_handle).await;

    if let Some(tasks) = offload {
        info!("shutdown phase 2: stopping conntrack event reader");
        let _ = tokio::time::timeout(Duration::from_secs(1), tasks.reader).await;

        info!("shutdown phase 3: draining offload events");
        drop(tasks.handle);
        match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, tasks.coordinator).await {
            Ok(Ok(mut coordinator)) => {
                // Final stats push, then IPv4 flows are withdrawn.
                coordinator.stop_polling();
                log_final_state(&coordinator);
            }
            Ok(Err(e)) => error!(error = %e, "offload coordinator task failed"),
            Err(_) => warn!("offload coordinator did not stop in time"),
        }
    }

    info!("agent stopped");
    Ok(())
}

/// Open the pinned offload maps, build the coordinator and spawn its
/// event loop plus the conntrack event reader. The pinned-map store is the
/// only backend the agent ships; missing tables are handled by the
/// coordinator's capability check. Polling is started before
/// the reader can deliver its first event.
async fn start_offload(
    config: &OffloadConfig,
    metrics: Arc<dyn MetricsPort>,
    cancel_token: &CancellationToken,
) -> anyhow::Result<OffloadTasks> {
    let store = OffloadMapManager::open(config.map_pin_path())
        .with_context(|| format!("failed to open offload maps in {}", config.map_pin_dir))?;
    let refresher = ConntrackCliRefresher::new(config.conntrack_tool.clone())?;

    let coordinator = OffloadCoordinator::new(
        CoordinatorDeps {
            store: Box::new(store),
            reporter: Box::new(LogStatsReporter::new()),
            refresher: Box::new(refresher),
            clock: Arc::new(BootClock),
            metrics: Arc::clone(&metrics),
        },
        CoordinatorSettings {
            poll_interval: config.poll_interval(),
            policy: config.policy(),
        },
    );
    info!(
        poll_interval_ms = u64::try_from(coordinator.polling_interval().as_millis())
            .unwrap_or(u64::MAX),
        map_pin_dir = %config.map_pin_dir,
        "offload coordinator initialized"
    );

    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    let handle = CoordinatorHandle::new(tx.clone());
    let coordinator_task = tokio::spawn(coordinator.run(rx, cancel_token.clone()));
    handle.start_polling().await?;

    let reader = ConntrackEventReader::new(config.conntrack_tool.clone(), metrics);
    let reader_cancel = cancel_token.clone();
    let reader_task = tokio::spawn(async move {
        if let Err(e) = reader.run(tx, reader_cancel).await {
            error!(error = %e, "conntrack event reader failed, IPv4 offload receives no events");
        }
    });

    Ok(OffloadTasks {
        handle,
        coordinator: coordinator_task,
        reader: reader_task,
    })
}

fn log_final_state(coordinator: &OffloadCoordinator) {
    match serde_json::to_string(&coordinator.dump()) {
        Ok(snapshot) => info!(%snapshot, "final offload state"),
        Err(e) => warn!(error = %e, "failed to serialize final offload state"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use clap::Parser;

    #[test]
    fn check_config_rejects_missing_file() {
        let cli = Cli::try_parse_from([
            "tether-offload-agent",
            "--config",
            "/nonexistent/tether-offload/config.yaml",
        ])
        .unwrap();
        let err = check_config(&cli).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tether-offload/config.yaml"));
    }

    #[test]
    fn check_config_accepts_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"agent:\n  log_level: debug\noffload:\n  enabled: false\n  poll_interval_ms: 6000\n")
            .unwrap();
        let cli = Cli::try_parse_from([
            "tether-offload-agent",
            "--config",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        assert!(check_config(&cli).is_ok());
    }

    #[test]
    fn check_config_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"agent:\n  firewall: true\n").unwrap();
        let cli = Cli::try_parse_from([
            "tether-offload-agent",
            "--config",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        assert!(check_config(&cli).is_err());
    }

    #[tokio::test]
    async fn start_offload_fails_without_pinned_maps() {
        let config = OffloadConfig {
            map_pin_dir: "/nonexistent/bpf/tethering".to_string(),
            ..OffloadConfig::default()
        };
        let metrics: Arc<dyn MetricsPort> = Arc::new(AgentMetrics::new());
        let res = start_offload(&config, metrics, &CancellationToken::new()).await;
        let Err(err) = res else {
            panic!("expected missing map directory to fail");
        };
        assert!(format!("{err:#}").contains("/nonexistent/bpf/tethering"));
    }
}
