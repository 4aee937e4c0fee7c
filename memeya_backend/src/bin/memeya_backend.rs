use std::sync::Arc;

use anyhow::{Context, Result};
use flume::unbounded;
use memeya_backend::config::AgentConfig;
use memeya_backend::runtime::{spawn_event_logger, MemeyaRuntime};
use memeya_backend::server::serve_dashboard;
use memeya_backend::telegram::spawn_telegram_bridge;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,memeya_backend=debug")),
        )
        .init();

    let config = AgentConfig::load();
    let rt = tokio::runtime::Runtime::new().context("failed to start agent runtime")?;
    rt.block_on(run(config))
}

async fn run(config: AgentConfig) -> Result<()> {
    let (event_tx, event_rx) = unbounded();
    let runtime =
        MemeyaRuntime::bootstrap(config, event_tx).context("failed to bootstrap agent runtime")?;

    tracing::info!(
        "Starting {} (dashboard on {}, state in {:?})",
        runtime.config.agent_name,
        runtime.config.dashboard_bind,
        runtime.config.journal_dir
    );

    spawn_event_logger(event_rx);
    spawn_telegram_bridge(&runtime.config, runtime.operator_tx.clone());
    let agent_loop = runtime.spawn_agent_loop();

    let shutdown = runtime.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            shutdown.send_replace(true);
        }
    });

    let dashboard = Arc::new(runtime.dashboard_state());
    let served = serve_dashboard(dashboard, &runtime.config.dashboard_bind).await;
    if served.is_err() {
        runtime.request_shutdown();
    }

    agent_loop.await.context("agent loop panicked")?;
    served
}
