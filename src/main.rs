use anyhow::Result;
use std::sync::Arc;

use dmux::classifier::HeuristicClassifier;
use dmux::config::MonitorConfig;
use dmux::lifecycle::LifecycleGuard;
use dmux::state::StateLayer;
use dmux::supervisor::Supervisor;
use dmux::tmux::{PaneSpec, TmuxClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = MonitorConfig::load()?;
    let client = Arc::new(TmuxClient::new());
    if !client.is_server_running().await {
        tracing::warn!("tmux server is not running, waiting for panes to appear");
    }

    let guard = Arc::new(LifecycleGuard::new());
    let cleanup = guard.clone().spawn_cleanup(config.stale_cleanup_interval());

    let refresh = config.pane_refresh_interval();
    let supervisor = Supervisor::new(client.clone(), config);
    let state = Arc::new(StateLayer::new(
        supervisor.clone(),
        guard,
        Arc::new(HeuristicClassifier),
    ));
    let consumer = state.clone().spawn();

    // Pane poller: only panes running a known agent get a monitor
    let poller = {
        let client = client.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            loop {
                ticker.tick().await;
                match client.list_panes().await {
                    Ok(panes) => {
                        let agents: Vec<PaneSpec> =
                            panes.into_iter().filter(|p| p.agent.is_some()).collect();
                        state.sync_panes(&agents).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to list tmux panes"),
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    poller.abort();
    for stats in supervisor.stats() {
        tracing::info!(stats = %serde_json::to_string(&stats)?, "monitor stats");
    }
    supervisor.shutdown().await;
    consumer.abort();
    cleanup.abort();

    Ok(())
}
