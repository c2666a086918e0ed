use std::sync::Arc;

use tracing::{info, warn};

use officeflow::compactor;
use officeflow::config::Config;
use officeflow::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    officeflow::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let policy = config.leave_policy();
    let engine = Arc::new(Engine::new(config.wal_path(), policy)?);
    info!("officeflow started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  leave policy: auto_approve_top_level={} top_level_fallback={}",
        policy.auto_approve_top_level, policy.top_level_fallback
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    for drift in engine.audit_inventory().await {
        warn!(
            device = %drift.device_id,
            total = drift.total,
            available = drift.available,
            outstanding = drift.outstanding,
            "inventory counters disagree with outstanding requests"
        );
    }

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    let compactor = tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    // Run until SIGTERM/ctrl-c. Every acknowledged mutation is already fsynced.
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    compactor.abort();
    info!("officeflow stopped");
    Ok(())
}
