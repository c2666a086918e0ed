use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

/// Compacts the journal once `threshold` appends have accumulated since the last compaction.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!(appends, threshold, "journal over compaction threshold");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically checks the journal size.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
