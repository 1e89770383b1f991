use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Compact the journal if it has grown past `threshold` appends. Returns
/// whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => {
            metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
            info!("compacted journal after {appends} appends");
            true
        }
        Err(e) => {
            // Retried on the next tick; the uncompacted log is still valid.
            tracing::warn!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the journal.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
