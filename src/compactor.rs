use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` events were appended since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        debug!(appends, threshold, "compaction not due");
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!(appends, "compacted WAL");
    Ok(true)
}
