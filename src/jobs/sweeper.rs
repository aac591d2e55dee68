//! Background job: expire abandoned authorization transactions, unredeemed
//! codes, and dead jti marks.
//!
//! Consumption paths already treat expired records as absent; this loop just
//! keeps the maps from accumulating entries for flows nobody finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::flow::FlowStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the sweeper task. Call this once at startup.
pub fn spawn(store: Arc<FlowStore>) {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = store.sweep(chrono::Utc::now());
            if removed > 0 {
                tracing::debug!(removed, "swept expired flow records");
            }
        }
    });
}
