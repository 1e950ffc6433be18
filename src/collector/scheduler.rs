//! Periodic capture trigger for the long-running server

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::Collector;

/// Run a capture cycle every `interval` until the task is aborted
///
/// The first cycle runs one full interval after start. A cycle that outlasts
/// the interval delays the next one instead of triggering a burst.
pub fn spawn_scheduler(
    collector: Arc<Collector>,
    interval: Duration,
    cleanup: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Capture scheduler started (every {:?})", interval);

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            collector.run_cycle_and_cleanup(cleanup).await;
        }
    })
}
