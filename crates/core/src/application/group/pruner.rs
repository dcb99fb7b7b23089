// Pruner Loop - background idle reclamation

use crate::application::group::QueueGroup;
use crate::shutdown::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Background task firing [`QueueGroup::prune`] on a fixed cadence until the
/// group's shutdown token fires.
///
/// Pruning is best-effort maintenance: a failed pass is logged and the loop
/// keeps running.
pub struct PrunerLoop {
    group: Arc<QueueGroup>,
    frequency: Duration,
}

impl PrunerLoop {
    pub fn new(group: Arc<QueueGroup>, frequency: Duration) -> Self {
        Self { group, frequency }
    }

    /// Run the loop. Should be spawned in `tokio::spawn`.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            frequency_ms = self.frequency.as_millis() as u64,
            "queue group pruner started"
        );

        // First tick after one full period, not immediately; construction
        // already ran a synchronous pass.
        let mut tick = interval_at(Instant::now() + self.frequency, self.frequency);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!("queue group pruner shutting down");
                    break;
                }
                _ = tick.tick() => {
                    // The tick can win the race against a shutdown signal
                    // that fired in the same instant.
                    if shutdown.is_shutdown() {
                        info!("queue group pruner shutting down");
                        break;
                    }
                    if let Err(e) = self.group.prune().await {
                        error!(error = %e, "pruning queue group failed");
                    }
                }
            }
        }
    }
}
