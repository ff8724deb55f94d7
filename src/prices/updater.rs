use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use log::{debug, info};

use crate::prices::{Broadcaster, TickReport};

/// Periodic random walk over every tracked price.
pub struct PriceUpdater {
    broadcaster: Broadcaster,
    period: Duration,
    max_change: f64,
}

impl PriceUpdater {
    pub fn new(broadcaster: Broadcaster, period: Duration, max_change: f64) -> Self {
        Self {
            broadcaster,
            period: period.max(Duration::from_millis(1)),
            // Keep the walk multiplicative and away from zero
            max_change: max_change.abs().min(0.5),
        }
    }

    /// Draws `delta ~ U[-max_change, max_change]` per symbol and publishes the result.
    pub fn run_tick<R: Rng>(&self, rng: &mut R) -> TickReport {
        let max_change = self.max_change;
        self.broadcaster.tick(|_| {
            if max_change > 0.0 {
                rng.gen_range(-max_change..=max_change)
            } else {
                0.0
            }
        })
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval_timer = interval(self.period);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        interval_timer.tick().await;

        let mut rng = StdRng::from_entropy();
        let mut ticks: u64 = 0;

        info!("📈 Price updater started (every {:?}, ±{:.2}%)", self.period, self.max_change * 100.0);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = interval_timer.tick() => {
                    ticks += 1;
                    let report = self.run_tick(&mut rng);
                    debug!(
                        "Tick {}: {} updated, {} failed, {} delivered, {} removed",
                        ticks, report.updated, report.failed, report.delivered, report.removed
                    );
                }
            }
        }

        info!("🛑 Price updater stopped after {} ticks", ticks);
    }
}
