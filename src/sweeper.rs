//! Background deadline sweep
//!
//! Periodically expires unmatched bets and stalled sessions.

use crate::common::types::now;
use crate::services::BettingService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Spawn the sweep loop. Abort the returned handle to stop it.
pub fn spawn(service: Arc<BettingService>, every: Duration) -> JoinHandle<()> {
    info!("🧹 Sweeper running every {:?}", every);
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = service.run_sweep(now());
            if report != Default::default() {
                debug!("Sweep: {:?}", report);
            }
        }
    })
}
