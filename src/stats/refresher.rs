//! Background refresh: an optional warm-up pass at startup and a periodic
//! forced pass so that readers rarely pay for aggregation themselves.

use super::cache::StatsCache;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Runs one pass now. Failure is logged; the service still starts.
pub async fn warm(cache: &StatsCache) {
    match cache.get(true).await {
        Ok(doc) => info!(burned = doc.burned_count, "statistics cache warmed"),
        Err(e) => error!(error = %format!("{e:#}"), "warm-up pass failed"),
    }
}

/// Forces a pass every `every`, starting one period from now. Never stops on failure.
pub fn spawn_refresher(cache: StatsCache, every: Duration) -> JoinHandle<()> {
    info!(every_secs = every.as_secs(), "starting statistics refresher");
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.get(true).await {
                Ok(doc) => info!(
                    burned = doc.burned_count,
                    remaining = doc.remaining_count,
                    "scheduled refresh complete"
                ),
                Err(e) => error!(error = %format!("{e:#}"), "scheduled refresh failed"),
            }
        }
    })
}
