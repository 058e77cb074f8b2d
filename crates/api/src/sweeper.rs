// Background expiry sweep
//
// Expiry is lazy: a late confirmation is caught when its token is resolved.
// The sweep only moves suspended executions nobody ever confirmed into
// Expired, so they stop showing up as live.

use std::sync::Arc;
use std::time::Duration;

use newsletter_engine::SubscriptionEngine;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn a task that expires overdue executions every `interval`
pub fn spawn_expiry_sweeper(engine: Arc<SubscriptionEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match engine.expire_overdue().await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::debug!("Expiry sweep expired {} executions", expired.len());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Expiry sweep failed: {}", e),
            }
        }
    })
}
