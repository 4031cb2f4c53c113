//! Reset Scheduler: fires the daily quota reset at the configured local
//! time and persists the advanced schedule.
//!
//! A `tokio::time::interval` raced against a shutdown `watch` channel,
//! checking once per minute whether a reset is due.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::engine::Engine;
use crate::persistence::PersistenceAdapter;

/// How often the scheduler checks whether a reset is due.
pub const RESET_TICK: Duration = Duration::from_secs(60);

/// Run the Reset Scheduler until `shutdown` fires.
///
/// On every tick, asks the Engine whether `now` has reached the configured
/// next-reset instant; if so, persists the advanced configuration.
/// Persistence failures are logged and never crash the loop — the next
/// tick's reset check is idempotent (the reset already fired in memory, so
/// it simply won't fire again until the newly-advanced instant passes).
pub async fn run(engine: Arc<Engine>, persistence: Arc<dyn PersistenceAdapter>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(RESET_TICK);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(updated) = engine.maybe_reset(chrono::Utc::now()) {
                    info!(next_reset = %updated.next_quota_reset_datetime, "daily quota reset fired");
                    match serde_json::to_string_pretty(&updated) {
                        Ok(serialized) => {
                            if let Err(e) = persistence.save_config(&serialized).await {
                                error!(error = %e, "failed to persist advanced reset schedule");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to serialize configuration after reset"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("reset scheduler shutting down");
                    break;
                }
            }
        }
    }
}
