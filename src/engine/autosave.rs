//! Ledger autosave: periodically persists the usage snapshot so a crash
//! loses at most one cadence's worth of accounting.
//!
//! A `tokio::time::interval` raced against a shutdown `watch` channel, the
//! same periodic-task shape used by the other background loops in this crate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::engine::Engine;
use crate::persistence::PersistenceAdapter;

/// Cadence between autosave writes. Comfortably above the 10s minimum
/// spacing between writes — there is no separate manual-trigger path in
/// this design that would need that floor enforced explicitly.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Run the autosave loop until `shutdown` fires, then perform one final
/// flush before returning.
///
/// Persistence failures are logged ([`crate::errors::PersistError`]) and
/// never fatal — the next tick simply tries again.
pub async fn run(engine: Arc<Engine>, persistence: Arc<dyn PersistenceAdapter>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(AUTOSAVE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                save(&engine, persistence.as_ref()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("autosave: flushing ledger before shutdown");
                    save(&engine, persistence.as_ref()).await;
                    break;
                }
            }
        }
    }
}

async fn save(engine: &Engine, persistence: &dyn PersistenceAdapter) {
    let snapshot = engine.to_usage_snapshot();
    if let Err(e) = persistence.save_usage(&snapshot).await {
        error!(error = %e, "autosave: failed to persist usage snapshot");
    }
}
