//! Dispatch Loop: the bounded-retry state machine for one logical client
//! request, coordinating the Selector, the outbound call, and outcome
//! handling.
//!
//! An event-driven `loop { match ... }` with `tracing` spans per iteration,
//! bounded to a single request's worth of retries.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clock;
use crate::engine::Engine;
use crate::providers::upstream::{DispatchOutcome, Protocol, UpstreamClient};

/// Maximum dispatch attempts per request before giving up.
pub const MAX_RETRIES: u32 = 5;
/// Fixed backoff applied after an `UpstreamTransient` (HTTP 503) outcome.
pub const TRANSIENT_RETRY_SLEEP: Duration = Duration::from_secs(5);

/// The final, terminal result of a Dispatch Loop run, ready for the HTTP
/// layer to relay to the downstream client.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// A 2xx outcome; relay `body`/`content_type` verbatim.
    Success {
        /// HTTP status code.
        status: u16,
        /// Response body, relayed unchanged.
        body: String,
        /// Response `content-type`.
        content_type: Option<String>,
    },
    /// A non-2xx, non-429, non-503 outcome; relay verbatim.
    Other {
        /// HTTP status code.
        status: u16,
        /// Response body, relayed unchanged.
        body: String,
        /// Response `content-type`.
        content_type: Option<String>,
    },
    /// The Selector found no candidate key at all (`EngineError::NoKeyAvailable`).
    NoKeyAvailable,
    /// All [`MAX_RETRIES`] attempts were exhausted without a terminal outcome.
    ServiceUnavailable,
    /// The caller's cancellation signal fired before a terminal outcome.
    Cancelled,
}

/// Run the bounded-retry Dispatch Loop for one client request against
/// `requested_model`.
///
/// `cancel` is checked before each attempt and races the pre-call delay and
/// the transient-retry backoff, so a client disconnect preempts sleeping.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    engine: &Engine,
    upstream: &UpstreamClient,
    requested_model: &str,
    protocol: Protocol,
    path_suffix: &str,
    body: Value,
    mut cancel: watch::Receiver<bool>,
) -> DispatchResult {
    for attempt in 1..=MAX_RETRIES {
        if *cancel.borrow() {
            return DispatchResult::Cancelled;
        }

        let now = clock::now_unix();
        let selection = match engine.select(requested_model, now) {
            Ok(selection) => selection,
            Err(e) => {
                warn!(error = %e, requested_model, "dispatch: no key available");
                return DispatchResult::NoKeyAvailable;
            }
        };

        if selection.delay > Duration::ZERO {
            if sleep_or_cancel(selection.delay, &mut cancel).await {
                return DispatchResult::Cancelled;
            }
        }

        info!(
            attempt,
            model = %selection.model,
            key_class = ?selection.key.class,
            "dispatching to upstream"
        );

        let outcome = match upstream
            .forward(
                protocol,
                path_suffix,
                &selection.model,
                &selection.key.key,
                body.clone(),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, attempt, "upstream transport error, retrying as transient");
                if sleep_or_cancel(TRANSIENT_RETRY_SLEEP, &mut cancel).await {
                    return DispatchResult::Cancelled;
                }
                continue;
            }
        };

        match outcome {
            DispatchOutcome::Success {
                tokens,
                status,
                body,
                content_type,
            } => {
                engine.record_usage(&selection.model, &selection.key.key, tokens, now);
                return DispatchResult::Success {
                    status,
                    body,
                    content_type,
                };
            }
            DispatchOutcome::RateLimited => {
                engine.handle_rate_limit(&selection.model, &selection.key.key, now);
            }
            DispatchOutcome::Transient => {
                if sleep_or_cancel(TRANSIENT_RETRY_SLEEP, &mut cancel).await {
                    return DispatchResult::Cancelled;
                }
            }
            DispatchOutcome::Other {
                status,
                body,
                content_type,
            } => {
                return DispatchResult::Other {
                    status,
                    body,
                    content_type,
                };
            }
        }
    }

    warn!(requested_model, "dispatch: retries exhausted");
    DispatchResult::ServiceUnavailable
}

/// Sleep for `duration`, racing the cancellation watch channel. Returns
/// `true` if cancellation fired first.
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        result = cancel.changed() => result.is_err() || *cancel.borrow(),
    }
}
