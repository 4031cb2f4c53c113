//! Budget Policy: availability classification and pre-call delay for a
//! single `UsageCell` against its Model's configured limits.
//!
//! Adapted from the session/daily percent-of-limit scoring used elsewhere
//! in this codebase family, generalized from a single atomic daily counter
//! to the per-(model, key) sliding-window cells the Usage Ledger holds.

use crate::config::ModelLimits;
use crate::engine::ledger::{UsageCell, HARD_DAILY_CAP_TOKENS};

/// A cell's availability tier for Selector purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// `!exceeded && !probably_exceeded` — tried first.
    Available,
    /// `!exceeded && probably_exceeded` — tried only if no Available key exists.
    Degraded,
    /// `exceeded` — never selected until reset or explicit re-enable.
    Unavailable,
}

/// Apply the hard daily cap and configured TPD cap, setting `exceeded` if
/// either is breached. Call after `touch` so `today_tokens`/`history_24h`
/// are current.
pub fn apply_caps(cell: &mut UsageCell, limits: &ModelLimits) {
    if cell.today_tokens >= HARD_DAILY_CAP_TOKENS {
        cell.exceeded = true;
        return;
    }
    if let Some(tpd_limit) = limits.tpd_limit {
        if cell.history_tokens_24h() >= tpd_limit {
            cell.exceeded = true;
        }
    }
}

/// Classify a cell's current availability tier.
///
/// Call after [`apply_caps`] so `exceeded` reflects the latest caps.
pub fn classify(cell: &UsageCell) -> Availability {
    if cell.exceeded {
        Availability::Unavailable
    } else if cell.probably_exceeded {
        Availability::Degraded
    } else {
        Availability::Available
    }
}

/// Compute the TPM-throttling pre-call delay from the `window_60s` sum.
///
/// - `t60 <= tpm_limit / 2`: no delay.
/// - `tpm_limit / 2 < t60 <= tpm_limit`: scales linearly up to 60s.
/// - `t60 > tpm_limit`: capped at 60s.
#[allow(clippy::cast_precision_loss)]
pub fn pre_call_delay(window_60s_tokens: u64, tpm_limit: u64) -> std::time::Duration {
    if tpm_limit == 0 {
        return std::time::Duration::from_secs(60);
    }

    let half = tpm_limit / 2;
    if window_60s_tokens <= half {
        return std::time::Duration::ZERO;
    }
    if window_60s_tokens > tpm_limit {
        return std::time::Duration::from_secs(60);
    }

    let numerator = (window_60s_tokens.saturating_sub(half)) as f64;
    let seconds = (numerator / tpm_limit as f64) * 60.0;
    std::time::Duration::from_secs_f64(seconds.max(0.0))
}
