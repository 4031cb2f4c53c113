//! Snapshot Reporter: a read-only aggregate view over the Ledger, Registry,
//! and Budget Policy for the status dashboard, plus the 5-second history
//! aggregator that feeds its minute-bucketed time series.
//!
//! The aggregator overwrites rather than sums same-minute buckets — safe
//! only because its cadence is the fixed [`HISTORY_TICK_SECS`] constant; if
//! that cadence ever became configurable, summation would be required
//! instead (see `DESIGN.md`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::clock;
use crate::engine::Engine;

/// Cadence of the background history aggregator.
pub const HISTORY_TICK_SECS: u64 = 5;
/// How long a history point is retained before being pruned.
const HISTORY_RETENTION_SECS: i64 = 3600;
/// Width of the rebucketed series returned in a [`crate::engine::Snapshot`].
const SERIES_MINUTES: i64 = 60;

/// One minute-aligned data point in a time series.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeriesPoint {
    /// Unix timestamp of the minute this point represents.
    pub minute: i64,
    /// Tokens summed over that minute's `window_60s` at aggregation time.
    pub tokens: u64,
}

/// Combine a model name and key into the label used for per-key series.
pub fn key_label(model: &str, key: &str) -> String {
    format!("{model}|{key}")
}

/// Minute-bucketed history for every model and every `(model, key)` pair,
/// guarded by the Engine's separate History mutex.
#[derive(Default)]
pub struct HistoryState {
    model_points: HashMap<String, VecDeque<(i64, u64)>>,
    key_points: HashMap<String, VecDeque<(i64, u64)>>,
}

impl HistoryState {
    /// Build empty history state.
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(points: &mut VecDeque<(i64, u64)>, minute_bucket: i64, tokens: u64, now: i64) {
        match points.back_mut() {
            Some(last) if last.0 == minute_bucket => last.1 = tokens,
            _ => points.push_back((minute_bucket, tokens)),
        }
        let floor = now.saturating_sub(HISTORY_RETENTION_SECS);
        while let Some(front) = points.front() {
            if front.0 < floor {
                points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record one aggregator tick: `now`'s window-60s totals, per model and
    /// per `(model, key)` label, overwriting the current minute's bucket.
    pub fn record_tick(
        &mut self,
        now: i64,
        model_totals: &HashMap<String, u64>,
        key_totals: &HashMap<String, u64>,
    ) {
        let minute_bucket = now.saturating_sub(now.rem_euclid(60));
        for (model, tokens) in model_totals {
            let points = self.model_points.entry(model.clone()).or_default();
            Self::upsert(points, minute_bucket, *tokens, now);
        }
        for (label, tokens) in key_totals {
            let points = self.key_points.entry(label.clone()).or_default();
            Self::upsert(points, minute_bucket, *tokens, now);
        }
    }

    fn rebucket(points: Option<&VecDeque<(i64, u64)>>, now: i64) -> Vec<SeriesPoint> {
        let current_minute = now.saturating_sub(now.rem_euclid(60));
        (0..SERIES_MINUTES)
            .rev()
            .map(|offset| {
                let minute = current_minute.saturating_sub(offset.saturating_mul(60));
                let tokens = points
                    .and_then(|p| p.iter().find(|(bucket, _)| *bucket == minute))
                    .map_or(0, |(_, tokens)| *tokens);
                SeriesPoint { minute, tokens }
            })
            .collect()
    }

    /// The last-hour, minute-aligned, zero-filled series for one model.
    pub fn model_series(&self, model: &str, now: i64) -> Vec<SeriesPoint> {
        Self::rebucket(self.model_points.get(model), now)
    }

    /// The last-hour, minute-aligned, zero-filled series for one `(model, key)` label.
    pub fn key_series(&self, label: &str, now: i64) -> Vec<SeriesPoint> {
        Self::rebucket(self.key_points.get(label), now)
    }
}

/// Per-`(model, key)` row in a [`Snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct CellSnapshot {
    /// Model name.
    pub model: String,
    /// API key.
    pub key: String,
    /// Tokens consumed in the trailing 60s window.
    pub tokens_last_minute: u64,
    /// Lifetime token total.
    pub total_tokens: u64,
    /// Tokens consumed since the last reset.
    pub today_tokens: u64,
    /// Soft-disabled flag.
    pub probably_exceeded: bool,
    /// Hard-disabled flag.
    pub exceeded: bool,
}

/// Read-only aggregate view for the status dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Grand total of `total_tokens_lifetime` across all cells.
    pub total_tokens_lifetime: u64,
    /// Grand total of `today_tokens` across all cells.
    pub total_tokens_today: u64,
    /// The currently-preferred key for the default model, if one is available.
    pub preferred_key_default_model: Option<String>,
    /// Every configured `(model, key)` cell.
    pub cells: Vec<CellSnapshot>,
    /// Keys that are `probably_exceeded` for at least one model.
    pub rate_limited: Vec<String>,
    /// Keys that are `exceeded` for at least one model.
    pub quota_exhausted: Vec<String>,
    /// Reserved; currently always empty.
    pub unavailable: Vec<String>,
    /// Last-hour, minute-bucketed series per model.
    pub model_series: HashMap<String, Vec<SeriesPoint>>,
    /// Last-hour, minute-bucketed series per `(model, key)` label.
    pub key_series: HashMap<String, Vec<SeriesPoint>>,
}

/// Run the 5-second history aggregator until `shutdown` fires.
///
/// Each tick sums `window_60s` per model and per `(model, key)` and records
/// one (possibly overwriting) data point, pruning anything older than an
/// hour.
pub async fn run_aggregator(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(HISTORY_TICK_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.tick_history(clock::now_unix());
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("history aggregator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_same_minute_bucket() {
        let mut history = HistoryState::new();
        let mut totals = HashMap::new();
        totals.insert("m".to_owned(), 10);
        history.record_tick(1_000, &totals, &HashMap::new());
        totals.insert("m".to_owned(), 25);
        history.record_tick(1_004, &totals, &HashMap::new());

        let series = history.model_series("m", 1_004);
        let last = series.last().unwrap();
        assert_eq!(last.tokens, 25);
    }

    #[test]
    fn prunes_points_older_than_retention() {
        let mut history = HistoryState::new();
        let mut totals = HashMap::new();
        totals.insert("m".to_owned(), 5);
        history.record_tick(0, &totals, &HashMap::new());
        history.record_tick(HISTORY_RETENTION_SECS + 3700, &totals, &HashMap::new());

        let series = history.model_series("m", HISTORY_RETENTION_SECS + 3700);
        assert!(series.iter().all(|p| p.minute >= 0));
        assert_eq!(series.len() as i64, SERIES_MINUTES);
    }

    #[test]
    fn zero_fills_gaps_in_rebucketed_series() {
        let history = HistoryState::new();
        let series = history.model_series("unknown", 3_600);
        assert_eq!(series.len() as i64, SERIES_MINUTES);
        assert!(series.iter().all(|p| p.tokens == 0));
    }

    #[test]
    fn key_label_joins_model_and_key() {
        assert_eq!(key_label("gpt", "k1"), "gpt|k1");
    }
}
