//! Usage Ledger: per-(model, key) token-timestamp log with sliding-window
//! queries over 60 seconds and 24 hours.
//!
//! Generalizes the single atomic daily counter used elsewhere in this
//! codebase family to a per-cell append-only log, since the Budget Policy
//! needs a genuine sliding TPM window rather than a calendar-day counter.

use std::collections::VecDeque;

/// Safety-net daily cap applied regardless of any configured `tpd_limit`.
pub const HARD_DAILY_CAP_TOKENS: u64 = 4_100_000;

/// A single `(timestamp_seconds, tokens)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
    /// Unix timestamp in seconds when these tokens were recorded.
    pub timestamp: i64,
    /// Tokens consumed at that instant.
    pub tokens: u64,
}

/// Per-(model, key) accounting record.
///
/// Holds no reference to its Model's limits — those are always looked up
/// by name against the live configuration, so a config reload can't leave
/// a cell holding stale limits.
#[derive(Debug, Clone)]
pub struct UsageCell {
    /// Monotone non-decreasing lifetime total.
    pub total_tokens_lifetime: u64,
    /// Tokens recorded since the last reset.
    pub today_tokens: u64,
    /// 24h sliding-window history, time-ascending.
    pub history_24h: VecDeque<UsageRecord>,
    /// Soft-disabled: a retry-after-delay still got 429'd.
    pub probably_exceeded: bool,
    /// Hard-disabled for the day.
    pub exceeded: bool,
    /// Transient, non-persistent: one 429 observed since the last success.
    pub just_hit_429: bool,
}

impl UsageCell {
    /// Build a fresh cell with no recorded usage.
    pub fn new() -> Self {
        Self {
            total_tokens_lifetime: 0,
            today_tokens: 0,
            history_24h: VecDeque::new(),
            probably_exceeded: false,
            exceeded: false,
            just_hit_429: false,
        }
    }

    /// Drop records older than 24h relative to `now` and return the `window_60s`
    /// subset (records with `timestamp >= now - 60`).
    ///
    /// Idempotent and cheap — every read path calls this first.
    pub fn touch(&mut self, now: i64) -> Vec<UsageRecord> {
        let floor_24h = now.saturating_sub(86_400);
        while let Some(front) = self.history_24h.front() {
            if front.timestamp < floor_24h {
                self.history_24h.pop_front();
            } else {
                break;
            }
        }

        let floor_60s = now.saturating_sub(60);
        self.history_24h
            .iter()
            .filter(|r| r.timestamp >= floor_60s)
            .copied()
            .collect()
    }

    /// Sum of tokens in `history_24h` (the TPD window).
    pub fn history_tokens_24h(&self) -> u64 {
        self.history_24h
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.tokens))
    }

    /// Record `tokens` consumed at `now`: appends to history, advances the
    /// lifetime and today counters, and clears `just_hit_429` (a success
    /// clears the one-strike state).
    pub fn append(&mut self, now: i64, tokens: u64) {
        self.history_24h.push_back(UsageRecord { timestamp: now, tokens });
        self.total_tokens_lifetime = self.total_tokens_lifetime.saturating_add(tokens);
        self.today_tokens = self.today_tokens.saturating_add(tokens);
        self.just_hit_429 = false;
    }

    /// Reset for a new day: zero `today_tokens` and `history_24h`, clear both
    /// exhaustion flags. `total_tokens_lifetime` is preserved.
    pub fn reset_for_new_day(&mut self) {
        self.today_tokens = 0;
        self.history_24h.clear();
        self.exceeded = false;
        self.probably_exceeded = false;
    }
}

impl Default for UsageCell {
    fn default() -> Self {
        Self::new()
    }
}
