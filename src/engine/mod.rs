//! The Key Selection & Rate-Budget Engine: the single owner of all Usage
//! Ledger, Key Registry, and Budget Policy state.
//!
//! Constructed once in `main` behind an `Arc` and shared with the HTTP
//! router and every background task (history aggregator, reset scheduler,
//! autosave) as the single owner of all shared state. Two mutexes guard
//! disjoint state: the Engine mutex (ledger, registry, config) and the
//! History mutex (minute-bucketed series); every public method takes at
//! most one, and [`Engine::snapshot`] is the only one that ever touches
//! both, always Engine before History.

pub mod autosave;
pub mod budget;
pub mod dispatch;
pub mod ledger;
pub mod registry;
pub mod reset;
pub mod selector;
pub mod snapshot;

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::clock;
use crate::config::ProxyConfig;
use crate::errors::EngineError;
use crate::persistence::{UsageCellWire, UsageRecordWire, UsageSnapshotWire};

pub use ledger::{UsageCell, UsageRecord, HARD_DAILY_CAP_TOKENS};
pub use registry::{KeyClass, KeyRef, KeyRegistry};
pub use selector::Selection;
pub use snapshot::{CellSnapshot, HistoryState, Snapshot};

/// State guarded by the Engine mutex: the live configuration, the key
/// registry derived from it, and every `(model, key)` usage cell.
struct EngineState {
    config: ProxyConfig,
    registry: KeyRegistry,
    cells: HashMap<(String, String), UsageCell>,
}

impl EngineState {
    fn new(config: ProxyConfig) -> Self {
        let registry = KeyRegistry::from_config(&config);
        let mut cells = HashMap::new();
        for key_ref in registry.iter() {
            for model in config.models.keys() {
                cells
                    .entry((model.clone(), key_ref.key.clone()))
                    .or_insert_with(UsageCell::new);
            }
        }
        Self {
            config,
            registry,
            cells,
        }
    }
}

/// Single owner of all Usage Ledger, Key Registry, and Budget Policy state.
pub struct Engine {
    state: Mutex<EngineState>,
    history: Mutex<HistoryState>,
}

impl Engine {
    /// Build a fresh Engine from configuration, with every configured
    /// `(model, key)` cell starting at zero.
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            state: Mutex::new(EngineState::new(config)),
            history: Mutex::new(HistoryState::new()),
        }
    }

    /// Overlay a loaded usage snapshot onto the freshly-built cells.
    ///
    /// Entries for `(model, key)` pairs no longer present in the live
    /// configuration are silently dropped (Invariant 1); missing cells stay
    /// at zero. `just_hit_429` is never part of the wire format and is
    /// always `false` after this call.
    pub fn restore_usage(&self, snapshot: &UsageSnapshotWire) {
        let mut state = self.lock_state();
        for ((model, key), cell) in &mut state.cells {
            let Some(wire_cell) = snapshot.get(&crate::persistence::wire_key(model, key)) else {
                continue;
            };
            cell.total_tokens_lifetime = wire_cell.total_tokens;
            cell.today_tokens = wire_cell.today_usage;
            cell.history_24h = wire_cell
                .past_24hrs_usage_data
                .iter()
                .map(|r| UsageRecord {
                    timestamp: r.timestamp,
                    tokens: r.cost_token,
                })
                .collect();
            cell.probably_exceeded = wire_cell.probably_exceeded;
            cell.exceeded = wire_cell.exceeded;
        }
    }

    /// Build the on-disk usage snapshot for every configured cell.
    pub fn to_usage_snapshot(&self) -> UsageSnapshotWire {
        let state = self.lock_state();
        state
            .cells
            .iter()
            .map(|((model, key), cell)| {
                let wire = UsageCellWire {
                    total_tokens: cell.total_tokens_lifetime,
                    today_usage: cell.today_tokens,
                    past_24hrs_usage_data: cell
                        .history_24h
                        .iter()
                        .map(|r| UsageRecordWire {
                            timestamp: r.timestamp,
                            cost_token: r.tokens,
                        })
                        .collect(),
                    probably_exceeded: cell.probably_exceeded,
                    exceeded: cell.exceeded,
                };
                (crate::persistence::wire_key(model, key), wire)
            })
            .collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, HistoryState> {
        self.history.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Select a `(key, model, delay)` triple for `model_name` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoKeyAvailable`] if every candidate key is
    /// Unavailable (or the registry is empty).
    pub fn select(&self, model_name: &str, now: i64) -> Result<Selection, EngineError> {
        let mut state = self.lock_state();
        let EngineState {
            config,
            registry,
            cells,
        } = &mut *state;
        let mut getter = |model: &str, key: &str| {
            cells
                .entry((model.to_owned(), key.to_owned()))
                .or_insert_with(UsageCell::new)
        };
        selector::select(config, registry, &mut getter, model_name, now)
    }

    /// The configured default model, substituted whenever a request names
    /// a model that isn't in the live configuration.
    pub fn default_model(&self) -> String {
        self.lock_state().config.default_model.clone()
    }

    /// Read-only variant of [`Engine::select`] used only by the Snapshot
    /// Reporter: classifies candidates from each cell's current
    /// `exceeded`/`probably_exceeded` flags instead of calling
    /// `budget::apply_caps`, so polling `/api/status_data` can never flip a
    /// cell's `exceeded` flag as a side effect. `touch`'s lazy GC still runs.
    pub fn preferred_key(&self, model_name: &str, now: i64) -> Option<KeyRef> {
        let mut state = self.lock_state();
        let EngineState {
            config,
            registry,
            cells,
        } = &mut *state;
        let mut getter = |model: &str, key: &str| {
            cells
                .entry((model.to_owned(), key.to_owned()))
                .or_insert_with(UsageCell::new)
        };
        selector::select_read_only(config, registry, &mut getter, model_name, now)
            .ok()
            .map(|s| s.key)
    }

    /// Record a successful call: append usage and clear the one-strike flag.
    pub fn record_usage(&self, model: &str, key: &str, tokens: u64, now: i64) {
        let mut state = self.lock_state();
        let cell = state
            .cells
            .entry((model.to_owned(), key.to_owned()))
            .or_insert_with(UsageCell::new);
        cell.touch(now);
        cell.append(now, tokens);
    }

    /// Apply the two-strike rate-limit policy to a `(model, key)` cell.
    pub fn handle_rate_limit(&self, model: &str, key: &str, now: i64) {
        let mut state = self.lock_state();
        let cell = state
            .cells
            .entry((model.to_owned(), key.to_owned()))
            .or_insert_with(UsageCell::new);
        cell.touch(now);

        if cell.today_tokens >= HARD_DAILY_CAP_TOKENS {
            cell.exceeded = true;
            return;
        }
        if cell.just_hit_429 {
            cell.probably_exceeded = true;
            cell.just_hit_429 = false;
        } else {
            cell.just_hit_429 = true;
        }
    }

    /// Clear `probably_exceeded` and `just_hit_429` for a `(model, key)` cell.
    ///
    /// Idempotent: repeated calls leave an already-enabled cell unchanged.
    pub fn enable_key(&self, model: &str, key: &str) {
        let mut state = self.lock_state();
        if let Some(cell) = state.cells.get_mut(&(model.to_owned(), key.to_owned())) {
            cell.probably_exceeded = false;
            cell.just_hit_429 = false;
        }
    }

    /// Fire the daily reset if `now` has reached the configured next-reset
    /// instant. Returns the updated configuration (with the advanced
    /// `next_quota_reset_datetime`) to persist, or `None` if reset did not fire.
    pub fn maybe_reset(&self, now: DateTime<Utc>) -> Option<ProxyConfig> {
        let mut state = self.lock_state();
        let next_reset = clock::parse_reset_datetime(&state.config.next_quota_reset_datetime).ok()?;
        if now < next_reset {
            return None;
        }

        for cell in state.cells.values_mut() {
            cell.reset_for_new_day();
        }

        let tz = clock::resolve_timezone(&state.config.timezone).ok()?;
        let (hour, minute) = clock::parse_hhmm(&state.config.reset_after).ok()?;
        let new_next = clock::next_reset_after(now, hour, minute, tz);
        state.config.next_quota_reset_datetime = clock::format_reset_datetime(new_next);
        Some(state.config.clone())
    }

    /// One 5-second history-aggregator tick: sum each cell's `window_60s`
    /// into its model and `(model, key)` totals and record them.
    pub fn tick_history(&self, now: i64) {
        let (model_totals, key_totals) = {
            let mut state = self.lock_state();
            let mut model_totals: HashMap<String, u64> = HashMap::new();
            let mut key_totals: HashMap<String, u64> = HashMap::new();
            for ((model, key), cell) in &mut state.cells {
                let window = cell.touch(now);
                let sum = window.iter().fold(0u64, |acc, r| acc.saturating_add(r.tokens));
                model_totals
                    .entry(model.clone())
                    .and_modify(|t| *t = t.saturating_add(sum))
                    .or_insert(sum);
                key_totals.insert(snapshot::key_label(model, key), sum);
            }
            (model_totals, key_totals)
        };

        let mut history = self.lock_history();
        history.record_tick(now, &model_totals, &key_totals);
    }

    /// Build the read-only [`Snapshot`] for the status dashboard.
    pub fn snapshot(&self, now: i64) -> Snapshot {
        let (default_model, cells, total_lifetime, total_today, rate_limited, quota_exhausted) = {
            let mut state = self.lock_state();
            let default_model = state.config.default_model.clone();
            let mut total_lifetime = 0u64;
            let mut total_today = 0u64;
            let mut rate_limited = BTreeSet::new();
            let mut quota_exhausted = BTreeSet::new();
            let mut cells = Vec::with_capacity(state.cells.len());

            for ((model, key), cell) in &mut state.cells {
                let window = cell.touch(now);
                let tokens_last_minute = window.iter().fold(0u64, |acc, r| acc.saturating_add(r.tokens));
                total_lifetime = total_lifetime.saturating_add(cell.total_tokens_lifetime);
                total_today = total_today.saturating_add(cell.today_tokens);
                if cell.probably_exceeded {
                    rate_limited.insert(key.clone());
                }
                if cell.exceeded {
                    quota_exhausted.insert(key.clone());
                }
                cells.push(CellSnapshot {
                    model: model.clone(),
                    key: key.clone(),
                    tokens_last_minute,
                    total_tokens: cell.total_tokens_lifetime,
                    today_tokens: cell.today_tokens,
                    probably_exceeded: cell.probably_exceeded,
                    exceeded: cell.exceeded,
                });
            }
            (
                default_model,
                cells,
                total_lifetime,
                total_today,
                rate_limited,
                quota_exhausted,
            )
        };

        let preferred_key_default_model = self.preferred_key(&default_model, now).map(|k| k.key);

        let models: BTreeSet<&str> = cells.iter().map(|c| c.model.as_str()).collect();
        let (model_series, key_series) = {
            let history = self.lock_history();
            let model_series = models
                .into_iter()
                .map(|model| (model.to_owned(), history.model_series(model, now)))
                .collect();
            let key_series = cells
                .iter()
                .map(|c| {
                    let label = snapshot::key_label(&c.model, &c.key);
                    let series = history.key_series(&label, now);
                    (label, series)
                })
                .collect();
            (model_series, key_series)
        };

        Snapshot {
            total_tokens_lifetime: total_lifetime,
            total_tokens_today: total_today,
            preferred_key_default_model,
            cells,
            rate_limited: rate_limited.into_iter().collect(),
            quota_exhausted: quota_exhausted.into_iter().collect(),
            unavailable: Vec::new(),
            model_series,
            key_series,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelLimits;

    fn config() -> ProxyConfig {
        let mut models = HashMap::new();
        models.insert(
            "m".to_owned(),
            ModelLimits {
                tpm_limit: 1000,
                tpd_limit: None,
            },
        );
        ProxyConfig {
            priority_keys: vec!["k1".to_owned(), "k2".to_owned()],
            secondary_keys: vec!["k3".to_owned()],
            models,
            reset_after: "00:00".to_owned(),
            next_quota_reset_datetime: "2026-07-28 00:00".to_owned(),
            timezone: "UTC".to_owned(),
            default_model: "m".to_owned(),
        }
    }

    /// S1. Sticky key under light load.
    #[test]
    fn sticky_key_serves_sequential_requests() {
        let engine = Engine::new(config());
        for _ in 0..3 {
            let selection = engine.select("m", 0).unwrap();
            assert_eq!(selection.key.key, "k1");
            engine.record_usage("m", &selection.key.key, 10, 0);
        }
        let snap = engine.snapshot(0);
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert_eq!(k1.total_tokens, 30);
        let k2 = snap.cells.iter().find(|c| c.key == "k2").unwrap();
        assert_eq!(k2.total_tokens, 0);
    }

    /// S2. TPM half-limit delay.
    #[test]
    fn tpm_half_limit_delay() {
        let engine = Engine::new(config());
        engine.record_usage("m", "k1", 600, 0);
        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
        assert_eq!(selection.delay.as_secs(), 6);
    }

    /// S3. Two-strike escalation.
    #[test]
    fn two_strike_escalation_disables_key() {
        let engine = Engine::new(config());
        engine.handle_rate_limit("m", "k1", 0);
        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
        engine.handle_rate_limit("m", "k1", 0);

        let snap = engine.snapshot(0);
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert!(k1.probably_exceeded);

        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k2");
    }

    /// S4. Daily reset.
    #[test]
    fn daily_reset_preserves_lifetime_and_advances_schedule() {
        let engine = Engine::new(config());
        engine.record_usage("m", "k1", 5000, 0);
        engine.handle_rate_limit("m", "k1", 0);
        {
            let mut state = engine.lock_state();
            state.cells.get_mut(&("m".to_owned(), "k1".to_owned())).unwrap().exceeded = true;
        }

        let now = clock::parse_reset_datetime("2026-07-28 00:00").unwrap();
        let updated = engine.maybe_reset(now).expect("reset should fire");
        assert_eq!(updated.next_quota_reset_datetime, "2026-07-29 00:00");

        let snap = engine.snapshot(now.timestamp());
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert_eq!(k1.today_tokens, 0);
        assert!(!k1.exceeded);
        assert_eq!(k1.total_tokens, 5000);
    }

    /// S5. Hard-cap 429.
    #[test]
    fn hard_cap_429_sets_exceeded() {
        let engine = Engine::new(config());
        engine.record_usage("m", "k1", 4_100_001, 0);
        engine.handle_rate_limit("m", "k1", 0);

        let snap = engine.snapshot(0);
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert!(k1.exceeded);

        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k2");
    }

    /// S6. Fallback to degraded.
    #[test]
    fn fallback_through_degraded_tiers() {
        let engine = Engine::new(config());
        engine.handle_rate_limit("m", "k1", 0);
        engine.handle_rate_limit("m", "k1", 0);
        engine.handle_rate_limit("m", "k2", 0);
        engine.handle_rate_limit("m", "k2", 0);

        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k3");

        engine.handle_rate_limit("m", "k3", 0);
        engine.handle_rate_limit("m", "k3", 0);

        let selection = engine.select("m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
    }

    #[test]
    fn enable_key_is_idempotent() {
        let engine = Engine::new(config());
        engine.handle_rate_limit("m", "k1", 0);
        engine.handle_rate_limit("m", "k1", 0);
        engine.enable_key("m", "k1");
        engine.enable_key("m", "k1");

        let snap = engine.snapshot(0);
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert!(!k1.probably_exceeded);
    }

    #[test]
    fn restore_usage_drops_cells_for_removed_keys() {
        let engine = Engine::new(config());
        let mut wire = UsageSnapshotWire::new();
        wire.insert(
            "m_k1".to_owned(),
            UsageCellWire {
                total_tokens: 7,
                today_usage: 7,
                past_24hrs_usage_data: vec![],
                probably_exceeded: false,
                exceeded: false,
            },
        );
        wire.insert(
            "m_ghost-key".to_owned(),
            UsageCellWire {
                total_tokens: 999,
                today_usage: 999,
                past_24hrs_usage_data: vec![],
                probably_exceeded: false,
                exceeded: false,
            },
        );
        engine.restore_usage(&wire);

        let snap = engine.snapshot(0);
        let k1 = snap.cells.iter().find(|c| c.key == "k1").unwrap();
        assert_eq!(k1.total_tokens, 7);
        assert!(!snap.cells.iter().any(|c| c.key == "ghost-key"));
    }
}
