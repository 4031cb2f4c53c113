//! Selector: chooses a `(model, key)` pair for a request and computes its
//! pre-call delay.
//!
//! A single `primary -> fallback -> NoKeyAvailable` pass over the
//! [`KeyRegistry`] in canonical order, under the Engine mutex.

use std::time::Duration;

use tracing::warn;

use crate::config::ProxyConfig;
use crate::engine::budget::{self, Availability};
use crate::engine::ledger::UsageCell;
use crate::engine::registry::{KeyRef, KeyRegistry};
use crate::errors::EngineError;

/// A selected `(key, model, delay)` triple, ready for the Dispatch Loop.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen key.
    pub key: KeyRef,
    /// The resolved model name (may differ from the requested name if it
    /// fell back to the configured default).
    pub model: String,
    /// Pre-call delay the caller must sleep before forwarding.
    pub delay: Duration,
}

/// Resolve `requested_model` against the configuration, substituting the
/// default model (with a log line) if it isn't configured.
pub fn resolve_model<'a>(config: &'a ProxyConfig, requested_model: &str) -> &'a str {
    if config.models.contains_key(requested_model) {
        requested_model
    } else {
        warn!(
            requested_model,
            default_model = %config.default_model,
            "requested model not configured, substituting default"
        );
        &config.default_model
    }
}

/// Select a `(key, model, delay)` triple for `requested_model`.
///
/// Walks the registry in canonical order, classifying each key's cell.
/// Unavailable keys are skipped; Available keys go to `primary`, Degraded
/// keys to `fallback`. Returns the first `primary` candidate if any exist,
/// else the first `fallback` candidate, else [`EngineError::NoKeyAvailable`].
///
/// # Errors
///
/// Returns [`EngineError::NoKeyAvailable`] if every key is Unavailable for
/// this model, or if the registry is empty.
pub fn select(
    config: &ProxyConfig,
    registry: &KeyRegistry,
    cells: &mut dyn FnMut(&str, &str) -> &mut UsageCell,
    requested_model: &str,
    now: i64,
) -> Result<Selection, EngineError> {
    resolve_candidates(config, registry, cells, requested_model, now, true)
}

/// Read-only variant of [`select`] for the Snapshot Reporter: classifies
/// candidates from each cell's already-current `exceeded` /
/// `probably_exceeded` flags instead of calling [`budget::apply_caps`], so
/// a dashboard poll can never flip a cell's `exceeded` flag as a side effect.
/// `touch`'s lazy GC still runs — that's fine on any read path.
///
/// # Errors
///
/// Returns [`EngineError::NoKeyAvailable`] if every key is Unavailable for
/// this model, or if the registry is empty.
pub fn select_read_only(
    config: &ProxyConfig,
    registry: &KeyRegistry,
    cells: &mut dyn FnMut(&str, &str) -> &mut UsageCell,
    requested_model: &str,
    now: i64,
) -> Result<Selection, EngineError> {
    resolve_candidates(config, registry, cells, requested_model, now, false)
}

fn resolve_candidates(
    config: &ProxyConfig,
    registry: &KeyRegistry,
    cells: &mut dyn FnMut(&str, &str) -> &mut UsageCell,
    requested_model: &str,
    now: i64,
    apply_caps: bool,
) -> Result<Selection, EngineError> {
    let model = resolve_model(config, requested_model).to_owned();
    let Some(limits) = config.models.get(&model).copied() else {
        return Err(EngineError::NoKeyAvailable {
            model: model.clone(),
        });
    };

    let mut primary: Vec<(KeyRef, Duration)> = Vec::new();
    let mut fallback: Vec<(KeyRef, Duration)> = Vec::new();

    for key_ref in registry.iter() {
        let cell = cells(&model, &key_ref.key);
        let window_60s = cell.touch(now);
        if apply_caps {
            budget::apply_caps(cell, &limits);
        }

        let tier = budget::classify(cell);
        if tier == Availability::Unavailable {
            continue;
        }

        let t60 = window_60s.iter().fold(0u64, |acc, r| acc.saturating_add(r.tokens));
        let delay = budget::pre_call_delay(t60, limits.tpm_limit);
        if tier == Availability::Available {
            primary.push((key_ref.clone(), delay));
        } else {
            fallback.push((key_ref.clone(), delay));
        }
    }

    let (key, delay) = primary
        .into_iter()
        .next()
        .or_else(|| fallback.into_iter().next())
        .ok_or_else(|| EngineError::NoKeyAvailable { model: model.clone() })?;

    Ok(Selection { key, model, delay })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelLimits;
    use std::collections::HashMap;

    fn config(tpm: u64) -> ProxyConfig {
        let mut models = HashMap::new();
        models.insert(
            "m".to_owned(),
            ModelLimits {
                tpm_limit: tpm,
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

    fn registry(config: &ProxyConfig) -> KeyRegistry {
        KeyRegistry::from_config(config)
    }

    #[test]
    fn selects_first_priority_key_when_all_available() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };
        let selection = select(&config, &reg, &mut getter, "m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
        assert_eq!(selection.model, "m");
    }

    #[test]
    fn falls_back_to_secondary_when_priority_probably_exceeded() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        map.entry(("m".to_owned(), "k1".to_owned())).or_insert_with(UsageCell::new).probably_exceeded = true;
        map.entry(("m".to_owned(), "k2".to_owned())).or_insert_with(UsageCell::new).probably_exceeded = true;
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };
        let selection = select(&config, &reg, &mut getter, "m", 0).unwrap();
        assert_eq!(selection.key.key, "k3");
    }

    #[test]
    fn falls_back_to_priority_degraded_when_all_degraded() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        for k in ["k1", "k2", "k3"] {
            map.entry(("m".to_owned(), k.to_owned())).or_insert_with(UsageCell::new).probably_exceeded = true;
        }
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };
        let selection = select(&config, &reg, &mut getter, "m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
    }

    #[test]
    fn fails_when_all_exceeded() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        for k in ["k1", "k2", "k3"] {
            map.entry(("m".to_owned(), k.to_owned())).or_insert_with(UsageCell::new).exceeded = true;
        }
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };
        let result = select(&config, &reg, &mut getter, "m", 0);
        assert!(matches!(result, Err(EngineError::NoKeyAvailable { .. })));
    }

    #[test]
    fn substitutes_default_model_for_unknown_request() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };
        let selection = select(&config, &reg, &mut getter, "unknown-model", 0).unwrap();
        assert_eq!(selection.model, "m");
    }

    #[test]
    fn read_only_select_never_sets_exceeded() {
        let config = config(1000);
        let reg = registry(&config);
        let mut map: HashMap<(String, String), UsageCell> = HashMap::new();
        map.entry(("m".to_owned(), "k1".to_owned()))
            .or_insert_with(UsageCell::new)
            .today_tokens = crate::engine::ledger::HARD_DAILY_CAP_TOKENS;
        let mut getter = |m: &str, k: &str| {
            map.entry((m.to_owned(), k.to_owned())).or_insert_with(UsageCell::new)
        };

        let selection = select_read_only(&config, &reg, &mut getter, "m", 0).unwrap();
        assert_eq!(selection.key.key, "k1");
        assert!(!map.get(&("m".to_owned(), "k1".to_owned())).unwrap().exceeded);
    }
}
