//! Key Registry: a stable ordered set of keys partitioned into priority and
//! secondary classes.
//!
//! Iteration order is not round-robin — it's the canonical order the
//! Selector walks every time: all priority keys (config order), then all
//! secondary keys (config order). This preserves the upstream's
//! prompt-caching benefit from a sticky key choice.

use crate::config::ProxyConfig;

/// Which class a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Tried before any secondary key.
    Priority,
    /// Tried only once no priority key is available.
    Secondary,
}

/// A key's identity within the registry: its class and stable insertion index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    /// The raw API key string.
    pub key: String,
    /// Priority or secondary.
    pub class: KeyClass,
    /// Insertion order within its class.
    pub index: usize,
}

/// Ordered, stable collection of keys used by the Selector.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    keys: Vec<KeyRef>,
}

impl KeyRegistry {
    /// Build the registry from configuration: all priority keys, config
    /// order, then all secondary keys, config order.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut keys = Vec::with_capacity(config.priority_keys.len() + config.secondary_keys.len());
        for (index, key) in config.priority_keys.iter().enumerate() {
            keys.push(KeyRef {
                key: key.clone(),
                class: KeyClass::Priority,
                index,
            });
        }
        for (index, key) in config.secondary_keys.iter().enumerate() {
            keys.push(KeyRef {
                key: key.clone(),
                class: KeyClass::Secondary,
                index,
            });
        }
        Self { keys }
    }

    /// Iterate keys in canonical Selector order: priority first, then secondary.
    pub fn iter(&self) -> impl Iterator<Item = &KeyRef> {
        self.keys.iter()
    }

    /// Total number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the registry holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(priority: &[&str], secondary: &[&str]) -> ProxyConfig {
        ProxyConfig {
            priority_keys: priority.iter().map(|s| (*s).to_owned()).collect(),
            secondary_keys: secondary.iter().map(|s| (*s).to_owned()).collect(),
            models: HashMap::new(),
            reset_after: "00:00".to_owned(),
            next_quota_reset_datetime: "2026-07-28 00:00".to_owned(),
            timezone: "UTC".to_owned(),
            default_model: "default".to_owned(),
        }
    }

    #[test]
    fn orders_priority_before_secondary_preserving_config_order() {
        let config = config_with(&["p1", "p2"], &["s1", "s2"]);
        let registry = KeyRegistry::from_config(&config);
        let ordered: Vec<&str> = registry.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(ordered, vec!["p1", "p2", "s1", "s2"]);
    }

    #[test]
    fn len_and_is_empty_reflect_total_keys() {
        let registry = KeyRegistry::from_config(&config_with(&[], &[]));
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);

        let registry = KeyRegistry::from_config(&config_with(&["p1"], &["s1"]));
        assert_eq!(registry.len(), 2);
    }
}
