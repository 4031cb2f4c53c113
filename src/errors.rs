//! Error kinds shared across the engine, HTTP layer, and persistence adapter.
//!
//! Each component owns its own `thiserror` enum (see [`crate::clock::ClockError`],
//! [`crate::engine::EngineError`], [`crate::providers::ProviderError`]); this module
//! holds the few error kinds that don't have a more specific home and the
//! top-level [`ConfigError`] used at startup.

use std::path::PathBuf;

/// Configuration load/validation failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configured timezone is not a recognized IANA zone.
    #[error("invalid configuration: {0}")]
    InvalidTimezone(#[from] crate::clock::ClockError),
    /// The configuration file could not be read or written.
    #[error("configuration I/O error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Engine-level failures surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The Selector found neither an Available nor a Degraded key for this model.
    #[error("no key available for model '{model}'")]
    NoKeyAvailable {
        /// The resolved model name (after default substitution).
        model: String,
    },
}

/// Persistence adapter failures. Never fatal — logged, retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Reading or writing the backing file failed.
    #[error("persistence I/O error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The stored JSON did not match the expected schema.
    #[error("persistence decode error at {path}: {source}")]
    Decode {
        /// Path that failed.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}
