//! `keyforge` — a multi-tenant reverse proxy and key/rate-budget engine for
//! a hosted LLM API.
//!
//! The [`engine`] module is the core: the Key Selection & Rate-Budget Engine
//! together with its request-dispatch state machine. Everything else —
//! [`http`], [`providers`], [`persistence`], [`config`] — is an external
//! collaborator consumed through the Engine's public API.

#![allow(missing_docs)] // TODO: enforce once the HTTP/CLI surfaces are stable

pub mod clock;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod http;
pub mod logging;
pub mod persistence;
pub mod providers;
