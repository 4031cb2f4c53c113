//! `clap`-derived command line: a `serve` subcommand (default) that runs the
//! proxy, and a couple of thin `keys` subcommands that talk to a *running*
//! instance's HTTP surface rather than touching engine state directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-tenant reverse proxy and key/rate-budget engine for a hosted LLM API.
#[derive(Debug, Parser)]
#[command(name = "keyforge", version, about)]
pub struct Cli {
    /// Subcommand to run. Defaults to `serve` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP proxy and all background tasks until shutdown.
    Serve(ServeArgs),
    /// Maintenance calls against a running instance's `/api` surface.
    Keys {
        /// Which key maintenance action to perform.
        #[command(subcommand)]
        action: KeysAction,
    },
}

/// Arguments for the `serve` subcommand.
#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Path to the JSON configuration file. Overrides `$KEYFORGE_CONFIG_PATH`.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Path to the JSON usage-snapshot file. Defaults next to the config file.
    #[arg(long)]
    pub usage: Option<PathBuf>,
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,
    /// Base URL of the upstream vendor API.
    #[arg(
        long,
        env = "KEYFORGE_UPSTREAM_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub upstream: String,
    /// Directory for rotated JSON log files. Defaults to `~/.keyforge/logs`.
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,
}

/// `keys` maintenance subcommands.
#[derive(Debug, Subcommand)]
pub enum KeysAction {
    /// Send a single validation call to upstream through a running instance.
    Test(KeysTestArgs),
    /// Clear `probably_exceeded`/`just_hit_429` for a `(model, key)` cell.
    Enable(KeysEnableArgs),
}

/// Arguments shared by the `keys test`/`keys enable` admin calls.
#[derive(Debug, clap::Args)]
pub struct KeysTestArgs {
    /// Base URL of the running `keyforge` instance, e.g. `http://localhost:8080`.
    #[arg(long, default_value = "http://localhost:8080")]
    pub base_url: String,
    /// Model name to test.
    #[arg(long)]
    pub model: String,
    /// API key to test.
    #[arg(long)]
    pub key: String,
}

/// Arguments for `keys enable`.
#[derive(Debug, clap::Args)]
pub struct KeysEnableArgs {
    /// Base URL of the running `keyforge` instance, e.g. `http://localhost:8080`.
    #[arg(long, default_value = "http://localhost:8080")]
    pub base_url: String,
    /// Model name to re-enable.
    #[arg(long)]
    pub model: String,
    /// API key to re-enable.
    #[arg(long)]
    pub key: String,
}
