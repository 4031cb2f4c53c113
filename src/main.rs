#![allow(missing_docs)]

//! `keyforge` binary entry point: parses the CLI, then either runs the
//! proxy (`serve`) or issues a thin admin HTTP call against a running
//! instance (`keys test` / `keys enable`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use keyforge::cli::{Cli, Command, KeysAction, KeysEnableArgs, KeysTestArgs, ServeArgs};
use keyforge::config::ProxyConfig;
use keyforge::engine::{self, Engine};
use keyforge::http::{self, AppState};
use keyforge::logging;
use keyforge::persistence::{FilePersistence, PersistenceAdapter};
use keyforge::providers::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(default_serve_command) {
        Command::Serve(args) => run_serve(args).await,
        Command::Keys { action } => match action {
            KeysAction::Test(args) => run_keys_test(args).await,
            KeysAction::Enable(args) => run_keys_enable(args).await,
        },
    }
}

/// Arguments used when `keyforge` is invoked with no subcommand at all,
/// mirroring [`ServeArgs`]'s own clap defaults.
fn default_serve_command() -> Command {
    Command::Serve(ServeArgs {
        config: None,
        usage: None,
        addr: "0.0.0.0:8080".to_owned(),
        upstream: std::env::var("KEYFORGE_UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_owned()),
        logs_dir: None,
    })
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let logs_dir = args.logs_dir.unwrap_or_else(default_logs_dir);
    let _logging_guard =
        logging::init_production(&logs_dir).context("failed to initialize logging")?;

    info!("keyforge starting");

    let config_path = args.config.unwrap_or_else(ProxyConfig::resolve_path);
    let usage_path = args
        .usage
        .unwrap_or_else(|| config_path.with_file_name("usage.json"));

    let config = ProxyConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    let persistence: Arc<dyn PersistenceAdapter> =
        Arc::new(FilePersistence::new(config_path.clone(), usage_path));

    let engine = Arc::new(Engine::new(config));
    if let Some(snapshot) = persistence
        .load_usage()
        .await
        .context("failed to load usage snapshot")?
    {
        engine.restore_usage(&snapshot);
        info!("restored usage snapshot from disk");
    }

    let upstream = Arc::new(UpstreamClient::new(args.upstream));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autosave_handle = tokio::spawn(engine::autosave::run(
        Arc::clone(&engine),
        Arc::clone(&persistence),
        shutdown_rx.clone(),
    ));
    let reset_handle = tokio::spawn(engine::reset::run(
        Arc::clone(&engine),
        Arc::clone(&persistence),
        shutdown_rx.clone(),
    ));
    let aggregator_handle = tokio::spawn(engine::snapshot::run_aggregator(
        Arc::clone(&engine),
        shutdown_rx.clone(),
    ));

    let state = AppState {
        engine: Arc::clone(&engine),
        upstream,
    };
    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    info!(addr = %args.addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down, flushing background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(autosave_handle, reset_handle, aggregator_handle);

    Ok(())
}

async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler, shutdown signal will never fire");
        std::future::pending::<()>().await;
    }
}

/// `~/.keyforge/logs`, the default rotated-log directory when `--logs-dir`
/// isn't given.
fn default_logs_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("logs"),
        |base| base.home_dir().join(".keyforge").join("logs"),
    )
}

async fn run_keys_test(args: KeysTestArgs) -> Result<()> {
    logging::init_cli();
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/test_key", args.base_url.trim_end_matches('/')))
        .json(&serde_json::json!({ "api_key": args.key, "model_name": args.model }))
        .send()
        .await
        .context("failed to reach keyforge instance")?;
    let body: serde_json::Value = response.json().await.context("failed to parse response")?;
    println!("{body}");
    Ok(())
}

async fn run_keys_enable(args: KeysEnableArgs) -> Result<()> {
    logging::init_cli();
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/enable_model", args.base_url.trim_end_matches('/')))
        .json(&serde_json::json!({ "model_name": args.model, "api_key": args.key }))
        .send()
        .await
        .context("failed to reach keyforge instance")?;
    info!(status = %response.status(), "keys enable: done");
    Ok(())
}
