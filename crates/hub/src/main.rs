mod config;
mod control;
mod devices;
mod fetcher;
mod normalize;
mod registry;
mod settings;
mod shelly;
mod state;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use control::ControlLoop;
use devices::{FetchOptions, IrrigationController, PumpRelay};
use fetcher::SystemClock;
use settings::{Cli, Settings};
use shelly::{build_http, ShellyClient};
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Settings ────────────────────────────────────────────────────
    let cli = Cli::parse();
    let env_file = settings::load_env_file(&cli.env)?;
    let settings = Settings::from_env()?;

    init_tracing(&settings.logging_level);
    if let Some(path) = &env_file {
        info!(path = %path.display(), "loaded env file");
    }
    settings.log_defaults();

    // ── Devices config → registry ───────────────────────────────────
    let devices_path = settings.devices_config_path();
    let file = config::load(&devices_path)?;
    let registry = registry::load(&file)
        .with_context(|| format!("invalid devices config: {}", devices_path.display()))?;

    info!(
        controllers = registry.controllers.len(),
        invalid = registry.invalid.len(),
        pump = ?registry.pump.as_ref().map(|p| &p.name),
        "device registry loaded"
    );
    if registry.pump.is_none() {
        warn!("no pump relay configured, zones will be monitored only");
    }

    // ── Device models ───────────────────────────────────────────────
    let http = build_http(settings.timeout).context("failed to build http client")?;
    let opts = FetchOptions {
        policy: settings.retry_policy,
        clock: Arc::new(SystemClock),
    };

    let controllers: Vec<IrrigationController> = registry
        .controllers
        .into_iter()
        .map(|handle| {
            let client = ShellyClient::new(http.clone(), &handle.ip);
            IrrigationController::new(handle, &client, &opts)
        })
        .collect();

    let pump = registry.pump.map(|handle| {
        let client = ShellyClient::new(http.clone(), &handle.ip);
        PumpRelay::new(handle, client, &opts)
    });

    // ── Shared state (read by the status api) ───────────────────────
    let shared = SystemState::shared(registry.invalid);
    shared
        .write()
        .await
        .record_system("hub started".to_string());

    let cancel = CancellationToken::new();

    // ── Status api ──────────────────────────────────────────────────
    let web = tokio::spawn({
        let shared = Arc::clone(&shared);
        let cancel = cancel.clone();
        let port = settings.web_port;
        async move {
            if let Err(e) = web::serve(shared, port, cancel).await {
                error!("status api stopped: {e:#}");
            }
        }
    });

    // ── Ctrl-C ──────────────────────────────────────────────────────
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    ControlLoop::new(
        controllers,
        pump,
        settings.failsafe_seconds,
        settings.polling_interval,
        Arc::clone(&shared),
    )
    .run(cancel.clone())
    .await;

    cancel.cancel();
    if let Err(e) = web.await {
        error!("status api task failed: {e}");
    }
    Ok(())
}

fn init_tracing(logging_level: &str) {
    let directive = settings::level_directive(logging_level);

    // RUST_LOG wins over LOGGING_LEVEL.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(directive.unwrap_or("info"))),
        )
        .init();

    if directive.is_none() {
        warn!(level = logging_level, "unknown LOGGING_LEVEL, using info");
    }
}
