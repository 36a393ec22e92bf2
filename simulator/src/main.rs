use anyhow::Context;
use axum::{routing::get, Router};
use chrono::Utc;
use clap::Parser;
use simulator::seed::{demo_devices, origins};
use simulator::{Config, UpdateFeed};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracker::metrics;
use tracker::{DeviceRegistry, Relay, SharedRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting device tracker simulator");
    info!(
        "Seed: {}, Interval: {}ms, HTTP server: {}",
        config.seed, config.interval_ms, config.http_addr
    );

    metrics::init_metrics().context("failed to register metrics")?;

    let devices = demo_devices(Utc::now());
    let feed = UpdateFeed::new(config.feed(), origins(&devices))
        .context("invalid feed configuration")?;

    let mut registry = DeviceRegistry::new();
    for device in devices {
        registry.add_device(device);
    }
    metrics::record_registry(registry.len(), registry.sos_devices().len());
    let registry = tracker::relay::shared(registry);

    let watcher_handle = tokio::spawn(watch_state(registry.clone()));

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let mut relay = Relay::attach(registry.clone(), rx);
    let mut feed = feed.spawn(tx);

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(tracker::rest::create_router(registry));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = &mut server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    let emitted = feed.stop().await;
    let stats = relay.detach().await;
    info!(emitted, merged = stats.merged, "Feed and relay stopped");

    server_handle.abort();
    watcher_handle.abort();

    Ok(())
}

/// Stand-in for a UI: re-reads the registry on every change signal.
async fn watch_state(registry: SharedRegistry) {
    let mut subscription = registry.read().await.subscribe();

    while subscription.changed().await.is_some() {
        let registry = registry.read().await;
        let selected = registry.selected().map(|d| d.name.clone());

        if registry.any_sos_active() {
            let names: Vec<&str> = registry
                .sos_devices()
                .iter()
                .map(|d| d.name.as_str())
                .collect();
            warn!(devices = registry.len(), ?selected, sos = ?names, "SOS active");
        } else {
            info!(devices = registry.len(), ?selected, "State changed");
        }
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics().unwrap_or_else(|e| {
        error!("Failed to gather metrics: {}", e);
        String::new()
    })
}
