//! MPD renderer bridge
//!
//! Serves the renderer services over HTTP while relaying audio into MPD.

use mpd_renderer_bridge::{api, bus, config, hooks::Hooks, mpd::PlayerClient, renderer::Renderer};
use mpd_renderer_bridge::services::{
    RadioService, ReceiverSession, ReceiverSettings, VolumeService,
};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpd_renderer_bridge=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting MPD renderer bridge v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("MRB_GIT_SHA")
    );

    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, mpd: {}:{}",
        config.port,
        config.mpd.host,
        config.mpd.port
    );

    let bus = bus::create_bus();

    let mut client = PlayerClient::new(
        config.mpd.clone(),
        Hooks::from_config(&config.hooks),
        bus.clone(),
    );
    // The poll loop keeps retrying, so a missing server is not fatal
    if let Err(e) = client.connect().await {
        tracing::warn!("MPD not reachable yet: {}", e);
    }
    let player = Arc::new(Mutex::new(client));

    let volume = Arc::new(VolumeService::new(player.clone()));
    let settings = ReceiverSettings::from_config(&config.receiver, &config::get_data_dir());
    let receiver = Arc::new(ReceiverSession::new(settings, player.clone(), bus.clone()));
    let radio = Arc::new(RadioService::new(&config.radio, player.clone()));
    let renderer = Arc::new(Renderer::new(
        player.clone(),
        volume,
        receiver.clone(),
        radio.clone(),
        bus.clone(),
    ));

    let shutdown = CancellationToken::new();
    let poller = {
        let renderer = renderer.clone();
        let shutdown = shutdown.clone();
        let period = Duration::from_millis(config.poll_interval_ms);
        tokio::spawn(async move { renderer.run(period, shutdown).await })
    };

    if config.stream.allowed_hosts.is_empty() {
        tracing::warn!("/stream will fetch from any http(s) host");
    }
    let state = api::AppState::new(renderer, bus)
        .with_allowed_stream_hosts(config.stream.allowed_hosts.clone());
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    shutdown.cancel();
    let _ = poller.await;
    if let Err(e) = receiver.stop().await {
        tracing::warn!("Receiver stop failed: {}", e);
    }
    if let Err(e) = radio.stop().await {
        tracing::warn!("Radio stop failed: {}", e);
    }
    player.lock().await.disconnect();
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
