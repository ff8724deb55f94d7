mod api;
mod auth;
mod config;
mod prices;
mod websocket;
mod widgets;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use log::{error, info};
use tower_http::cors::CorsLayer;

use crate::api::{create_api_router, ApiState};
use crate::auth::{JwtManager, UserStore};
use crate::config::{Config, SEED_PRICES, STATS_INTERVAL_SECS};
use crate::prices::{Broadcaster, PriceStore, PriceUpdater};
use crate::websocket::{run_websocket_server, WS_PATH};
use crate::widgets::{TemplateCatalog, WidgetStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    let shutdown = CancellationToken::new();

    // Price feed core
    let store = PriceStore::from_seed(SEED_PRICES);
    if store.is_empty() {
        error!("No valid seed prices, nothing to broadcast");
        return Err("empty price seed".into());
    }
    info!("📊 Tracking {} symbols: {:?}", store.len(), store.symbols());
    let broadcaster = Broadcaster::new(store, config.outbox_capacity);

    let updater = PriceUpdater::new(broadcaster.clone(), config.tick_period(), config.max_change)
        .spawn(shutdown.clone());
    let stats_task = start_stats_task(broadcaster.clone(), shutdown.clone());

    // HTTP API
    let api_state = ApiState {
        broadcaster: broadcaster.clone(),
        users: UserStore::with_demo_users(),
        widgets: WidgetStore::with_demo_widgets(),
        templates: Arc::new(TemplateCatalog::builtin()),
        jwt: Arc::new(JwtManager::new(&config.jwt_secret)),
    };
    let api_router = create_api_router(api_state, &config.static_dir)
        .layer(CorsLayer::permissive()); // Enable CORS for web clients

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("🌐 HTTP API server running at http://{}", config.api_bind_address);

    let api_shutdown = shutdown.clone();
    let api_server = async move {
        let graceful = api_shutdown.clone();
        let result = axum::serve(api_listener, api_router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        // An API failure takes the whole service down
        api_shutdown.cancel();
        result
    };

    // WebSocket price feed
    let ws_listener = TcpListener::bind(&config.ws_bind_address).await?;
    info!("🚀 Price feed running at ws://{}{}", config.ws_bind_address, WS_PATH);
    let websocket_server = run_websocket_server(ws_listener, broadcaster.clone(), shutdown.clone());

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_shutdown.cancel();
    });

    info!("🎯 Starting WebSocket and HTTP API servers...");
    let (api_result, ()) = tokio::join!(api_server, websocket_server);
    if let Err(e) = api_result {
        error!("API server stopped with error: {}", e);
    }

    if let Err(e) = updater.await {
        error!("Price updater task failed: {}", e);
    }
    stats_task.abort();

    info!("👋 Shutdown complete");
    Ok(())
}

fn start_stats_task(broadcaster: Broadcaster, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    info!("📈 Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);

    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval_timer.tick() => {
                    let stats = broadcaster.stats();
                    if stats.connections > 0 {
                        info!(
                            "Stats - Symbols: {}, Connections: {}, Subscriptions: {}",
                            stats.symbols, stats.connections, stats.subscriptions
                        );
                    }
                }
            }
        }
    })
}
