mod collab;

use std::path::Path;
use std::sync::Arc;

use courier_bridge::TelegramBridge;
use courier_core::auth::AuthProvider;
use courier_core::bridge::Bridge;
use courier_core::config::Config;
use courier_engine::client::{Client, ClientDeps};
use courier_engine::supervisor::BridgeFactory;
use courier_store::{DbAuthProvider, FileAuthProvider, SessionStore};
use courier_wire::WsConnector;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting courier");

    let config_path =
        std::env::var("COURIER_CONFIG").unwrap_or_else(|_| "courier.json".to_string());
    let config = Config::load(Path::new(&config_path)).expect("Failed to load config");

    let auth = build_auth_provider(&config);
    let store = Arc::new(SessionStore::new());
    let connector = Arc::new(WsConnector::new(
        config.wire.endpoint.clone(),
        config.wire.version_url.clone(),
    ));

    let bridge_factory: Option<BridgeFactory> = if config.telegram.enabled {
        let telegram = config.telegram.clone();
        let bridge_store = Arc::clone(&store);
        tracing::info!(users = telegram.user_ids.len(), "telegram bridge enabled");
        Some(Box::new(move || {
            Arc::new(TelegramBridge::new(&telegram, Arc::clone(&bridge_store))) as Arc<dyn Bridge>
        }))
    } else {
        None
    };

    let client = Client::new(ClientDeps {
        connector,
        auth,
        store,
        handler: Arc::new(collab::LogHandler),
        modules: Arc::new(collab::NoModules),
        bridge_factory,
    });

    client.initialize().await.expect("Failed to start client");
    tracing::info!("courier ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    client.shutdown().await;
    tracing::info!("Stopped");
}

/// The provider is selected once at startup; there is no runtime switch.
fn build_auth_provider(config: &Config) -> Arc<dyn AuthProvider> {
    if config.auth.use_db_auth {
        let provider =
            DbAuthProvider::open(&config.auth.db_path).expect("Failed to open auth database");
        if config.auth.clear_auth_on_start {
            provider.clear().expect("Failed to clear auth database");
            tracing::warn!("auth database cleared on start");
        }
        Arc::new(provider)
    } else {
        let provider = FileAuthProvider::new(&config.auth.dir);
        if config.auth.clear_auth_on_start {
            provider.clear().expect("Failed to clear auth directory");
            tracing::warn!("auth directory cleared on start");
        }
        Arc::new(provider)
    }
}
