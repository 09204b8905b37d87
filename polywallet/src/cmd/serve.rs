//! `polywallet serve`: start the wallet HTTP server.
//!
//! Loads configuration and documents, wires the registry, provider pool,
//! stores and transaction engine, then serves the API until SIGTERM/SIGINT.
//! On shutdown, transfers still awaiting confirmation resolve to
//! `confirmation_unknown` before the process exits.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::Method;
use dotenvy::dotenv;
use tower_http::cors;
use tracing::{error, info};

use crate::balance::BalanceAggregator;
use crate::chain::{ChainRegistry, EvmConnector, ProviderPool};
use crate::config::load_config;
use crate::conversation::Conversations;
use crate::error::Error;
use crate::routes;
use crate::service::WalletService;
use crate::signal::Shutdown;
use crate::store::{DocumentStore, JsonFileStore};
#[cfg(feature = "telemetry")]
use crate::telemetry::Telemetry;
use crate::tokens::TokenRegistry;
use crate::transfer::TransactionEngine;
use crate::wallet::WalletStore;

/// Execute the `serve` command.
///
/// # Errors
///
/// Returns an error if configuration or document loading, signal
/// registration or server binding fails.
#[allow(clippy::cognitive_complexity, clippy::future_not_send)]
pub async fn run(config_path: &Path) -> Result<(), Error> {
    dotenv().ok();

    #[cfg(feature = "telemetry")]
    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();
    #[cfg(not(feature = "telemetry"))]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        info!("rustls crypto provider already installed");
    }

    let config = load_config(config_path)?;
    info!(
        chains = config.chains().len(),
        home_chain = config.home_chain(),
        data_dir = %config.data_dir().display(),
        "configuration loaded"
    );

    let registry = Arc::new(ChainRegistry::new(config.chains()));
    let pool = Arc::new(ProviderPool::new(
        Arc::clone(&registry),
        Arc::new(EvmConnector::new(config.receipt_poll_interval())),
    ));
    let store: Arc<dyn DocumentStore> =
        Arc::new(JsonFileStore::open(config.data_dir().to_path_buf()).await?);
    let wallets = Arc::new(
        WalletStore::load(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.home_chain(),
        )
        .await?,
    );
    let tokens = Arc::new(TokenRegistry::load(Arc::clone(&pool), store).await?);
    let balances = BalanceAggregator::new(
        Arc::clone(&registry),
        Arc::clone(&pool),
        Arc::clone(&wallets),
        Arc::clone(&tokens),
    );

    let shutdown = Shutdown::listen()
        .map_err(|e| Error::server_with("failed to register signal handlers", e))?;
    let engine = TransactionEngine::new(
        Arc::clone(&registry),
        pool,
        Arc::clone(&wallets),
        config.confirmation_timeout(),
        shutdown.token(),
    );
    let service = Arc::new(WalletService::new(
        registry,
        wallets,
        tokens,
        balances,
        engine,
        Conversations::new(config.prompt_timeout()),
    ));

    let http_endpoints = routes::routes().with_state(Arc::clone(&service));
    #[cfg(feature = "telemetry")]
    let http_endpoints = http_endpoints.layer(telemetry.http_tracing());
    let http_endpoints = http_endpoints.layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host(), config.port());
    info!("Starting server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| error!("Failed to bind to {addr}: {e}"))
        .map_err(|e| Error::server_with(format!("failed to bind {addr}"), e))?;

    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
        .map_err(|e| Error::server_with("server error", e))?;

    info!("waiting for outstanding transfers");
    service.drain().await;
    info!("shutdown complete");
    Ok(())
}
