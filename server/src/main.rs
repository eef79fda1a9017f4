use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use storefront_server::backend;
use storefront_server::config::Config;
use storefront_server::routes::create_routes;
use storefront_server::services::payment::PaymentSimulator;
use storefront_server::services::purchase::PurchasePolicy;
use storefront_server::state::AppState;

const DEFAULT_LOG_FILTER: &str = "storefront_server=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(backend = ?config.backend, production = config.production, "Configuration loaded");

    let connected = backend::connect(&config).await?;
    let payments = Arc::new(PaymentSimulator::from_config(&config.payment));
    let policy = PurchasePolicy {
        surface_inventory_errors: config.surface_inventory_errors,
        ..PurchasePolicy::default()
    };

    let state = AppState::new(connected.backend, payments, policy);
    state.start().await;

    let app = create_routes(state.clone(), &config);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Server running at http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    for task in connected.tasks {
        task.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
