//! subscription-cloud binary: configuration, tracing, HTTP server

use std::time::Duration;

use subscription_cloud::api;
use subscription_cloud::config::Config;
use subscription_cloud::state::AppState;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subscription_cloud=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting subscription-cloud (env: {})", config.environment);

    let state = AppState::new(&config).await?;

    // Periodic tenant lock cleanup (every 5 minutes)
    let locks = state.engine.locks().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            locks.cleanup();
        }
    });

    let app = api::create_router(state);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("subscription-cloud HTTP listening on {http_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
