// Snippet Votes Server - vote ledger over HTTP

use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snippet_votes::{api::create_app, app_state::AppState, config::Config};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snippet_votes=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;

    let app = create_app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server_address();
    info!("Snippet votes server starting on http://{}", addr);
    info!("  POST   /api/v1/targets/{{kind}}/{{id}}/vote   - Cast or toggle a vote");
    info!("  GET    /api/v1/targets/{{kind}}/{{id}}/vote   - Current vote");
    info!("  DELETE /api/v1/targets/{{kind}}/{{id}}/vote   - Remove vote");
    info!("  GET    /api/v1/targets/{{kind}}/{{id}}        - Target counters");
    info!("  GET    /api/v1/targets/{{kind}}/top          - Top targets");
    info!("  GET    /api/v1/users/{{id}}/reputation       - Reputation and badges");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
