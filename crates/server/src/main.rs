use server::config;
use server::routes;

use axum::{routing::{get, post}, Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env();
    match &config.engine.stockfish_path {
        Some(path) => tracing::info!("Using Stockfish at {}", path.display()),
        None => tracing::info!(
            "STOCKFISH_PATH not set; the engine is located or downloaded into {} on first use",
            config.engine.stockfish_dir.display()
        ),
    }

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        // Stateless API
        .route("/api/pgn/parse", post(routes::pgn::parse))
        .route("/api/annotate", post(routes::annotate::annotate))
        // Viewer session
        .route("/ws/session", get(routes::session_ws::ws_handler))
        // Shared state
        .layer(Extension(config.clone()))
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
