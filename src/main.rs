mod models;
mod routes;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::env;
use std::sync::Arc;

use services::{storage_from_env, GeminiClient, NutritionAnalyzer, TextGenerator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("Starting fitness tracker server...");

    // Storage backend is selected once here: Postgres when DATABASE_URL
    // is set, in-memory otherwise.
    let storage = storage_from_env().await?;

    let gemini = GeminiClient::from_env();
    if !gemini.has_credential() {
        log::warn!("GEMINI_API_KEY not set; meal analysis requests will fail until it is configured");
    }
    log::info!("Gemini client initialized with model: {}", gemini.model());

    let provider: Arc<dyn TextGenerator> = Arc::new(gemini);
    let analyzer = Arc::new(NutritionAnalyzer::new(provider));

    let app = routes::create_router(storage, analyzer);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}
