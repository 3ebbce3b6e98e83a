mod config;
mod routes;
mod services;
mod state;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();

    // Missing client config is non-fatal at startup: every page shows the error instead.
    match &config.client {
        Ok(client) => tracing::info!(
            deployment_url = %config.deployment_url,
            origins = client.javascript_origins.len(),
            verify_state = config.verify_state,
            "google sign-in configured"
        ),
        Err(e) => tracing::warn!(error = %e, "google client not configured, sign-in disabled"),
    }

    let provider = services::google::GoogleProvider::new(config.userinfo_uri.clone(), config.timeouts)
        .expect("http client build failed");
    let port = config.port;
    let state = state::AppState::new(config, Arc::new(provider));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chatbot-login listening");
    axum::serve(listener, app).await.expect("server failed");
}
