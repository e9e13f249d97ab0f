use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use ember::config::ChatConfig;

use crate::configuration;
use crate::state::AppState;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(host: Option<String>, port: Option<u16>, runtime_url: Option<String>) -> Result<()> {
    crate::logging::setup_logging(Some("emberd"))?;

    tracing::info!("Starting ember server...");

    let mut settings = configuration::Settings::new()?;
    if let Some(host) = host {
        settings.host = host;
    }
    if let Some(port) = port {
        settings.port = port;
    }
    if let Some(runtime_url) = runtime_url {
        settings.runtime_url = runtime_url;
    }
    tracing::info!("Configuration loaded: {:?}", settings);

    let chat_config = ChatConfig::from_env()?;
    let state = AppState::new(&settings.runtime_url, chat_config)?;

    // Surface an unreachable runtime at startup rather than on the
    // first chat request. The server still comes up either way.
    if state.runtime.check_health().await {
        tracing::info!(runtime_url = %settings.runtime_url, "inference runtime reachable");
    } else {
        tracing::warn!(
            runtime_url = %settings.runtime_url,
            "inference runtime unreachable - chat requests will fail until it comes up"
        );
    }

    let sessions = state.sessions.clone();
    drop(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let expired = sessions.expire(Utc::now()).await;
            if expired > 0 {
                tracing::debug!(expired, "dropped idle sessions");
            }
        }
    }));

    let mut app = crate::routes::configure(state);
    if settings.cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(settings.socket_addr()).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
