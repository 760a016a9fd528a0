mod config;
mod llm;
mod reply;
mod routes;
mod store;

use config::ServerConfig;
use llm::{CompletionProvider, LlmService};
use routes::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gab_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| {
        error!("{}", e);
        e
    })?;

    let llm = LlmService::new(
        config.api_key.clone(),
        config.model.clone(),
        config.api_base.clone(),
    );
    info!("Using OpenAI model: {}", llm.model());
    if config.default_system_prompt.is_some() {
        info!("Default system prompt configured");
    }

    let state = Arc::new(AppState::new(Arc::new(llm), config.default_system_prompt.clone()));
    let app = routes::router(state);

    info!("Server listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
