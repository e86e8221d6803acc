pub mod api; // HTTP routes, live channel, event stream
pub mod chat; // Send, history, contacts
pub mod config;
pub mod contacts;
pub mod core_state; // Shared state: store, identity, registry
pub mod db;
pub mod identity;
pub mod models;
pub mod registry; // Open channels per identity

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Core(#[from] core_state::CoreError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
}

/// Process entry: read config, start the server, run until Ctrl+C / SIGTERM.
pub async fn run() -> Result<(), RunError> {
    let config = config::ServerConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let core = Arc::new(core_state::CoreState::init(config)?);
    let mut server = api::start_chat_api_server(core.clone()).await?;
    tracing::info!(addr = %server.addr, "Listening");

    api::shutdown_signal().await;

    server.shutdown();
    // Open channels hold their connections; closing them lets shutdown finish.
    core.reset();
    server.wait().await;

    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
