use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use accounting_agent::config::Config;
use accounting_agent::{build_state, handlers};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid ASSISTANT_HTTP_BIND '{}' (expected host:port)", config.server.bind))?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("accounting-agent/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let state = build_state(&config, http);
    let router = handlers::router(state, &config.server);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        chat = %config.server.chat_path,
        voice = %config.server.voice_path,
        model = %config.gateway.model,
        "Starting accounting assistant server"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
