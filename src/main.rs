//! Vehicle-soccer bot agent
//!
//! The game engine dials this process once per match and streams one
//! snapshot per simulation tick. Every snapshot is routed to the bot for
//! its player index and answered with a control output before the next
//! tick is due.

mod app;
mod bot;
mod config;
mod dispatch;
mod util;
mod wire;

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::bot::ConstantPolicy;
use crate::config::Config;
use crate::dispatch::FrameDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting vehicle-soccer bot agent");
    info!("Bot port: {}", config.bot_port);
    info!("Tick budget: {:?}", config.tick_budget);

    let state = AppState::new(config.clone(), ConstantPolicy::factory());

    // Binding must succeed before any frame is accepted; everything else
    // is recoverable at runtime.
    let addr = SocketAddr::from(([0, 0, 0, 0], config.bot_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bot port {addr}"))?;

    FrameDispatcher::new(state)
        .run(listener, shutdown_signal())
        .await;

    info!("Agent shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
