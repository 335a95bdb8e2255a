//! Directory server binary.
//!
//! Usage:
//!   chat-server -s <port>

use std::env;

use anyhow::Context;
use chat_server::server::ChatServer;
use chat_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> Result<ServerConfig, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    ServerConfig::parse(&args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(diagnostic) => {
            eprintln!("{diagnostic}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = ChatServer::bind(cfg.port).await.context("bind server")?;
    let local = server.local_addr()?;
    info!(%local, "directory server listening");

    let shutdown = server.shutdown_handle();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.trigger();
    });

    server.run().await?;
    ctrl_c.abort();
    Ok(())
}
