//! Peer client binary.
//!
//! Usage:
//!   chat-client -c <name> <server-ip> <server-port> <client-port>

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use chat_client::client::{ChatClient, ExitReason};
use chat_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> Result<ClientConfig, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    ClientConfig::parse(&args)
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

    let server_addr = SocketAddr::new(cfg.server_ip.into(), cfg.server_port);
    let client = ChatClient::bind(cfg.name.clone(), cfg.client_port, server_addr)
        .await
        .context("bind client")?;
    info!(name = %cfg.name, %server_addr, "client starting");

    let register_outcome = client.register().await?;
    if register_outcome != ExitReason::Clean {
        std::process::exit(exit_code(register_outcome));
    }

    // Silent leave (§4.6): ^C sets the shutdown flag and closes the
    // socket without sending anything; the server discovers the
    // departure only when a delivery to this client next times out.
    let shutdown = client.shutdown_handle();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.trigger();
    });

    let (tx, rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let reason = client.run(rx).await?;
    ctrl_c.abort();
    std::process::exit(exit_code(reason));
}

fn exit_code(reason: ExitReason) -> i32 {
    match reason {
        ExitReason::Clean => 0,
        ExitReason::ServerUnresponsive | ExitReason::DuplicateName => 1,
    }
}
