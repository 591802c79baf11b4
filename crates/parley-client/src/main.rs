//! `parley-client`: load one channel from the backend and print it.
//!
//! Usage: `parley-client <channel-id>`
//!
//! Connection settings come from the environment (see [`ClientConfig`]).
//! Messages are printed as JSON lines, oldest first.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use parley_client::{init_tracing, ChatClient, ClientConfig, LocalFeed, RestDataService};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let Some(channel_id) = std::env::args().nth(1).and_then(|a| a.parse::<Uuid>().ok()) else {
        eprintln!("usage: parley-client <channel-id>");
        return ExitCode::FAILURE;
    };

    let config = ClientConfig::from_env();
    info!(backend = %config.backend_url, "Starting Parley client v{}", env!("CARGO_PKG_VERSION"));

    let backend = match RestDataService::new(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let client = match ChatClient::open(config, backend, Arc::new(LocalFeed::new()), "cli") {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to open session storage");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = client.refresh_channels().await {
        error!(error = %e, "Failed to load channels");
        return ExitCode::FAILURE;
    }

    let view = client.mount_channel(channel_id).await;
    if !view.access().can_read {
        error!(%channel_id, "Channel not readable");
        return ExitCode::FAILURE;
    }

    match view.load_messages().await {
        Ok(report) => {
            info!(total = report.total, rejected = report.rejected, "Loaded");
            for message in client.store().channel_messages_sorted(channel_id) {
                match serde_json::to_string(&message) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!(error = %e, "Failed to encode message"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to load messages");
            ExitCode::FAILURE
        }
    }
}
