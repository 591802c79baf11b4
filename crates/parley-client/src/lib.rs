//! # parley-client
//!
//! Message sync for the Parley chat client: keeps the local
//! [`MessageStore`](parley_store::MessageStore) in step with the backend
//! through bulk loads, realtime change events and the user's own writes,
//! gated by per-channel access decisions.

pub mod access;
pub mod access_requests;
pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod notices;
pub mod notifications;
pub mod operations;
pub mod reactions;
pub mod realtime;
pub mod rest;
pub mod state;
pub mod subscription;

#[cfg(test)]
mod mock;

use tracing_subscriber::{fmt, EnvFilter};

pub use access::{AccessGate, ChannelAccess, ChannelSnapshot};
pub use auth::{AuthState, CurrentUser};
pub use config::ClientConfig;
pub use error::{ClientError, RemoteError, Result};
pub use notifications::Notifications;
pub use operations::{Attachment, LoadReport, MessageOperations};
pub use realtime::{ChangeEvent, LocalFeed, RealtimeFeed};
pub use rest::RestDataService;
pub use state::ChatClient;
pub use subscription::SubscriptionState;

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.  Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_store=info,warn"));

    if fmt().with_env_filter(filter).with_target(true).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
