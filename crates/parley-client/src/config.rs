//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client can start against a local
//! backend with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{
    ACCESS_CACHE_TTL_SECS, DEFAULT_ATTACHMENT_BUCKET, DEFAULT_BACKEND_URL, SEARCH_PAGE_SIZE,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend (REST, RPC and object storage).
    /// Env: `BACKEND_URL`
    /// Default: `http://localhost:54321`
    pub backend_url: String,

    /// Public API key sent with every request.
    /// Env: `BACKEND_ANON_KEY`
    /// Default: none.
    pub anon_key: Option<String>,

    /// Object storage bucket for message attachments.
    /// Env: `ATTACHMENT_BUCKET`
    /// Default: `message-attachments`
    pub attachment_bucket: String,

    /// How long a channel access decision stays cached.
    /// Env: `ACCESS_CACHE_TTL_SECS`
    /// Default: 30 seconds.
    pub access_cache_ttl: Duration,

    /// SQLite file used for session storage. `None` keeps the session in
    /// memory only.
    /// Env: `SESSION_DB_PATH`
    pub session_db_path: Option<PathBuf>,

    /// Results per search page.
    /// Env: `SEARCH_PAGE_SIZE`
    /// Default: `20`
    pub search_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            anon_key: None,
            attachment_bucket: DEFAULT_ATTACHMENT_BUCKET.to_string(),
            access_cache_ttl: Duration::from_secs(ACCESS_CACHE_TTL_SECS),
            session_db_path: None,
            search_page_size: SEARCH_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("BACKEND_URL") {
            config.backend_url = url.trim_end_matches('/').to_string();
        }

        if let Some(key) = lookup("BACKEND_ANON_KEY") {
            if !key.is_empty() {
                config.anon_key = Some(key);
            }
        }

        if let Some(bucket) = lookup("ATTACHMENT_BUCKET") {
            config.attachment_bucket = bucket;
        }

        if let Some(val) = lookup("ACCESS_CACHE_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.access_cache_ttl = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid ACCESS_CACHE_TTL_SECS, using default");
                }
            }
        }

        if let Some(path) = lookup("SESSION_DB_PATH") {
            config.session_db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("SEARCH_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.search_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid SEARCH_PAGE_SIZE, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}
