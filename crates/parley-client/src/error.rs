use parley_shared::{AttachmentError, ValidationError};
use parley_store::StoreError;
use thiserror::Error;

/// Postgres `check_violation`; the backend raises it when a guarded
/// status transition loses a race.
const CHECK_VIOLATION: &str = "23514";

/// Failures talking to the backend service.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend returned no rows where one was expected")]
    EmptyResponse,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Whether the backend rejected a write through a check constraint.
    pub fn is_check_violation(&self) -> bool {
        matches!(self, Self::Status { body, .. } if body.contains(CHECK_VIOLATION))
    }
}

/// Errors surfaced by the client's public operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A remote record failed the schema check.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// The user may not perform this action (no write access, not signed
    /// in, or not the author).
    #[error("Not allowed: {0}")]
    Unauthorized(String),

    /// An optimistic-lock predicate failed: someone else got there first.
    #[error("Already processed: {0}")]
    Concurrency(String),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid attachment: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
