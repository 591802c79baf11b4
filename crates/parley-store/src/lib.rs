//! # parley-store
//!
//! Local state for the Parley chat client.
//!
//! The crate holds the domain models mirrored from the backend, the
//! validation layer every remote record passes through, and the
//! [`MessageStore`]: a normalized message table with per-channel and
//! per-thread indexes that the UI renders from.  The store mirrors itself to
//! a session-scoped key-value store so a restart within the same session
//! comes back without a network round trip.

pub mod database;
pub mod message_store;
pub mod migrations;
pub mod models;
pub mod session;
pub mod validation;

mod error;

pub use database::SqliteSessionStorage;
pub use error::StoreError;
pub use message_store::{EditTransaction, MessageSnapshot, MessageStore};
pub use models::*;
pub use session::{MemorySessionStorage, SessionStorage};
pub use validation::validate_message;
