//! The signed-in user, as seen by every operation that needs an author.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Shared handle on the authentication state.
///
/// Cloning is cheap; all clones observe the same user.
#[derive(Clone)]
pub struct AuthState {
    tx: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_user(&self, user: Option<CurrentUser>) {
        match &user {
            Some(u) => tracing::info!(user_id = %u.id, "Signed in"),
            None => tracing::info!("Signed out"),
        }
        self.tx.send_replace(user);
    }

    pub fn current(&self) -> Option<CurrentUser> {
        self.tx.borrow().clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.tx.borrow().as_ref().map(|u| u.id)
    }

    /// Watch sign-in and sign-out.
    pub fn subscribe(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}
