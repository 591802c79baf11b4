//! Client state shared by every operation.
//!
//! [`ChatClient`] is the composition root: it owns the message store, the
//! access gate, the subscription manager and the backend handles, and hands
//! out per-view operation façades.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_shared::constants::UNREAD_WINDOW_HOURS;
use parley_store::{MemorySessionStorage, MessageStore, SessionStorage, SqliteSessionStorage};

use crate::access::{AccessGate, ChannelSnapshot};
use crate::access_requests::AccessRequests;
use crate::auth::{AuthState, CurrentUser};
use crate::backend::{DataService, SearchPage};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::notices::Notifier;
use crate::operations::{Liveness, MessageOperations};
use crate::notifications::Notifications;
use crate::reactions::Reactions;
use crate::realtime::RealtimeFeed;
use crate::subscription::{SubscriptionManager, SubscriptionState};

/// Handles every operation needs.  Cloning shares them.
pub struct ClientContext<B> {
    pub(crate) backend: Arc<B>,
    pub(crate) store: Arc<MessageStore>,
    pub(crate) gate: Arc<AccessGate>,
    pub(crate) auth: AuthState,
    pub(crate) notices: Notifier,
}

impl<B> Clone for ClientContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            gate: Arc::clone(&self.gate),
            auth: self.auth.clone(),
            notices: self.notices.clone(),
        }
    }
}

impl<B> ClientContext<B> {
    /// The signed-in user, or an authorization error shown to the user.
    pub(crate) fn require_user(&self, action: &str) -> Result<CurrentUser> {
        self.auth
            .current()
            .ok_or_else(|| self.reject(format!("Sign in to {action}")))
    }

    /// Refuse an action without touching any state.
    pub(crate) fn reject(&self, reason: impl Into<String>) -> ClientError {
        let reason = reason.into();
        warn!(%reason, "Operation rejected");
        self.notices.error(reason.clone());
        ClientError::Unauthorized(reason)
    }

    /// A refused write that lost an optimistic-lock race.
    pub(crate) fn conflict(&self, reason: impl Into<String>) -> ClientError {
        let reason = reason.into();
        warn!(%reason, "Concurrent modification");
        self.notices.error(reason.clone());
        ClientError::Concurrency(reason)
    }

    /// Log and surface a failed remote call, recording it as the store's
    /// error.
    pub(crate) fn remote_failure(&self, context: &str, err: impl Into<ClientError>) -> ClientError {
        let err = self.notify_failure(context, err);
        self.store.set_error(Some(format!("{context}: {err}")));
        err
    }

    /// Log and notify only; the store is left untouched.
    pub(crate) fn notify_failure(&self, context: &str, err: impl Into<ClientError>) -> ClientError {
        let err = err.into();
        error!(error = %err, "{context}");
        self.notices.error(context);
        err
    }
}

pub struct ChatClient<B, F> {
    config: ClientConfig,
    ctx: ClientContext<B>,
    subscriptions: tokio::sync::Mutex<SubscriptionManager<F>>,
    view: Mutex<Option<Liveness>>,
    reactions: Reactions<B>,
    notifications: Notifications<B>,
}

impl<B: DataService, F: RealtimeFeed> ChatClient<B, F> {
    pub fn new(config: ClientConfig, backend: Arc<B>, feed: Arc<F>, store: MessageStore) -> Self {
        let store = Arc::new(store);
        let gate = Arc::new(AccessGate::new(config.access_cache_ttl));
        let ctx = ClientContext {
            backend,
            store: Arc::clone(&store),
            gate: Arc::clone(&gate),
            auth: AuthState::new(),
            notices: Notifier::new(),
        };
        Self {
            subscriptions: tokio::sync::Mutex::new(SubscriptionManager::new(feed, store, gate)),
            reactions: Reactions::new(ctx.clone()),
            notifications: Notifications::new(ctx.clone()),
            view: Mutex::new(None),
            ctx,
            config,
        }
    }

    /// Build a client whose message store is mirrored to session storage:
    /// the SQLite file named by the configuration, or memory when unset.
    pub fn open(config: ClientConfig, backend: Arc<B>, feed: Arc<F>, session: &str) -> Result<Self> {
        let storage: Box<dyn SessionStorage> = match &config.session_db_path {
            Some(path) => Box::new(SqliteSessionStorage::open_at(path, session)?),
            None => Box::new(MemorySessionStorage::new()),
        };
        let store = MessageStore::with_storage(storage);
        info!(session, restored = store.len(), "Client opened");
        Ok(Self::new(config, backend, feed, store))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.ctx.store
    }

    pub fn gate(&self) -> &Arc<AccessGate> {
        &self.ctx.gate
    }

    pub fn auth(&self) -> &AuthState {
        &self.ctx.auth
    }

    pub fn notices(&self) -> &Notifier {
        &self.ctx.notices
    }

    pub fn reactions(&self) -> &Reactions<B> {
        &self.reactions
    }

    pub fn notifications(&self) -> &Notifications<B> {
        &self.notifications
    }

    pub fn access_requests(&self) -> AccessRequests<B> {
        AccessRequests::new(self.ctx.clone())
    }

    /// Sign in and load the channel list for the new user.
    pub async fn sign_in(&self, user: CurrentUser) -> Result<usize> {
        self.ctx.auth.set_user(Some(user));
        self.refresh_channels().await
    }

    /// Drop everything tied to the session.
    pub async fn sign_out(&self) {
        self.unmount().await;
        self.ctx.store.clear_messages();
        self.ctx.gate.clear();
        self.reactions.clear();
        self.notifications.clear();
        self.ctx.auth.set_user(None);
    }

    /// Refetch channels and memberships and hand them to the access gate.
    pub async fn refresh_channels(&self) -> Result<usize> {
        let channels = self
            .ctx
            .backend
            .fetch_channels()
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to load channels", e))?;

        let memberships = match self.ctx.auth.user_id() {
            Some(user_id) => self
                .ctx
                .backend
                .fetch_memberships(user_id)
                .await
                .map_err(|e| self.ctx.remote_failure("Failed to load channels", e))?,
            None => Vec::new(),
        };

        let snapshots = ChannelSnapshot::join(channels, &memberships);
        let count = snapshots.len();
        self.ctx.gate.set_channels(snapshots);
        Ok(count)
    }

    /// Put `channel_id` in view.
    ///
    /// Any previously mounted view is marked stale, the realtime
    /// subscription moves to the new channel, and the returned façade acts
    /// on it.  A feed failure is reported but does not prevent mounting.
    pub async fn mount_channel(&self, channel_id: Uuid) -> MessageOperations<B> {
        let liveness = Liveness::new();
        if let Some(previous) = self.lock_view().replace(liveness.clone()) {
            previous.revoke();
        }

        let mut subscriptions = self.subscriptions.lock().await;
        if let Err(e) = subscriptions.switch_to(channel_id).await {
            warn!(%channel_id, error = %e, "Live updates unavailable");
            self.ctx.notices.error("Live updates are unavailable for this channel");
        }

        MessageOperations::new(self.ctx.clone(), channel_id, liveness)
    }

    /// Take the current view down and release its subscription.
    pub async fn unmount(&self) {
        if let Some(previous) = self.lock_view().take() {
            previous.revoke();
        }
        self.subscriptions.lock().await.teardown().await;
    }

    pub async fn subscription_state(&self) -> (Option<Uuid>, SubscriptionState) {
        let subscriptions = self.subscriptions.lock().await;
        (subscriptions.channel_id(), subscriptions.state())
    }

    /// One page of full-text search results.  Pages start at 0.
    pub async fn search_messages(
        &self,
        query: &str,
        channel_id: Option<Uuid>,
        page: u32,
    ) -> Result<SearchPage> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchPage { hits: Vec::new(), has_more: false });
        }
        let limit = self.config.search_page_size;
        let hits = self
            .ctx
            .backend
            .search_messages(query, channel_id, limit, page.saturating_mul(limit))
            .await
            .map_err(|e| self.ctx.remote_failure("Search failed", e))?;
        let has_more = hits.len() == limit as usize;
        Ok(SearchPage { hits, has_more })
    }

    /// Unread messages per channel over the recent window.
    pub async fn unread_counts(&self) -> Result<HashMap<Uuid, u64>> {
        let user = self.ctx.require_user("see unread messages")?;
        let since = Utc::now() - Duration::hours(UNREAD_WINDOW_HOURS);
        let counts = self
            .ctx
            .backend
            .unread_counts(user.id, since)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to load unread counts", e))?;
        Ok(counts
            .into_iter()
            .map(|c| (c.channel_id, c.unread_count))
            .collect())
    }

    pub async fn mark_channel_as_read(&self, channel_id: Uuid) -> Result<()> {
        let user = self.ctx.require_user("mark channels as read")?;
        self.ctx
            .backend
            .mark_channel_as_read(channel_id, user.id)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to mark channel as read", e))
    }

    fn lock_view(&self) -> std::sync::MutexGuard<'_, Option<Liveness>> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }
}
