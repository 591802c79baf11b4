//! The signed-in user's persisted notifications.
//!
//! The newest page is cached locally; every change goes to the backend first
//! and the cache follows once the backend confirms.  Failures are surfaced
//! as notices and leave the cache as it was.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use parley_shared::constants::NOTIFICATION_PAGE_SIZE;
use parley_store::Notification;

use crate::backend::DataService;
use crate::error::Result;
use crate::state::ClientContext;

pub struct Notifications<B> {
    ctx: ClientContext<B>,
    cache: Mutex<Vec<Notification>>,
}

impl<B: DataService> Notifications<B> {
    pub(crate) fn new(ctx: ClientContext<B>) -> Self {
        Self {
            ctx,
            cache: Mutex::new(Vec::new()),
        }
    }

    /// Fetch the newest notifications, replacing the cached page.
    pub async fn load(&self) -> Result<Vec<Notification>> {
        let user = self.ctx.require_user("see notifications")?;
        let page = self
            .ctx
            .backend
            .fetch_notifications(user.id, NOTIFICATION_PAGE_SIZE)
            .await
            .map_err(|e| self.ctx.notify_failure("Failed to load notifications", e))?;
        debug!(count = page.len(), "Notifications loaded");
        *self.lock() = page.clone();
        Ok(page)
    }

    pub async fn mark_as_read(&self, id: Uuid) -> Result<()> {
        let user = self.ctx.require_user("update notifications")?;
        let confirmed = self
            .ctx
            .backend
            .mark_notification_read(id, user.id)
            .await
            .map_err(|e| self.ctx.notify_failure("Failed to mark notification as read", e))?
            .ok_or_else(|| self.ctx.reject("Notification not found"))?;

        if let Some(cached) = self.lock().iter_mut().find(|n| n.id == id) {
            *cached = confirmed;
        }
        Ok(())
    }

    /// Returns how many notifications the backend changed.
    pub async fn mark_all_as_read(&self) -> Result<u64> {
        let user = self.ctx.require_user("update notifications")?;
        let changed = self
            .ctx
            .backend
            .mark_all_notifications_read(user.id)
            .await
            .map_err(|e| self.ctx.notify_failure("Failed to mark notifications as read", e))?;
        for n in self.lock().iter_mut() {
            n.is_read = true;
        }
        debug!(changed, "All notifications marked read");
        Ok(changed)
    }

    /// Delete one notification.
    pub async fn clear_notification(&self, id: Uuid) -> Result<()> {
        let user = self.ctx.require_user("update notifications")?;
        let deleted = self
            .ctx
            .backend
            .delete_notification(id, user.id)
            .await
            .map_err(|e| self.ctx.notify_failure("Failed to clear notification", e))?;
        if deleted == 0 {
            return Err(self.ctx.reject("Notification not found"));
        }
        self.lock().retain(|n| n.id != id);
        Ok(())
    }

    /// Unread total as counted by the backend, beyond the cached page.
    pub async fn unread_count(&self) -> Result<u64> {
        let user = self.ctx.require_user("see notifications")?;
        self.ctx
            .backend
            .count_unread_notifications(user.id)
            .await
            .map_err(|e| self.ctx.notify_failure("Failed to count notifications", e))
    }

    /// Cached page, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::access::AccessGate;
    use crate::auth::{AuthState, CurrentUser};
    use crate::error::ClientError;
    use crate::mock::{notification, user, MockBackend};
    use crate::notices::Notifier;
    use parley_store::MessageStore;

    fn notifications(backend: Arc<MockBackend>, me: Option<CurrentUser>) -> Notifications<MockBackend> {
        let auth = AuthState::new();
        auth.set_user(me);
        Notifications::new(ClientContext {
            backend,
            store: Arc::new(MessageStore::new()),
            gate: Arc::new(AccessGate::new(Duration::from_secs(30))),
            auth,
            notices: Notifier::new(),
        })
    }

    #[tokio::test]
    async fn test_load_newest_page_for_user() {
        let backend = Arc::new(MockBackend::new());
        let me = user();
        backend.with_state(|s| {
            s.notifications = (0..60)
                .map(|i| notification(me.id, &format!("n{i}"), i))
                .collect();
            s.notifications.push(notification(Uuid::new_v4(), "someone else", 0));
        });
        let notifications = notifications(Arc::clone(&backend), Some(me.clone()));

        let page = notifications.load().await.unwrap();
        assert_eq!(page.len(), NOTIFICATION_PAGE_SIZE as usize);
        assert_eq!(page[0].title, "n0");
        assert!(page.iter().all(|n| n.user_id == me.id));
        assert_eq!(notifications.notifications(), page);
    }

    #[tokio::test]
    async fn test_mark_read_and_unread_count() {
        let backend = Arc::new(MockBackend::new());
        let me = user();
        let first = notification(me.id, "first", 1);
        let second = notification(me.id, "second", 2);
        let first_id = first.id;
        backend.with_state(|s| s.notifications = vec![first, second]);
        let notifications = notifications(Arc::clone(&backend), Some(me));
        notifications.load().await.unwrap();

        assert_eq!(notifications.unread_count().await.unwrap(), 2);
        notifications.mark_as_read(first_id).await.unwrap();
        assert_eq!(notifications.unread_count().await.unwrap(), 1);
        let cached = notifications.notifications();
        assert!(cached.iter().find(|n| n.id == first_id).unwrap().is_read);

        assert_eq!(notifications.mark_all_as_read().await.unwrap(), 1);
        assert_eq!(notifications.unread_count().await.unwrap(), 0);
        assert!(notifications.notifications().iter().all(|n| n.is_read));
    }

    #[tokio::test]
    async fn test_someone_elses_notification_is_refused() {
        let backend = Arc::new(MockBackend::new());
        let theirs = notification(Uuid::new_v4(), "not yours", 0);
        let id = theirs.id;
        backend.with_state(|s| s.notifications = vec![theirs]);
        let notifications = notifications(Arc::clone(&backend), Some(user()));

        let err = notifications.mark_as_read(id).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        let err = notifications.clear_notification(id).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        backend.with_state(|s| assert!(!s.notifications[0].is_read));
    }

    #[tokio::test]
    async fn test_clear_notification() {
        let backend = Arc::new(MockBackend::new());
        let me = user();
        let n = notification(me.id, "bye", 0);
        let id = n.id;
        backend.with_state(|s| s.notifications = vec![n]);
        let notifications = notifications(Arc::clone(&backend), Some(me));
        notifications.load().await.unwrap();

        notifications.clear_notification(id).await.unwrap();
        assert!(notifications.notifications().is_empty());
        backend.with_state(|s| assert!(s.notifications.is_empty()));
    }

    #[tokio::test]
    async fn test_failure_keeps_cache_and_store_error() {
        let backend = Arc::new(MockBackend::new());
        let me = user();
        let n = notification(me.id, "stays", 0);
        backend.with_state(|s| s.notifications = vec![n]);
        let notifications = notifications(Arc::clone(&backend), Some(me));
        notifications.load().await.unwrap();

        backend.fail("mark_all_notifications_read");
        let err = notifications.mark_all_as_read().await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(_)));
        assert!(!notifications.notifications()[0].is_read);
        assert!(notifications.ctx.store.error().is_none());
    }

    #[tokio::test]
    async fn test_requires_sign_in() {
        let backend = Arc::new(MockBackend::new());
        let notifications = notifications(Arc::clone(&backend), None);
        assert!(matches!(notifications.load().await, Err(ClientError::Unauthorized(_))));
        assert!(matches!(notifications.unread_count().await, Err(ClientError::Unauthorized(_))));
        assert_eq!(backend.calls("fetch_notifications"), 0);
    }
}
