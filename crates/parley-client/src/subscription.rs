//! Realtime subscription for the channel in view.
//!
//! One subscription at a time: switching channels tears the previous one
//! down before the next is opened, and a channel the user cannot read is
//! never subscribed to.  Events are validated before they reach the store;
//! a malformed event is logged and dropped without disturbing the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_store::validation::parse_uuid;
use parley_store::{validate_message, MessageStore};

use crate::access::AccessGate;
use crate::error::RemoteError;
use crate::realtime::{ChangeEvent, ChangeKind, FeedFilter, RealtimeFeed};

pub const MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// Effect of one change event on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Upserted { id: Uuid, new: bool },
    Deleted { id: Uuid, existed: bool },
    Dropped,
}

/// Apply one change event for `channel_id` to the store.
pub fn apply_change(store: &MessageStore, channel_id: Uuid, event: ChangeEvent) -> ChangeOutcome {
    match event.event_type {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(row) = event.new else {
                warn!(%channel_id, kind = ?event.event_type, "Change event without a row");
                return ChangeOutcome::Dropped;
            };
            match validate_message(&row) {
                Ok(message) if message.channel_id != channel_id => {
                    warn!(%channel_id, id = %message.id, "Change event for another channel");
                    ChangeOutcome::Dropped
                }
                Ok(message) => {
                    let id = message.id;
                    let new = store.add_message(message);
                    ChangeOutcome::Upserted { id, new }
                }
                Err(e) => {
                    warn!(%channel_id, error = %e, "Dropping malformed change event");
                    ChangeOutcome::Dropped
                }
            }
        }
        ChangeKind::Delete => {
            let old = event.old.as_ref();
            let id = old.and_then(|old| old.get("id")).and_then(parse_uuid);
            // Delete payloads may carry only the key; fall back to the
            // channel the store filed the record under.
            let owner = old
                .and_then(|old| old.get("channel_id"))
                .and_then(parse_uuid)
                .or_else(|| id.and_then(|id| store.get(id)).map(|m| m.channel_id));
            match id {
                Some(id) if owner.is_some_and(|owner| owner != channel_id) => {
                    warn!(%channel_id, %id, "Delete event for another channel");
                    ChangeOutcome::Dropped
                }
                Some(id) => ChangeOutcome::Deleted {
                    id,
                    existed: store.delete_message(id).is_some(),
                },
                None => {
                    warn!(%channel_id, "Delete event without a usable id");
                    ChangeOutcome::Dropped
                }
            }
        }
    }
}

struct ActiveChannel {
    channel_id: Uuid,
    subscription_id: u64,
    task: JoinHandle<()>,
}

pub struct SubscriptionManager<F> {
    feed: Arc<F>,
    store: Arc<MessageStore>,
    gate: Arc<AccessGate>,
    state: SubscriptionState,
    current: Option<ActiveChannel>,
}

impl<F: RealtimeFeed> SubscriptionManager<F> {
    pub fn new(feed: Arc<F>, store: Arc<MessageStore>, gate: Arc<AccessGate>) -> Self {
        Self {
            feed,
            store,
            gate,
            state: SubscriptionState::Unsubscribed,
            current: None,
        }
    }

    /// Current state.  A subscription whose feed has closed reads as
    /// unsubscribed.
    pub fn state(&self) -> SubscriptionState {
        match &self.current {
            Some(active) if active.task.is_finished() => SubscriptionState::Unsubscribed,
            _ => self.state,
        }
    }

    /// The channel currently subscribed to, if any.
    pub fn channel_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|a| a.channel_id)
    }

    /// Move the subscription to `channel_id`.
    ///
    /// Without read access this leaves nothing subscribed and is not an
    /// error.
    pub async fn switch_to(&mut self, channel_id: Uuid) -> Result<SubscriptionState, RemoteError> {
        self.teardown().await;

        if !self.gate.get_access(channel_id).can_read {
            debug!(%channel_id, "No read access, not subscribing");
            return Ok(self.state);
        }

        self.state = SubscriptionState::Subscribing;
        let filter = FeedFilter::eq(MESSAGES_TABLE, "channel_id", channel_id);
        let subscription = match self.feed.subscribe(filter).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%channel_id, error = %e, "Failed to subscribe to channel");
                self.state = SubscriptionState::Unsubscribed;
                return Err(e);
            }
        };

        let task = tokio::spawn(pump(
            channel_id,
            subscription.events,
            Arc::clone(&self.store),
        ));
        self.current = Some(ActiveChannel {
            channel_id,
            subscription_id: subscription.id,
            task,
        });
        self.state = SubscriptionState::Active;
        info!(%channel_id, "Subscribed to channel");
        Ok(self.state)
    }

    /// Release the current subscription, if any.
    pub async fn teardown(&mut self) {
        if let Some(active) = self.current.take() {
            active.task.abort();
            self.feed.unsubscribe(active.subscription_id).await;
            debug!(channel_id = %active.channel_id, "Unsubscribed from channel");
        }
        self.state = SubscriptionState::Unsubscribed;
    }
}

impl<F> Drop for SubscriptionManager<F> {
    fn drop(&mut self) {
        if let Some(active) = self.current.take() {
            active.task.abort();
        }
    }
}

async fn pump(channel_id: Uuid, mut events: mpsc::Receiver<ChangeEvent>, store: Arc<MessageStore>) {
    while let Some(event) = events.recv().await {
        apply_change(&store, channel_id, event);
    }
    debug!(%channel_id, "Change feed closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::access::ChannelSnapshot;
    use crate::mock::{channel, raw_message};
    use crate::realtime::LocalFeed;
    use parley_store::MemberRole;

    struct Fixture {
        feed: Arc<LocalFeed>,
        store: Arc<MessageStore>,
        manager: SubscriptionManager<LocalFeed>,
        public: Uuid,
        private: Uuid,
    }

    fn fixture() -> Fixture {
        let public = channel("general", false);
        let private = channel("staff", true);
        let ids = (public.id, private.id);
        let gate = Arc::new(AccessGate::new(Duration::from_secs(30)));
        gate.set_channels(vec![
            ChannelSnapshot { channel: public, role: Some(MemberRole::Member) },
            ChannelSnapshot { channel: private, role: None },
        ]);
        let feed = Arc::new(LocalFeed::new());
        let store = Arc::new(MessageStore::new());
        let manager = SubscriptionManager::new(Arc::clone(&feed), Arc::clone(&store), gate);
        Fixture { feed, store, manager, public: ids.0, private: ids.1 }
    }

    async fn wait_for_change(rx: &mut tokio::sync::watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("store change")
            .expect("store alive");
    }

    #[tokio::test]
    async fn test_events_reach_store() {
        let mut fx = fixture();
        let state = fx.manager.switch_to(fx.public).await.unwrap();
        assert_eq!(state, SubscriptionState::Active);
        assert_eq!(fx.manager.channel_id(), Some(fx.public));

        let mut rx = fx.store.subscribe();
        let id = Uuid::new_v4();
        let row = raw_message(id, fx.public, Uuid::new_v4(), "hi", None);
        assert_eq!(fx.feed.publish(MESSAGES_TABLE, ChangeEvent::insert(row)).await, 1);
        wait_for_change(&mut rx).await;
        assert!(fx.store.contains(id));
    }

    #[tokio::test]
    async fn test_switch_replaces_subscription() {
        let mut fx = fixture();
        let other = channel("random", false);
        let other_id = other.id;
        fx.manager.switch_to(fx.public).await.unwrap();
        // `other` is unknown to the gate, so the switch only tears down.
        assert_eq!(fx.manager.switch_to(other_id).await.unwrap(), SubscriptionState::Unsubscribed);
        assert_eq!(fx.feed.subscriber_count(), 0);

        fx.manager.switch_to(fx.public).await.unwrap();
        assert_eq!(fx.feed.subscriber_count(), 1);
        fx.manager.teardown().await;
        assert_eq!(fx.feed.subscriber_count(), 0);
        assert_eq!(fx.manager.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_no_read_access_is_not_an_error() {
        let mut fx = fixture();
        let state = fx.manager.switch_to(fx.private).await.unwrap();
        assert_eq!(state, SubscriptionState::Unsubscribed);
        assert_eq!(fx.manager.channel_id(), None);
        assert_eq!(fx.feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_feed_failure_leaves_unsubscribed() {
        let mut fx = fixture();
        fx.feed.set_online(false);
        assert!(fx.manager.switch_to(fx.public).await.is_err());
        assert_eq!(fx.manager.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_malformed_event_is_dropped_and_stream_continues() {
        let mut fx = fixture();
        fx.manager.switch_to(fx.public).await.unwrap();
        let mut rx = fx.store.subscribe();

        let bad = json!({"id": "not-a-uuid", "channel_id": fx.public.to_string()});
        fx.feed.publish(MESSAGES_TABLE, ChangeEvent::insert(bad)).await;

        let id = Uuid::new_v4();
        let good = raw_message(id, fx.public, Uuid::new_v4(), "ok", None);
        fx.feed.publish(MESSAGES_TABLE, ChangeEvent::insert(good)).await;

        wait_for_change(&mut rx).await;
        assert_eq!(fx.store.len(), 1);
        assert!(fx.store.contains(id));
    }

    #[test]
    fn test_apply_change_variants() {
        let store = MessageStore::new();
        let channel_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let author = Uuid::new_v4();

        let row = raw_message(id, channel_id, author, "first", None);
        assert_eq!(
            apply_change(&store, channel_id, ChangeEvent::insert(row)),
            ChangeOutcome::Upserted { id, new: true }
        );

        let edited = raw_message(id, channel_id, author, "edited", None);
        assert_eq!(
            apply_change(&store, channel_id, ChangeEvent::update(edited)),
            ChangeOutcome::Upserted { id, new: false }
        );
        assert_eq!(store.get(id).unwrap().content, "edited");

        let foreign = raw_message(Uuid::new_v4(), Uuid::new_v4(), author, "elsewhere", None);
        assert_eq!(
            apply_change(&store, channel_id, ChangeEvent::insert(foreign)),
            ChangeOutcome::Dropped
        );

        let reply_id = Uuid::new_v4();
        let reply = raw_message(reply_id, channel_id, author, "reply", Some(id));
        assert_eq!(
            apply_change(&store, channel_id, ChangeEvent::insert(reply)),
            ChangeOutcome::Upserted { id: reply_id, new: true }
        );
        assert_eq!(store.thread_index(id), vec![reply_id]);

        let delete_reply = ChangeEvent::delete(json!({
            "id": reply_id.to_string(),
            "channel_id": channel_id.to_string(),
        }));
        assert_eq!(
            apply_change(&store, channel_id, delete_reply),
            ChangeOutcome::Deleted { id: reply_id, existed: true }
        );
        assert!(store.thread_index(id).is_empty());
        assert_eq!(store.channel_index(channel_id), vec![id]);

        let delete = ChangeEvent::delete(json!({"id": id.to_string()}));
        assert_eq!(
            apply_change(&store, channel_id, delete),
            ChangeOutcome::Deleted { id, existed: true }
        );
        assert!(store.is_empty());
        assert!(store.channel_index(channel_id).is_empty());

        let no_id = ChangeEvent::delete(json!({}));
        assert_eq!(apply_change(&store, channel_id, no_id), ChangeOutcome::Dropped);
    }

    #[test]
    fn test_delete_for_another_channel_is_dropped() {
        let store = MessageStore::new();
        let channel_id = Uuid::new_v4();
        let elsewhere = Uuid::new_v4();
        let author = Uuid::new_v4();

        let foreign_id = Uuid::new_v4();
        store.add_message(validate_message(&raw_message(foreign_id, elsewhere, author, "x", None)).unwrap());

        // Payload names the other channel.
        let tagged = ChangeEvent::delete(json!({
            "id": foreign_id.to_string(),
            "channel_id": elsewhere.to_string(),
        }));
        assert_eq!(apply_change(&store, channel_id, tagged), ChangeOutcome::Dropped);

        // Key-only payload: the stored record's channel decides.
        let bare = ChangeEvent::delete(json!({"id": foreign_id.to_string()}));
        assert_eq!(apply_change(&store, channel_id, bare), ChangeOutcome::Dropped);
        assert!(store.contains(foreign_id));

        // Unknown ids still settle as deletes that found nothing.
        let unknown = Uuid::new_v4();
        let missing = ChangeEvent::delete(json!({"id": unknown.to_string()}));
        assert_eq!(
            apply_change(&store, channel_id, missing),
            ChangeOutcome::Deleted { id: unknown, existed: false }
        );
    }
}
