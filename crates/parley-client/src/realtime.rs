//! Row-change feed.
//!
//! The backend pushes insert, update and delete events for a table filtered
//! on one column.  [`RealtimeFeed`] is the seam; [`LocalFeed`] is an
//! in-process fan-out used by tests and offline demos.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use parley_shared::constants::REALTIME_CHANNEL_CAPACITY;

use crate::error::{RemoteError, RemoteResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change.  `new` is set for inserts and updates, `old` for deletes
/// (and for updates when the backend sends the previous row).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(row: Value) -> Self {
        Self { event_type: ChangeKind::Insert, new: Some(row), old: None }
    }

    pub fn update(row: Value) -> Self {
        Self { event_type: ChangeKind::Update, new: Some(row), old: None }
    }

    pub fn delete(old: Value) -> Self {
        Self { event_type: ChangeKind::Delete, new: None, old: Some(old) }
    }
}

/// `column = value` on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    pub fn eq(table: &str, column: &str, value: impl ToString) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    /// Filter expression in the backend's `column=eq.value` syntax.
    pub fn expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }

    fn matches(&self, table: &str, event: &ChangeEvent) -> bool {
        if table != self.table {
            return false;
        }
        event
            .new
            .as_ref()
            .or(event.old.as_ref())
            .and_then(|row| row.get(&self.column))
            .and_then(Value::as_str)
            .is_some_and(|v| v == self.value)
    }
}

/// A live subscription: its id (for unsubscribing) and the event stream.
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: u64,
    pub events: mpsc::Receiver<ChangeEvent>,
}

pub trait RealtimeFeed: Send + Sync + 'static {
    fn subscribe(
        &self,
        filter: FeedFilter,
    ) -> impl Future<Output = RemoteResult<FeedSubscription>> + Send;

    /// Release a subscription.  Unknown ids are ignored.
    fn unsubscribe(&self, id: u64) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// LocalFeed
// ---------------------------------------------------------------------------

struct Subscriber {
    filter: FeedFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

/// In-process feed: [`LocalFeed::publish`] delivers to every matching
/// subscriber.
pub struct LocalFeed {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    online: AtomicBool,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// While offline, new subscriptions are refused.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver `event` on `table`; returns the number of subscribers reached.
    pub async fn publish(&self, table: &str, event: ChangeEvent) -> usize {
        let targets: Vec<(u64, mpsc::Sender<ChangeEvent>)> = match self.subscribers.lock() {
            Ok(subs) => subs
                .iter()
                .filter(|(_, s)| s.filter.matches(table, &event))
                .map(|(id, s)| (*id, s.tx.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                trace!(id, "Dropping closed subscriber");
                if let Ok(mut subs) = self.subscribers.lock() {
                    subs.remove(&id);
                }
            }
        }
        delivered
    }
}

impl Default for LocalFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeFeed for LocalFeed {
    async fn subscribe(&self, filter: FeedFilter) -> RemoteResult<FeedSubscription> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("realtime feed offline".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, events) = mpsc::channel(REALTIME_CHANNEL_CAPACITY);
        debug!(id, table = %filter.table, filter = %filter.expression(), "Feed subscription opened");
        self.subscribers
            .lock()
            .map_err(|_| RemoteError::Unavailable("feed registry poisoned".into()))?
            .insert(id, Subscriber { filter, tx });
        Ok(FeedSubscription { id, events })
    }

    async fn unsubscribe(&self, id: u64) {
        if let Ok(mut subs) = self.subscribers.lock() {
            if subs.remove(&id).is_some() {
                debug!(id, "Feed subscription closed");
            }
        }
    }
}
