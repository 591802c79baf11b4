//! The normalized message table and its channel/thread indexes.
//!
//! [`MessageStore`] is the single merge point for everything that changes
//! messages: bulk loads, local sends and edits, and realtime events.  All
//! writes are idempotent upserts keyed by message id, so the same row
//! arriving from two sources (a send echo and its realtime insert) lands
//! exactly once.
//!
//! Index invariants:
//! - every id in `channel_messages` or `thread_messages` has an entry in
//!   `messages`;
//! - an id lives in exactly one index list, chosen once at insertion by
//!   `parent_message_id`;
//! - lists keep insertion order; chronological order is a view concern.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use parley_shared::constants::MESSAGE_STORAGE_KEY;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Message;
use crate::session::SessionStorage;

/// The persisted part of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    /// Canonical table, id -> message.
    pub messages: HashMap<Uuid, Message>,
    /// Channel id -> root message ids, insertion order.
    pub channel_messages: HashMap<Uuid, Vec<Uuid>>,
    /// Parent message id -> reply ids, insertion order.
    pub thread_messages: HashMap<Uuid, Vec<Uuid>>,
}

impl MessageSnapshot {
    fn index_of(&mut self, msg: &Message) -> &mut Vec<Uuid> {
        match msg.parent_message_id {
            Some(parent) => self.thread_messages.entry(parent).or_default(),
            None => self.channel_messages.entry(msg.channel_id).or_default(),
        }
    }

    fn unindex(&mut self, msg: &Message) {
        let (map, key) = match msg.parent_message_id {
            Some(parent) => (&mut self.thread_messages, parent),
            None => (&mut self.channel_messages, msg.channel_id),
        };
        if let Some(ids) = map.get_mut(&key) {
            ids.retain(|id| *id != msg.id);
            if ids.is_empty() {
                map.remove(&key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MessageState {
    data: MessageSnapshot,
    loading: bool,
    error: Option<String>,
}

/// In-memory message store shared by the UI, the subscription manager and
/// the operations façade.
///
/// Interior mutability keeps the API `&self`; the lock is never held across
/// an `.await`.  Each mutation bumps a revision published on a
/// [`watch`] channel so views can re-render.
pub struct MessageStore {
    state: Mutex<MessageState>,
    revision: watch::Sender<u64>,
    storage: Option<Box<dyn SessionStorage>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// A store without persistence.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(MessageState::default()),
            revision,
            storage: None,
        }
    }

    /// A store mirrored to `storage`, restoring whatever snapshot the
    /// session already holds.  An unreadable snapshot is discarded.
    pub fn with_storage(storage: Box<dyn SessionStorage>) -> Self {
        let restored = match storage.get_item(MESSAGE_STORAGE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<MessageSnapshot>(&json) {
                Ok(snapshot) => {
                    debug!(messages = snapshot.messages.len(), "restored message snapshot");
                    snapshot
                }
                Err(e) => {
                    warn!(error = %e, "discarding unreadable message snapshot");
                    MessageSnapshot::default()
                }
            },
            Ok(None) => MessageSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "session storage unavailable, starting empty");
                MessageSnapshot::default()
            }
        };

        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(MessageState {
                data: restored,
                ..MessageState::default()
            }),
            revision,
            storage: Some(storage),
        }
    }

    /// Subscribe to change notifications.  The value is a revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert or replace a message.  Returns `true` when the id was new.
    ///
    /// A new id is appended to its channel list (root) or thread list
    /// (reply).  A known id keeps its index slot and classification.
    pub fn add_message(&self, message: Message) -> bool {
        self.mutate(|data| (upsert(data, message), true))
    }

    /// Bulk upsert under a single lock and a single persist.  Returns how
    /// many ids were new.
    pub fn add_messages<I>(&self, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        self.mutate(|data| {
            let added = messages
                .into_iter()
                .map(|m| upsert(data, m))
                .filter(|new| *new)
                .count();
            (added, true)
        })
    }

    /// Replace the stored record for `message.id`.  Unknown ids are ignored
    /// and reported with `false`.
    pub fn update_message(&self, message: Message) -> bool {
        self.mutate(|data| match data.messages.get_mut(&message.id) {
            Some(existing) => {
                *existing = pin_classification(existing, message);
                (true, true)
            }
            None => {
                debug!(id = %message.id, "update for unknown message ignored");
                (false, false)
            }
        })
    }

    /// Remove a message and its index entry.  No-op for unknown ids.
    pub fn delete_message(&self, id: Uuid) -> Option<Message> {
        self.mutate(|data| match data.messages.remove(&id) {
            Some(removed) => {
                data.unindex(&removed);
                (Some(removed), true)
            }
            None => (None, false),
        })
    }

    /// Drop every message of one channel, roots and replies alike.
    /// Returns how many messages were removed.
    pub fn clear_channel(&self, channel_id: Uuid) -> usize {
        self.mutate(|data| {
            let doomed: Vec<Message> = data
                .messages
                .values()
                .filter(|m| m.channel_id == channel_id)
                .cloned()
                .collect();
            for msg in &doomed {
                data.messages.remove(&msg.id);
                data.unindex(msg);
            }
            data.channel_messages.remove(&channel_id);
            (doomed.len(), !doomed.is_empty())
        })
    }

    /// Reset all maps.  Used on session teardown.
    pub fn clear_messages(&self) {
        self.mutate(|data| {
            *data = MessageSnapshot::default();
            ((), true)
        })
    }

    pub fn set_loading(&self, loading: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        };
        if changed {
            self.bump();
        }
    }

    pub fn set_error(&self, error: Option<String>) {
        self.lock().error = error;
        self.bump();
    }

    /// Begin an optimistic edit of a stored message.
    ///
    /// `apply` mutates a copy of the current record which is written to the
    /// store immediately.  The returned transaction must be settled with
    /// [`EditTransaction::commit`] or [`EditTransaction::rollback`]; dropping
    /// it unsettled rolls back.  Returns `None` for unknown ids.
    pub fn begin_edit<F>(&self, id: Uuid, apply: F) -> Option<EditTransaction<'_>>
    where
        F: FnOnce(&mut Message),
    {
        let previous = self.get(id)?;
        let mut draft = previous.clone();
        apply(&mut draft);
        self.update_message(draft);
        Some(EditTransaction {
            store: self,
            previous,
            settled: false,
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.lock().data.messages.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().data.messages.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().data.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root messages of a channel in insertion order.
    pub fn channel_messages(&self, channel_id: Uuid) -> Vec<Message> {
        let state = self.lock();
        resolve(&state.data, state.data.channel_messages.get(&channel_id))
    }

    /// Root messages of a channel sorted by creation time, oldest first.
    /// Records without a timestamp sort first.
    pub fn channel_messages_sorted(&self, channel_id: Uuid) -> Vec<Message> {
        let mut messages = self.channel_messages(channel_id);
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    /// Replies to `parent_id` in insertion order.
    pub fn thread_messages(&self, parent_id: Uuid) -> Vec<Message> {
        let state = self.lock();
        resolve(&state.data, state.data.thread_messages.get(&parent_id))
    }

    /// Root message ids of a channel, insertion order.
    pub fn channel_index(&self, channel_id: Uuid) -> Vec<Uuid> {
        self.lock()
            .data
            .channel_messages
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Reply ids of a thread, insertion order.
    pub fn thread_index(&self, parent_id: Uuid) -> Vec<Uuid> {
        self.lock()
            .data
            .thread_messages
            .get(&parent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn snapshot(&self) -> MessageSnapshot {
        self.lock().data.clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, MessageState> {
        // A panic while holding the lock leaves the maps consistent: every
        // mutation is computed before it is written back.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the maps; persist and notify when it reports a change.
    fn mutate<R>(&self, f: impl FnOnce(&mut MessageSnapshot) -> (R, bool)) -> R {
        let (result, changed) = {
            let mut state = self.lock();
            let (result, changed) = f(&mut state.data);
            if changed {
                state.error = None;
                self.persist(&state.data);
            }
            (result, changed)
        };
        if changed {
            self.bump();
        }
        result
    }

    fn persist(&self, data: &MessageSnapshot) {
        let Some(storage) = &self.storage else {
            return;
        };
        let written = serde_json::to_string(data)
            .map_err(crate::StoreError::from)
            .and_then(|json| storage.set_item(MESSAGE_STORAGE_KEY, &json));
        if let Err(e) = written {
            warn!(error = %e, "failed to mirror message store to session storage");
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

/// Upsert into the maps; `true` when the id was new.
fn upsert(data: &mut MessageSnapshot, message: Message) -> bool {
    if let Some(existing) = data.messages.get_mut(&message.id) {
        *existing = pin_classification(existing, message);
        return false;
    }
    let index = data.index_of(&message);
    if !index.contains(&message.id) {
        index.push(message.id);
    }
    data.messages.insert(message.id, message);
    true
}

/// Keep the stored channel/thread placement; a record never changes index.
fn pin_classification(existing: &Message, mut incoming: Message) -> Message {
    if incoming.channel_id != existing.channel_id
        || incoming.parent_message_id != existing.parent_message_id
    {
        warn!(
            id = %incoming.id,
            "ignoring channel/thread change on existing message"
        );
        incoming.channel_id = existing.channel_id;
        incoming.parent_message_id = existing.parent_message_id;
    }
    incoming
}

fn resolve(data: &MessageSnapshot, ids: Option<&Vec<Uuid>>) -> Vec<Message> {
    ids.map(|ids| {
        ids.iter()
            .filter_map(|id| data.messages.get(id).cloned())
            .collect()
    })
    .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Optimistic edits
// ---------------------------------------------------------------------------

/// An optimistic edit in flight.  Holds the pre-edit record so the change
/// can be reverted if the remote write fails.
#[must_use = "an unsettled edit rolls back when dropped"]
pub struct EditTransaction<'a> {
    store: &'a MessageStore,
    previous: Message,
    settled: bool,
}

impl EditTransaction<'_> {
    /// The record as it was before the edit.
    pub fn previous(&self) -> &Message {
        &self.previous
    }

    /// Replace the optimistic draft with the server-confirmed record.
    pub fn commit(mut self, confirmed: Message) {
        self.settled = true;
        self.store.update_message(confirmed);
    }

    /// Restore the pre-edit record.
    pub fn rollback(mut self) {
        self.settled = true;
        self.restore();
    }

    fn restore(&self) {
        // The message may have been deleted meanwhile; update ignores that.
        self.store.update_message(self.previous.clone());
    }
}

impl Drop for EditTransaction<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(id = %self.previous.id, "unsettled edit dropped, rolling back");
            self.restore();
        }
    }
}
