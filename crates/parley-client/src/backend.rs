//! Seams to the hosted backend.
//!
//! [`DataService`] covers the relational API, [`ObjectStorage`] the
//! attachment bucket.  Message rows come back as raw JSON because they must
//! pass validation before anything trusts them; every other table decodes
//! straight into its model.

use std::future::Future;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use parley_store::{
    AccessRequest, AccessRequestStatus, Channel, ChannelMember, MemberRole, Notification,
    Reaction,
};

use crate::error::RemoteResult;

/// Body of a message insert.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub file_url: Option<String>,
    pub attachment_path: Option<String>,
    pub parent_message_id: Option<Uuid>,
}

/// Body of a message edit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageEdit {
    pub content: String,
    pub edited_at: DateTime<Utc>,
    pub edited_by: Uuid,
}

/// A full-text search result row.
///
/// The procedure returns the neighbouring messages as JSON-encoded text;
/// [`SearchHit::messages_before`] and [`SearchHit::messages_after`] decode
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub context_before: Option<String>,
    #[serde(default)]
    pub context_after: Option<String>,
}

/// A message shown around a search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

impl SearchHit {
    pub fn messages_before(&self) -> Vec<ContextMessage> {
        decode_context(self.context_before.as_deref())
    }

    pub fn messages_after(&self) -> Vec<ContextMessage> {
        decode_context(self.context_after.as_deref())
    }
}

// Unreadable context is shown as none.
fn decode_context(raw: Option<&str>) -> Vec<ContextMessage> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// A full page came back, so another may follow.
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub channel_id: Uuid,
    pub unread_count: u64,
}

/// Query over access requests; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequestFilter {
    pub channel_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub status: Option<AccessRequestStatus>,
}

/// The relational half of the backend.
///
/// Writes that carry a `user_id` are filtered on it server-side; a write
/// that matches no row comes back as `None` or `0`, never as an error.
pub trait DataService: Send + Sync + 'static {
    fn fetch_channels(&self) -> impl Future<Output = RemoteResult<Vec<Channel>>> + Send;

    fn fetch_memberships(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<Vec<ChannelMember>>> + Send;

    /// Messages of a channel, oldest first, each with its author embedded.
    fn fetch_messages(
        &self,
        channel_id: Uuid,
    ) -> impl Future<Output = RemoteResult<Vec<Value>>> + Send;

    /// Insert a message and return the stored row with its author.
    fn insert_message(
        &self,
        message: &NewMessage,
    ) -> impl Future<Output = RemoteResult<Value>> + Send;

    /// Edit a message owned by `author_id`.
    fn update_message(
        &self,
        id: Uuid,
        author_id: Uuid,
        edit: &MessageEdit,
    ) -> impl Future<Output = RemoteResult<Option<Value>>> + Send;

    /// Delete a message owned by `author_id`; returns the rows removed.
    fn delete_message(
        &self,
        id: Uuid,
        author_id: Uuid,
    ) -> impl Future<Output = RemoteResult<u64>> + Send;

    fn fetch_access_request(
        &self,
        id: Uuid,
    ) -> impl Future<Output = RemoteResult<Option<AccessRequest>>> + Send;

    fn fetch_access_requests(
        &self,
        filter: &AccessRequestFilter,
    ) -> impl Future<Output = RemoteResult<Vec<AccessRequest>>> + Send;

    fn insert_access_request(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<AccessRequest>> + Send;

    /// Move a request to `status` only if it is still pending and unchanged
    /// since `expected_updated_at`.
    fn transition_access_request(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        status: AccessRequestStatus,
    ) -> impl Future<Output = RemoteResult<Option<AccessRequest>>> + Send;

    fn insert_member(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> impl Future<Output = RemoteResult<ChannelMember>> + Send;

    fn fetch_reactions(
        &self,
        message_id: Uuid,
    ) -> impl Future<Output = RemoteResult<Vec<Reaction>>> + Send;

    fn insert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> impl Future<Output = RemoteResult<Reaction>> + Send;

    fn delete_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> impl Future<Output = RemoteResult<u64>> + Send;

    fn search_messages(
        &self,
        query: &str,
        channel_id: Option<Uuid>,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = RemoteResult<Vec<SearchHit>>> + Send;

    fn unread_counts(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> impl Future<Output = RemoteResult<Vec<UnreadCount>>> + Send;

    fn mark_channel_as_read(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// The user's newest notifications first.
    fn fetch_notifications(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> impl Future<Output = RemoteResult<Vec<Notification>>> + Send;

    /// `None` when no notification with `id` belongs to `user_id`.
    fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<Option<Notification>>> + Send;

    /// Returns the number of notifications that changed.
    fn mark_all_notifications_read(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<u64>> + Send;

    fn delete_notification(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<u64>> + Send;

    fn count_unread_notifications(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = RemoteResult<u64>> + Send;
}

/// The attachment bucket.
pub trait ObjectStorage: Send + Sync + 'static {
    /// Store `body` under `path` and return its public URL.
    fn upload(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
    ) -> impl Future<Output = RemoteResult<String>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_hit_context() {
        let neighbour = Uuid::new_v4();
        let hit: SearchHit = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "channel_id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "content": "deploy is done",
            "created_at": "2024-03-01T10:00:00Z",
            "similarity": 0.8,
            "context_before": json!([{"id": neighbour, "user_id": neighbour, "content": "deploying"}]).to_string(),
            "context_after": "not json"
        }))
        .unwrap();

        let before = hit.messages_before();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].content, "deploying");
        assert!(hit.messages_after().is_empty());
    }
}
