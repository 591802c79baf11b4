//! In-memory backend for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use parley_store::{
    AccessRequest, AccessRequestStatus, Channel, ChannelMember, MemberRole, Notification,
    NotificationKind, Reaction,
};

use crate::auth::CurrentUser;
use crate::backend::{
    AccessRequestFilter, DataService, MessageEdit, NewMessage, ObjectStorage, SearchHit,
    UnreadCount,
};
use crate::error::{RemoteError, RemoteResult};

pub fn raw_message(
    id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
    content: &str,
    parent: Option<Uuid>,
) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel_id.to_string(),
        "user_id": user_id.to_string(),
        "content": content,
        "file_url": null,
        "created_at": Utc::now().to_rfc3339(),
        "edited_at": null,
        "edited_by": null,
        "parent_message_id": parent.map(|p| p.to_string()),
        "user": {
            "id": user_id.to_string(),
            "name": "Ada",
            "email": "ada@example.com",
            "avatar_url": null,
            "created_at": "2024-01-01T00:00:00Z",
            "last_seen": null
        }
    })
}

pub fn channel(name: &str, is_private: bool) -> Channel {
    Channel {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        is_private,
        created_by: Uuid::new_v4(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn member(channel_id: Uuid, user_id: Uuid, role: MemberRole) -> ChannelMember {
    ChannelMember {
        channel_id,
        user_id,
        role,
        created_at: Utc::now(),
        last_read: None,
    }
}

pub fn user() -> CurrentUser {
    CurrentUser {
        id: Uuid::new_v4(),
        email: "ada@example.com".into(),
        name: Some("Ada".into()),
    }
}

pub fn notification(user_id: Uuid, title: &str, minutes_ago: i64) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id,
        kind: NotificationKind::Mention,
        title: title.to_string(),
        content: None,
        data: None,
        is_read: false,
        created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
    }
}

pub fn access_request(channel_id: Uuid, user_id: Uuid) -> AccessRequest {
    AccessRequest {
        id: Uuid::new_v4(),
        channel_id,
        user_id,
        status: AccessRequestStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MockState {
    pub channels: Vec<Channel>,
    pub members: Vec<ChannelMember>,
    pub rows: Vec<Value>,
    pub requests: Vec<AccessRequest>,
    pub reactions: Vec<Reaction>,
    pub notifications: Vec<Notification>,
    pub unread: Vec<UnreadCount>,
    pub uploads: Vec<(String, usize, String)>,
    pub read_marks: Vec<(Uuid, Uuid)>,
    /// Another admin settles every request just before our transition.
    pub race_transitions: bool,
    pub calls: Vec<&'static str>,
    pub failing: HashSet<&'static str>,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    latency_ms: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.lock());
    }

    pub fn fail(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Delay every message fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn begin(&self, op: &'static str) -> RemoteResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(op);
        if state.failing.contains(op) {
            return Err(RemoteError::Unavailable(format!("{op} failed")));
        }
        Ok(state)
    }
}

fn row_matches(row: &Value, id: Uuid, user_id: Uuid) -> bool {
    row["id"] == json!(id.to_string()) && row["user_id"] == json!(user_id.to_string())
}

impl DataService for MockBackend {
    async fn fetch_channels(&self) -> RemoteResult<Vec<Channel>> {
        Ok(self.begin("fetch_channels")?.channels.clone())
    }

    async fn fetch_memberships(&self, user_id: Uuid) -> RemoteResult<Vec<ChannelMember>> {
        let state = self.begin("fetch_memberships")?;
        Ok(state.members.iter().filter(|m| m.user_id == user_id).cloned().collect())
    }

    async fn fetch_messages(&self, channel_id: Uuid) -> RemoteResult<Vec<Value>> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let state = self.begin("fetch_messages")?;
        let channel = json!(channel_id.to_string());
        Ok(state.rows.iter().filter(|r| r["channel_id"] == channel).cloned().collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> RemoteResult<Value> {
        let mut state = self.begin("insert_message")?;
        let mut row = raw_message(
            Uuid::new_v4(),
            message.channel_id,
            message.user_id,
            &message.content,
            message.parent_message_id,
        );
        row["file_url"] = json!(message.file_url);
        row["attachment_path"] = json!(message.attachment_path);
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn update_message(
        &self,
        id: Uuid,
        author_id: Uuid,
        edit: &MessageEdit,
    ) -> RemoteResult<Option<Value>> {
        let mut state = self.begin("update_message")?;
        let Some(row) = state.rows.iter_mut().find(|r| row_matches(r, id, author_id)) else {
            return Ok(None);
        };
        row["content"] = json!(edit.content);
        row["edited_at"] = json!(edit.edited_at.to_rfc3339());
        row["edited_by"] = json!(edit.edited_by.to_string());
        Ok(Some(row.clone()))
    }

    async fn delete_message(&self, id: Uuid, author_id: Uuid) -> RemoteResult<u64> {
        let mut state = self.begin("delete_message")?;
        let before = state.rows.len();
        state.rows.retain(|r| !row_matches(r, id, author_id));
        Ok((before - state.rows.len()) as u64)
    }

    async fn fetch_access_request(&self, id: Uuid) -> RemoteResult<Option<AccessRequest>> {
        let state = self.begin("fetch_access_request")?;
        Ok(state.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_access_requests(
        &self,
        filter: &AccessRequestFilter,
    ) -> RemoteResult<Vec<AccessRequest>> {
        let state = self.begin("fetch_access_requests")?;
        Ok(state
            .requests
            .iter()
            .filter(|r| filter.channel_id.map_or(true, |c| r.channel_id == c))
            .filter(|r| filter.user_id.map_or(true, |u| r.user_id == u))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn insert_access_request(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<AccessRequest> {
        let mut state = self.begin("insert_access_request")?;
        let request = access_request(channel_id, user_id);
        state.requests.push(request.clone());
        Ok(request)
    }

    async fn transition_access_request(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        status: AccessRequestStatus,
    ) -> RemoteResult<Option<AccessRequest>> {
        let mut state = self.begin("transition_access_request")?;
        if state.race_transitions {
            for r in state.requests.iter_mut().filter(|r| r.id == id) {
                r.status = AccessRequestStatus::Denied;
                r.updated_at += chrono::Duration::seconds(1);
            }
        }
        let Some(request) = state.requests.iter_mut().find(|r| {
            r.id == id
                && r.status == AccessRequestStatus::Pending
                && r.updated_at == expected_updated_at
        }) else {
            return Ok(None);
        };
        request.status = status;
        request.updated_at = Utc::now().max(expected_updated_at + chrono::Duration::milliseconds(1));
        Ok(Some(request.clone()))
    }

    async fn insert_member(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> RemoteResult<ChannelMember> {
        let mut state = self.begin("insert_member")?;
        let row = member(channel_id, user_id, role);
        state.members.push(row.clone());
        Ok(row)
    }

    async fn fetch_reactions(&self, message_id: Uuid) -> RemoteResult<Vec<Reaction>> {
        let state = self.begin("fetch_reactions")?;
        Ok(state.reactions.iter().filter(|r| r.message_id == message_id).cloned().collect())
    }

    async fn insert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> RemoteResult<Reaction> {
        let mut state = self.begin("insert_reaction")?;
        let reaction = Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };
        state.reactions.push(reaction.clone());
        Ok(reaction)
    }

    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> RemoteResult<u64> {
        let mut state = self.begin("delete_reaction")?;
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok((before - state.reactions.len()) as u64)
    }

    async fn search_messages(
        &self,
        query: &str,
        channel_id: Option<Uuid>,
        limit: u32,
        offset: u32,
    ) -> RemoteResult<Vec<SearchHit>> {
        let state = self.begin("search_messages")?;
        let needle = query.to_lowercase();
        Ok(state
            .rows
            .iter()
            .filter(|r| r["content"].as_str().is_some_and(|c| c.to_lowercase().contains(&needle)))
            .filter(|r| channel_id.map_or(true, |c| r["channel_id"] == json!(c.to_string())))
            .skip(offset as usize)
            .take(limit as usize)
            .filter_map(|r| {
                Some(SearchHit {
                    id: r["id"].as_str()?.parse().ok()?,
                    channel_id: r["channel_id"].as_str()?.parse().ok()?,
                    user_id: r["user_id"].as_str()?.parse().ok()?,
                    content: r["content"].as_str()?.to_string(),
                    created_at: Utc::now(),
                    similarity: 1.0,
                    context_before: None,
                    context_after: None,
                })
            })
            .collect())
    }

    async fn unread_counts(
        &self,
        _user_id: Uuid,
        _since: DateTime<Utc>,
    ) -> RemoteResult<Vec<UnreadCount>> {
        Ok(self.begin("unread_counts")?.unread.clone())
    }

    async fn mark_channel_as_read(&self, channel_id: Uuid, user_id: Uuid) -> RemoteResult<()> {
        self.begin("mark_channel_as_read")?.read_marks.push((channel_id, user_id));
        Ok(())
    }

    async fn fetch_notifications(&self, user_id: Uuid, limit: u32) -> RemoteResult<Vec<Notification>> {
        let state = self.begin("fetch_notifications")?;
        let mut mine: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit as usize);
        Ok(mine)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<Option<Notification>> {
        let mut state = self.begin("mark_notification_read")?;
        Ok(state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> RemoteResult<u64> {
        let mut state = self.begin("mark_all_notifications_read")?;
        let mut changed = 0;
        for n in state.notifications.iter_mut().filter(|n| n.user_id == user_id && !n.is_read) {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete_notification(&self, id: Uuid, user_id: Uuid) -> RemoteResult<u64> {
        let mut state = self.begin("delete_notification")?;
        let before = state.notifications.len();
        state.notifications.retain(|n| !(n.id == id && n.user_id == user_id));
        Ok((before - state.notifications.len()) as u64)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> RemoteResult<u64> {
        let state = self.begin("count_unread_notifications")?;
        Ok(state.notifications.iter().filter(|n| n.user_id == user_id && !n.is_read).count() as u64)
    }
}

impl ObjectStorage for MockBackend {
    async fn upload(&self, path: &str, body: Bytes, content_type: &str) -> RemoteResult<String> {
        let mut state = self.begin("upload")?;
        state.uploads.push((path.to_string(), body.len(), content_type.to_string()));
        Ok(format!("https://cdn.test/message-attachments/{path}"))
    }
}
