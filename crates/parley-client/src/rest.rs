//! HTTP backend speaking the hosted service's REST dialect.
//!
//! Tables live under `/rest/v1/{table}` with `column=op.value` filters,
//! stored procedures under `/rest/v1/rpc/{name}`, and attachments under
//! `/storage/v1/object/{bucket}/{path}`.

use std::fmt::Display;
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use parley_store::{
    AccessRequest, AccessRequestStatus, Channel, ChannelMember, MemberRole, Notification,
    Reaction,
};

use crate::backend::{
    AccessRequestFilter, DataService, MessageEdit, NewMessage, ObjectStorage, SearchHit,
    UnreadCount,
};
use crate::config::ClientConfig;
use crate::error::{RemoteError, RemoteResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Embed the author with every message row.
const MESSAGE_SELECT: &str = "*,user:users(*)";

pub struct RestDataService {
    http: Client,
    base_url: String,
    anon_key: Option<String>,
    bucket: String,
    access_token: RwLock<Option<String>>,
}

impl RestDataService {
    pub fn new(config: &ClientConfig) -> RemoteResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            bucket: config.attachment_bucket.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the signed-in user's token instead of the anonymous key.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.access_token.write() {
            *slot = token;
        }
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    pub fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .or_else(|| self.anon_key.clone());
        let request = match &self.anon_key {
            Some(key) => request.header("apikey", key),
            None => request,
        };
        match token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let body = self.send_raw(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_raw(&self, request: RequestBuilder) -> RemoteResult<Bytes> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// Ask for the exact row count only; the total comes back in
    /// `Content-Range`.
    async fn send_count(&self, request: RequestBuilder) -> RemoteResult<u64> {
        let response = self
            .authorize(request.header("Prefer", "count=exact"))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(range_total)
            .ok_or(RemoteError::EmptyResponse)
    }

    /// Writes that echo the affected rows back.
    fn returning(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Prefer", "return=representation")
    }
}

fn eq(value: impl Display) -> String {
    format!("eq.{value}")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Total from a `Content-Range` value such as `0-9/42` or `*/0`.
fn range_total(range: &str) -> Option<u64> {
    range.rsplit_once('/')?.1.parse().ok()
}

fn first<T>(rows: Vec<T>) -> RemoteResult<T> {
    rows.into_iter().next().ok_or(RemoteError::EmptyResponse)
}

impl DataService for RestDataService {
    async fn fetch_channels(&self) -> RemoteResult<Vec<Channel>> {
        let request = self
            .http
            .get(self.table_url("channels"))
            .query(&[("select", "*"), ("order", "name.asc")]);
        self.send(request).await
    }

    async fn fetch_memberships(&self, user_id: Uuid) -> RemoteResult<Vec<ChannelMember>> {
        let request = self
            .http
            .get(self.table_url("channel_members"))
            .query(&[("select", "*".to_string()), ("user_id", eq(user_id))]);
        self.send(request).await
    }

    async fn fetch_messages(&self, channel_id: Uuid) -> RemoteResult<Vec<Value>> {
        let request = self.http.get(self.table_url("messages")).query(&[
            ("select", MESSAGE_SELECT.to_string()),
            ("channel_id", eq(channel_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        let rows: Vec<Value> = self.send(request).await?;
        debug!(%channel_id, rows = rows.len(), "Fetched messages");
        Ok(rows)
    }

    async fn insert_message(&self, message: &NewMessage) -> RemoteResult<Value> {
        let request = self
            .http
            .post(self.table_url("messages"))
            .query(&[("select", MESSAGE_SELECT)])
            .json(message);
        first(self.send(self.returning(request)).await?)
    }

    async fn update_message(
        &self,
        id: Uuid,
        author_id: Uuid,
        edit: &MessageEdit,
    ) -> RemoteResult<Option<Value>> {
        let request = self
            .http
            .patch(self.table_url("messages"))
            .query(&[
                ("select", MESSAGE_SELECT.to_string()),
                ("id", eq(id)),
                ("user_id", eq(author_id)),
            ])
            .json(edit);
        let rows: Vec<Value> = self.send(self.returning(request)).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_message(&self, id: Uuid, author_id: Uuid) -> RemoteResult<u64> {
        let request = self.http.delete(self.table_url("messages")).query(&[
            ("select", "id".to_string()),
            ("id", eq(id)),
            ("user_id", eq(author_id)),
        ]);
        let rows: Vec<Value> = self.send(self.returning(request)).await?;
        Ok(rows.len() as u64)
    }

    async fn fetch_access_request(&self, id: Uuid) -> RemoteResult<Option<AccessRequest>> {
        let request = self
            .http
            .get(self.table_url("access_requests"))
            .query(&[("select", "*".to_string()), ("id", eq(id))]);
        let rows: Vec<AccessRequest> = self.send(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_access_requests(
        &self,
        filter: &AccessRequestFilter,
    ) -> RemoteResult<Vec<AccessRequest>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(channel_id) = filter.channel_id {
            query.push(("channel_id", eq(channel_id)));
        }
        if let Some(user_id) = filter.user_id {
            query.push(("user_id", eq(user_id)));
        }
        if let Some(status) = filter.status {
            query.push(("status", eq(status.as_str())));
        }
        let request = self.http.get(self.table_url("access_requests")).query(&query);
        self.send(request).await
    }

    async fn insert_access_request(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<AccessRequest> {
        let request = self.http.post(self.table_url("access_requests")).json(&json!({
            "channel_id": channel_id,
            "user_id": user_id,
            "status": AccessRequestStatus::Pending,
        }));
        first(self.send(self.returning(request)).await?)
    }

    async fn transition_access_request(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        status: AccessRequestStatus,
    ) -> RemoteResult<Option<AccessRequest>> {
        let request = self
            .http
            .patch(self.table_url("access_requests"))
            .query(&[
                ("id", eq(id)),
                ("status", eq(AccessRequestStatus::Pending.as_str())),
                ("updated_at", eq(timestamp(expected_updated_at))),
            ])
            .json(&json!({
                "status": status,
                "updated_at": timestamp(Utc::now()),
            }));
        let rows: Vec<AccessRequest> = self.send(self.returning(request)).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_member(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> RemoteResult<ChannelMember> {
        let request = self.http.post(self.table_url("channel_members")).json(&json!({
            "channel_id": channel_id,
            "user_id": user_id,
            "role": role,
        }));
        first(self.send(self.returning(request)).await?)
    }

    async fn fetch_reactions(&self, message_id: Uuid) -> RemoteResult<Vec<Reaction>> {
        let request = self.http.get(self.table_url("reactions")).query(&[
            ("select", "*".to_string()),
            ("message_id", eq(message_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.send(request).await
    }

    async fn insert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> RemoteResult<Reaction> {
        let request = self.http.post(self.table_url("reactions")).json(&json!({
            "message_id": message_id,
            "user_id": user_id,
            "emoji": emoji,
        }));
        first(self.send(self.returning(request)).await?)
    }

    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> RemoteResult<u64> {
        let request = self.http.delete(self.table_url("reactions")).query(&[
            ("select", "id".to_string()),
            ("message_id", eq(message_id)),
            ("user_id", eq(user_id)),
            ("emoji", eq(emoji)),
        ]);
        let rows: Vec<Value> = self.send(self.returning(request)).await?;
        Ok(rows.len() as u64)
    }

    async fn search_messages(
        &self,
        query: &str,
        channel_id: Option<Uuid>,
        limit: u32,
        offset: u32,
    ) -> RemoteResult<Vec<SearchHit>> {
        let request = self.http.post(self.rpc_url("search_messages")).json(&json!({
            "p_search_query": query,
            "p_channel_id": channel_id,
            "p_limit": limit,
            "p_offset": offset,
        }));
        self.send(request).await
    }

    async fn unread_counts(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RemoteResult<Vec<UnreadCount>> {
        let request = self.http.post(self.rpc_url("get_unread_counts")).json(&json!({
            "user_id": user_id,
            "since_timestamp": timestamp(since),
        }));
        self.send(request).await
    }

    async fn mark_channel_as_read(&self, channel_id: Uuid, user_id: Uuid) -> RemoteResult<()> {
        let request = self.http.post(self.rpc_url("mark_channel_as_read")).json(&json!({
            "p_channel_id": channel_id,
            "p_user_id": user_id,
        }));
        self.send_raw(request).await?;
        Ok(())
    }

    async fn fetch_notifications(&self, user_id: Uuid, limit: u32) -> RemoteResult<Vec<Notification>> {
        let request = self.http.get(self.table_url("notifications")).query(&[
            ("select", "*".to_string()),
            ("user_id", eq(user_id)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send(request).await
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<Option<Notification>> {
        let request = self
            .http
            .patch(self.table_url("notifications"))
            .query(&[("id", eq(id)), ("user_id", eq(user_id))])
            .json(&json!({ "is_read": true }));
        let rows: Vec<Notification> = self.send(self.returning(request)).await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> RemoteResult<u64> {
        let request = self
            .http
            .patch(self.table_url("notifications"))
            .query(&[
                ("select", "id".to_string()),
                ("user_id", eq(user_id)),
                ("is_read", eq(false)),
            ])
            .json(&json!({ "is_read": true }));
        let rows: Vec<Value> = self.send(self.returning(request)).await?;
        Ok(rows.len() as u64)
    }

    async fn delete_notification(&self, id: Uuid, user_id: Uuid) -> RemoteResult<u64> {
        let request = self.http.delete(self.table_url("notifications")).query(&[
            ("select", "id".to_string()),
            ("id", eq(id)),
            ("user_id", eq(user_id)),
        ]);
        let rows: Vec<Value> = self.send(self.returning(request)).await?;
        Ok(rows.len() as u64)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> RemoteResult<u64> {
        let request = self.http.head(self.table_url("notifications")).query(&[
            ("select", "*".to_string()),
            ("user_id", eq(user_id)),
            ("is_read", eq(false)),
        ]);
        self.send_count(request).await
    }
}

impl ObjectStorage for RestDataService {
    async fn upload(&self, path: &str, body: Bytes, content_type: &str) -> RemoteResult<String> {
        let size = body.len();
        let request = self
            .http
            .post(self.object_url(path))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(body);
        self.send_raw(request).await?;
        debug!(path, size, "Attachment uploaded");
        Ok(self.public_url(path))
    }
}
