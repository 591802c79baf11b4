//! Domain model structs mirrored from the backend's tables.
//!
//! Field names follow the backend's column names so rows decode directly
//! with `serde_json`.  Every struct derives `Serialize` and `Deserialize` so
//! it can be persisted in session storage or handed to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Author summary embedded in every message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    /// Display name.
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, either a root message or a thread reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: Uuid,
    /// The channel this message belongs to.
    pub channel_id: Uuid,
    /// Author of the message.
    pub user_id: Uuid,
    pub content: String,
    /// Public URL of an uploaded attachment.
    pub file_url: Option<String>,
    /// Object storage path of the attachment, when known.
    pub attachment_path: Option<String>,
    /// Creation time as recorded by the backend.
    pub created_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edited_by: Option<Uuid>,
    /// Root message this reply belongs to; `None` for root messages.
    pub parent_message_id: Option<Uuid>,
    /// Embedded author summary.
    pub user: UserSummary,
}

impl Message {
    /// A root message is listed at channel level; anything else is a reply.
    pub fn is_root(&self) -> bool {
        self.parent_message_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Private channels are readable by members only.
    pub is_private: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMember {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
    pub last_read: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Access request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Denied,
    Archived,
}

impl AccessRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Archived => "archived",
        }
    }
}

/// A user's request to join a private channel.  The backend owns the
/// lifecycle; `updated_at` doubles as the optimistic-lock version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRequest {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub status: AccessRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reply,
    Reaction,
    ChannelInvite,
    /// Any type this client does not know yet.
    #[serde(other)]
    Other,
}

/// A persisted notification addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    /// Recipient.
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub content: Option<String>,
    /// Free-form payload, e.g. the message or channel it points at.
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
