//! Message operations for one mounted channel view.
//!
//! Each [`MessageOperations`] is bound to the channel it was mounted for and
//! carries a [`Liveness`] flag.  Once the user navigates away the flag is
//! revoked, and responses that arrive afterwards no longer insert records
//! into the shared store.  Edits and deletes still settle, since they
//! describe the server's state of a record the store already holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::attachment::object_name;
use parley_shared::check_attachment;
use parley_shared::constants::ATTACHMENT_FALLBACK_CAPTION;
use parley_store::{validate_message, Message};

use crate::access::ChannelAccess;
use crate::auth::CurrentUser;
use crate::backend::{DataService, MessageEdit, NewMessage, ObjectStorage};
use crate::error::{ClientError, Result};
use crate::state::ClientContext;

/// Whether the view that started an operation is still mounted.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows returned by the backend.
    pub total: usize,
    /// Ids that were new to the store.
    pub added: usize,
    /// Rows that failed validation.
    pub rejected: usize,
    /// The view went away before the response arrived; nothing was stored.
    pub discarded: bool,
}

/// An image picked for upload.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

pub struct MessageOperations<B> {
    ctx: ClientContext<B>,
    channel_id: Uuid,
    liveness: Liveness,
}

impl<B: DataService> MessageOperations<B> {
    pub(crate) fn new(ctx: ClientContext<B>, channel_id: Uuid, liveness: Liveness) -> Self {
        Self { ctx, channel_id, liveness }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn access(&self) -> ChannelAccess {
        self.ctx.gate.get_access(self.channel_id)
    }

    /// Root messages of the channel in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.ctx.store.channel_messages(self.channel_id)
    }

    /// Replies to `parent_id` in display order.
    pub fn thread(&self, parent_id: Uuid) -> Vec<Message> {
        self.ctx.store.thread_messages(parent_id)
    }

    /// Replace the channel's messages with the backend's list.
    ///
    /// Rows that fail validation are skipped and counted; the rest are
    /// stored in one batch.  A channel the user cannot read is refused
    /// before any request is made.
    pub async fn load_messages(&self) -> Result<LoadReport> {
        if !self.access().can_read {
            return Err(self
                .ctx
                .reject("You do not have permission to view this channel"));
        }

        let store = &self.ctx.store;
        store.set_loading(true);
        let fetched = self.ctx.backend.fetch_messages(self.channel_id).await;
        store.set_loading(false);

        let rows = fetched.map_err(|e| self.failure("Failed to load messages", e))?;
        let total = rows.len();

        if !self.is_live() {
            debug!(channel_id = %self.channel_id, total, "View gone, discarding loaded messages");
            return Ok(LoadReport { total, added: 0, rejected: 0, discarded: true });
        }

        let mut valid = Vec::with_capacity(total);
        let mut rejected = 0;
        for row in &rows {
            match validate_message(row) {
                Ok(message) if message.channel_id == self.channel_id => valid.push(message),
                Ok(message) => {
                    rejected += 1;
                    warn!(channel_id = %self.channel_id, id = %message.id, "Loaded message belongs to another channel");
                }
                Err(e) => {
                    rejected += 1;
                    warn!(channel_id = %self.channel_id, error = %e, "Rejected malformed message");
                }
            }
        }

        store.clear_channel(self.channel_id);
        let added = store.add_messages(valid);
        info!(channel_id = %self.channel_id, total, added, rejected, "Messages loaded");

        Ok(LoadReport { total, added, rejected, discarded: false })
    }

    /// Post a message, or a reply when `parent_message_id` is set.
    pub async fn send_message(&self, content: &str, parent_message_id: Option<Uuid>) -> Result<Message> {
        let user = self.writer()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }
        self.check_parent(parent_message_id)?;

        self.insert(NewMessage {
            channel_id: self.channel_id,
            user_id: user.id,
            content: content.to_string(),
            file_url: None,
            attachment_path: None,
            parent_message_id,
        })
        .await
    }

    /// Edit one of the user's own messages.
    ///
    /// The local copy changes immediately and is reverted if the backend
    /// refuses or fails.
    pub async fn update_message(&self, id: Uuid, content: &str) -> Result<Message> {
        let user = self.ctx.require_user("edit messages")?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }

        let edit = MessageEdit {
            content: content.to_string(),
            edited_at: Utc::now(),
            edited_by: user.id,
        };

        let owned = self.ctx.store.get(id).is_some_and(|m| m.user_id == user.id);
        let pending = if owned {
            self.ctx.store.begin_edit(id, |draft| {
                draft.content = edit.content.clone();
                draft.edited_at = Some(edit.edited_at);
                draft.edited_by = Some(edit.edited_by);
            })
        } else {
            None
        };

        let outcome = match self.ctx.backend.update_message(id, user.id, &edit).await {
            Ok(Some(row)) => validate_message(&row).map(Some).map_err(ClientError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(Some(confirmed)) => {
                match pending {
                    Some(tx) => tx.commit(confirmed.clone()),
                    None if self.is_live() => {
                        self.ctx.store.add_message(confirmed.clone());
                    }
                    None => {}
                }
                info!(%id, "Message updated");
                Ok(confirmed)
            }
            Ok(None) => {
                if let Some(tx) = pending {
                    tx.rollback();
                }
                Err(self.ctx.reject("You can only edit your own messages"))
            }
            Err(e) => {
                if let Some(tx) = pending {
                    tx.rollback();
                }
                Err(self.failure("Failed to update message", e))
            }
        }
    }

    /// Delete one of the user's own messages.
    pub async fn delete_message(&self, id: Uuid) -> Result<()> {
        let user = self.ctx.require_user("delete messages")?;
        match self.ctx.backend.delete_message(id, user.id).await {
            Ok(0) => Err(self.ctx.reject("You can only delete your own messages")),
            Ok(_) => {
                self.ctx.store.delete_message(id);
                info!(%id, "Message deleted");
                Ok(())
            }
            Err(e) => Err(self.failure("Failed to delete message", e)),
        }
    }

    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let row = self
            .ctx
            .backend
            .insert_message(&message)
            .await
            .map_err(|e| self.failure("Failed to send message", e))?;
        let stored = validate_message(&row).map_err(|e| self.failure("Failed to send message", e))?;

        if self.is_live() {
            self.ctx.store.add_message(stored.clone());
        } else {
            debug!(id = %stored.id, "View gone, not storing sent message");
        }
        Ok(stored)
    }

    /// Signed in and allowed to post here.
    fn writer(&self) -> Result<CurrentUser> {
        let user = self.ctx.require_user("send messages")?;
        if !self.access().can_write {
            return Err(self
                .ctx
                .reject("You do not have permission to post in this channel"));
        }
        Ok(user)
    }

    // Replies hang off root messages of the same channel.
    fn check_parent(&self, parent_id: Option<Uuid>) -> Result<()> {
        let Some(parent) = parent_id.and_then(|id| self.ctx.store.get(id)) else {
            return Ok(());
        };
        if parent.channel_id != self.channel_id || !parent.is_root() {
            return Err(ClientError::InvalidInput(
                "replies must target a root message in this channel".into(),
            ));
        }
        Ok(())
    }

    // A view that is gone no longer owns the store's error field.
    fn failure(&self, context: &str, err: impl Into<ClientError>) -> ClientError {
        if self.is_live() {
            self.ctx.remote_failure(context, err)
        } else {
            self.ctx.notify_failure(context, err)
        }
    }
}

impl<B: DataService + ObjectStorage> MessageOperations<B> {
    /// Upload an image and post it with `caption`.
    ///
    /// The file is checked before anything is sent; an empty caption is
    /// replaced with a generic one.
    pub async fn send_attachment(
        &self,
        attachment: Attachment,
        caption: &str,
        parent_message_id: Option<Uuid>,
    ) -> Result<Message> {
        let user = self.writer()?;
        if let Err(e) = check_attachment(&attachment.content_type, attachment.data.len()) {
            self.ctx.notices.error(e.to_string());
            return Err(e.into());
        }
        self.check_parent(parent_message_id)?;

        let path = object_name(&attachment.file_name, Utc::now().timestamp_millis());
        let url = self
            .ctx
            .backend
            .upload(&path, attachment.data, &attachment.content_type)
            .await
            .map_err(|e| self.failure("Failed to upload image", e))?;

        let caption = caption.trim();
        let content = if caption.is_empty() { ATTACHMENT_FALLBACK_CAPTION } else { caption };

        self.insert(NewMessage {
            channel_id: self.channel_id,
            user_id: user.id,
            content: content.to_string(),
            file_url: Some(url),
            attachment_path: Some(path),
            parent_message_id,
        })
        .await
    }
}
