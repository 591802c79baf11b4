//! Emoji reactions on messages.
//!
//! Reactions are fetched per message on demand and kept in a small local
//! cache so toggling can decide between adding and removing without a
//! round trip.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use parley_store::Reaction;

use crate::backend::DataService;
use crate::error::{ClientError, Result};
use crate::state::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionToggle {
    Added,
    Removed,
}

pub struct Reactions<B> {
    ctx: ClientContext<B>,
    cache: Mutex<HashMap<Uuid, Vec<Reaction>>>,
}

impl<B: DataService> Reactions<B> {
    pub(crate) fn new(ctx: ClientContext<B>) -> Self {
        Self {
            ctx,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the reactions of one message, replacing any cached copy.
    pub async fn load(&self, message_id: Uuid) -> Result<Vec<Reaction>> {
        let reactions = self
            .ctx
            .backend
            .fetch_reactions(message_id)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to load reactions", e))?;
        self.lock().insert(message_id, reactions.clone());
        Ok(reactions)
    }

    /// Add the user's `emoji` to a message, or take it back if present.
    pub async fn toggle_reaction(&self, message_id: Uuid, emoji: &str) -> Result<ReactionToggle> {
        let user = self.ctx.require_user("react to messages")?;
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ClientError::InvalidInput("emoji is empty".into()));
        }

        let cached = self.lock().get(&message_id).cloned();
        let current = match cached {
            Some(list) => list,
            None => self.load(message_id).await?,
        };
        let mine = current
            .iter()
            .any(|r| r.user_id == user.id && r.emoji == emoji);

        if mine {
            self.ctx
                .backend
                .delete_reaction(message_id, user.id, emoji)
                .await
                .map_err(|e| self.ctx.remote_failure("Failed to remove reaction", e))?;
            if let Some(list) = self.lock().get_mut(&message_id) {
                list.retain(|r| !(r.user_id == user.id && r.emoji == emoji));
            }
            debug!(%message_id, emoji, "Reaction removed");
            Ok(ReactionToggle::Removed)
        } else {
            let reaction = self
                .ctx
                .backend
                .insert_reaction(message_id, user.id, emoji)
                .await
                .map_err(|e| self.ctx.remote_failure("Failed to add reaction", e))?;
            self.lock().entry(message_id).or_default().push(reaction);
            debug!(%message_id, emoji, "Reaction added");
            Ok(ReactionToggle::Added)
        }
    }

    /// Cached reaction counts per emoji.
    pub fn reaction_counts(&self, message_id: Uuid) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        if let Some(list) = self.lock().get(&message_id) {
            for r in list {
                *counts.entry(r.emoji.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Reaction>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
