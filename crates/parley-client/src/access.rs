//! Channel access decisions.
//!
//! Whether the signed-in user may read or write a channel is a pure
//! function of the channel list and the user's memberships.  Decisions are
//! memoized per channel for a bounded time, and the whole cache is dropped
//! whenever the channel list is replaced.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use parley_store::{Channel, ChannelMember, MemberRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelAccess {
    pub can_read: bool,
    pub can_write: bool,
}

impl ChannelAccess {
    pub const NONE: Self = Self { can_read: false, can_write: false };
}

/// A channel together with the signed-in user's role in it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub role: Option<MemberRole>,
}

impl ChannelSnapshot {
    /// Join channels with the user's membership rows.
    pub fn join(channels: Vec<Channel>, memberships: &[ChannelMember]) -> Vec<Self> {
        let roles: HashMap<Uuid, MemberRole> =
            memberships.iter().map(|m| (m.channel_id, m.role)).collect();
        channels
            .into_iter()
            .map(|channel| {
                let role = roles.get(&channel.id).copied();
                Self { channel, role }
            })
            .collect()
    }
}

/// The access policy.  Public channels are readable by anyone and writable
/// by members; private channels are members-only.  An unknown channel gets
/// no access.
pub fn decide(snapshot: Option<&ChannelSnapshot>) -> ChannelAccess {
    let Some(snapshot) = snapshot else {
        return ChannelAccess::NONE;
    };
    let is_member = snapshot.role.is_some();
    if snapshot.channel.is_private {
        ChannelAccess { can_read: is_member, can_write: is_member }
    } else {
        ChannelAccess { can_read: true, can_write: is_member }
    }
}

#[derive(Default)]
struct GateState {
    channels: HashMap<Uuid, ChannelSnapshot>,
    cache: HashMap<Uuid, (ChannelAccess, Instant)>,
}

/// Memoizing access gate, safe to share between tasks.
pub struct AccessGate {
    ttl: Duration,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn get_access(&self, channel_id: Uuid) -> ChannelAccess {
        let mut state = self.lock();
        let now = Instant::now();
        if let Some((access, at)) = state.cache.get(&channel_id) {
            if now.duration_since(*at) < self.ttl {
                return *access;
            }
        }
        let access = decide(state.channels.get(&channel_id));
        state.cache.insert(channel_id, (access, now));
        access
    }

    /// Replace the channel list and drop every cached decision.
    pub fn set_channels(&self, snapshots: Vec<ChannelSnapshot>) {
        let mut state = self.lock();
        state.channels = snapshots
            .into_iter()
            .map(|s| (s.channel.id, s))
            .collect();
        state.cache.clear();
        debug!(channels = state.channels.len(), "Channel list replaced");
    }

    /// Drop every cached decision.
    pub fn invalidate(&self) {
        self.lock().cache.clear();
    }

    /// Forget all channels, e.g. on sign-out.
    pub fn clear(&self) {
        self.set_channels(Vec::new());
    }

    pub fn role(&self, channel_id: Uuid) -> Option<MemberRole> {
        self.lock().channels.get(&channel_id).and_then(|s| s.role)
    }

    pub fn is_admin(&self, channel_id: Uuid) -> bool {
        self.role(channel_id) == Some(MemberRole::Admin)
    }

    pub fn channel(&self, channel_id: Uuid) -> Option<Channel> {
        self.lock()
            .channels
            .get(&channel_id)
            .map(|s| s.channel.clone())
    }

    pub fn channels(&self) -> Vec<ChannelSnapshot> {
        let mut list: Vec<_> = self.lock().channels.values().cloned().collect();
        list.sort_by(|a, b| a.channel.name.cmp(&b.channel.name));
        list
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn channel(is_private: bool) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            name: "general".into(),
            description: None,
            is_private,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn snapshot(is_private: bool, role: Option<MemberRole>) -> ChannelSnapshot {
        ChannelSnapshot { channel: channel(is_private), role }
    }

    #[test]
    fn test_policy_table() {
        let public_guest = decide(Some(&snapshot(false, None)));
        assert_eq!(public_guest, ChannelAccess { can_read: true, can_write: false });

        let public_member = decide(Some(&snapshot(false, Some(MemberRole::Member))));
        assert_eq!(public_member, ChannelAccess { can_read: true, can_write: true });

        let private_guest = decide(Some(&snapshot(true, None)));
        assert_eq!(private_guest, ChannelAccess::NONE);

        let private_admin = decide(Some(&snapshot(true, Some(MemberRole::Admin))));
        assert_eq!(private_admin, ChannelAccess { can_read: true, can_write: true });

        assert_eq!(decide(None), ChannelAccess::NONE);
    }

    #[test]
    fn test_join_assigns_roles() {
        let a = channel(true);
        let b = channel(false);
        let membership = ChannelMember {
            channel_id: a.id,
            user_id: Uuid::new_v4(),
            role: MemberRole::Admin,
            created_at: Utc::now(),
            last_read: None,
        };
        let joined = ChannelSnapshot::join(vec![a.clone(), b.clone()], &[membership]);
        assert_eq!(joined[0].role, Some(MemberRole::Admin));
        assert_eq!(joined[1].role, None);
    }

    #[test]
    fn test_set_channels_invalidates() {
        let gate = AccessGate::new(Duration::from_secs(30));
        let snap = snapshot(true, None);
        let id = snap.channel.id;
        gate.set_channels(vec![snap.clone()]);
        assert!(!gate.get_access(id).can_read);

        // Joining the channel arrives as a new channel list.
        gate.set_channels(vec![ChannelSnapshot { role: Some(MemberRole::Member), ..snap }]);
        assert!(gate.get_access(id).can_write);
        assert!(!gate.is_admin(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decisions_expire_after_ttl() {
        let gate = AccessGate::new(Duration::from_secs(30));
        let snap = snapshot(true, None);
        let id = snap.channel.id;
        gate.set_channels(vec![snap]);
        assert!(!gate.get_access(id).can_read);

        // Change the underlying snapshot without going through set_channels.
        gate.lock().channels.get_mut(&id).unwrap().role = Some(MemberRole::Member);
        assert!(!gate.get_access(id).can_read, "served from cache");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!gate.get_access(id).can_read, "still fresh");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(gate.get_access(id).can_read, "recomputed after expiry");
    }

    #[test]
    fn test_unknown_channel_has_no_access() {
        let gate = AccessGate::new(Duration::from_secs(30));
        assert_eq!(gate.get_access(Uuid::new_v4()), ChannelAccess::NONE);
        assert_eq!(gate.role(Uuid::new_v4()), None);
    }
}
