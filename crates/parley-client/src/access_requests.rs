//! Requests to join private channels.
//!
//! Users ask; channel admins approve or deny.  A request is settled once:
//! the status transition is guarded on the request still being pending and
//! unchanged since it was read, so two admins acting at once cannot both
//! win.

use tracing::info;
use uuid::Uuid;

use parley_store::{AccessRequest, AccessRequestStatus, MemberRole};

use crate::backend::{AccessRequestFilter, DataService};
use crate::error::{ClientError, Result};
use crate::state::ClientContext;

pub struct AccessRequests<B> {
    ctx: ClientContext<B>,
}

impl<B: DataService> AccessRequests<B> {
    pub(crate) fn new(ctx: ClientContext<B>) -> Self {
        Self { ctx }
    }

    /// Ask to join `channel_id`.
    pub async fn request_access(&self, channel_id: Uuid) -> Result<AccessRequest> {
        let user = self.ctx.require_user("request access")?;
        if self.ctx.gate.role(channel_id).is_some() {
            return Err(ClientError::InvalidInput("already a member of this channel".into()));
        }

        let filter = AccessRequestFilter {
            channel_id: Some(channel_id),
            user_id: Some(user.id),
            status: Some(AccessRequestStatus::Pending),
        };
        let existing = self
            .ctx
            .backend
            .fetch_access_requests(&filter)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to request access", e))?;
        if !existing.is_empty() {
            self.ctx.notices.info("Your access request is already pending");
            return Err(ClientError::InvalidInput("an access request is already pending".into()));
        }

        let request = self
            .ctx
            .backend
            .insert_access_request(channel_id, user.id)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to request access", e))?;
        info!(%channel_id, request_id = %request.id, "Access requested");
        self.ctx.notices.success("Access request sent");
        Ok(request)
    }

    /// Pending requests for a channel.  Admins only.
    pub async fn pending_requests(&self, channel_id: Uuid) -> Result<Vec<AccessRequest>> {
        self.ctx.require_user("review access requests")?;
        if !self.ctx.gate.is_admin(channel_id) {
            return Err(self.ctx.reject("Only channel admins can review access requests"));
        }
        let filter = AccessRequestFilter {
            channel_id: Some(channel_id),
            status: Some(AccessRequestStatus::Pending),
            ..AccessRequestFilter::default()
        };
        self.ctx
            .backend
            .fetch_access_requests(&filter)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to load access requests", e))
    }

    /// Approve or deny a pending request.  Approval adds the requester as a
    /// member.
    pub async fn resolve(&self, request_id: Uuid, approve: bool) -> Result<AccessRequest> {
        self.ctx.require_user("review access requests")?;

        let current = self
            .ctx
            .backend
            .fetch_access_request(request_id)
            .await
            .map_err(|e| self.ctx.remote_failure("Failed to process access request", e))?
            .ok_or_else(|| ClientError::InvalidInput("access request not found".into()))?;

        if !self.ctx.gate.is_admin(current.channel_id) {
            return Err(self.ctx.reject("Only channel admins can review access requests"));
        }
        if current.status != AccessRequestStatus::Pending {
            return Err(self.ctx.conflict("This request has already been processed"));
        }

        let status = if approve {
            AccessRequestStatus::Approved
        } else {
            AccessRequestStatus::Denied
        };
        let updated = match self
            .ctx
            .backend
            .transition_access_request(request_id, current.updated_at, status)
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                return Err(self.ctx.conflict("This request was modified by another admin"));
            }
            Err(e) if e.is_check_violation() => {
                return Err(self.ctx.conflict("This request has already been processed"));
            }
            Err(e) => return Err(self.ctx.remote_failure("Failed to process access request", e)),
        };

        if approve {
            self.ctx
                .backend
                .insert_member(updated.channel_id, updated.user_id, MemberRole::Member)
                .await
                .map_err(|e| self.ctx.remote_failure("Failed to add member", e))?;
            self.ctx.gate.invalidate();
        }

        info!(%request_id, status = status.as_str(), "Access request resolved");
        self.ctx.notices.success(if approve {
            "Access request approved"
        } else {
            "Access request denied"
        });
        Ok(updated)
    }
}
