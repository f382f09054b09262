//! Workspace invite life cycle: issue, accept, revoke, list.
//!
//! Expiry is never stored; an invite is expired when it is still pending and
//! `now >= expires_at`.

use chrono::Utc;
use gatehouse_audit::{entity, AuditAction, AuditEntry};
use gatehouse_storage::{
    normalize_email, AcceptInviteParams, CreateInviteParams, Invite, InviteId, InviteStatus, Role,
    StoreError, UserId, WorkspaceId, WorkspaceMembership,
};
use rand_core::{OsRng, RngCore};
use serde_json::json;

use crate::access::Scope;
use crate::engine::AccessEngine;
use crate::error::{AccessError, Result};
use crate::snapshot;

/// Roles allowed to issue and revoke invites.
const INVITE_MANAGERS: &[Role] = &[Role::Owner, Role::Admin];

/// An invite together with its status at the time it was read.
#[derive(Clone, Debug)]
pub struct InviteView {
    pub invite: Invite,
    pub status: InviteStatus,
}

/// 256 bits from the OS RNG, hex encoded (64 URL-safe chars).
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(AccessError::InvalidArgument(format!(
            "invalid email address: {email:?}"
        )));
    }
    Ok(email)
}

impl AccessEngine {
    /// Issue an invite (workspace OWNER or ADMIN).
    ///
    /// OWNER is never granted through an invite. Several pending invites for
    /// the same email may coexist.
    pub async fn issue_invite(
        &self,
        issuer: &UserId,
        workspace_id: &WorkspaceId,
        email: &str,
        role: Role,
    ) -> Result<Invite> {
        if role == Role::Owner {
            return Err(AccessError::Conflict(
                "invites cannot grant the owner role".to_string(),
            ));
        }
        self.assert_access(issuer, workspace_id, &Scope::Workspace, INVITE_MANAGERS)
            .await?;
        let email = validate_email(email)?;
        let expires_at = Utc::now()
            .checked_add_signed(self.config.invite_ttl)
            .ok_or_else(|| AccessError::Internal("invite TTL out of range".to_string()))?;

        let invite = self
            .store
            .create_invite(&CreateInviteParams {
                workspace_id: workspace_id.clone(),
                email,
                role,
                token: generate_token(),
                expires_at,
                created_by_user_id: issuer.clone(),
            })
            .await
            .map_err(AccessError::lookup("workspace"))?;

        tracing::debug!(
            invite_id = %invite.id,
            workspace_id = %workspace_id,
            role = %role,
            "invite issued"
        );
        self.record(
            AuditEntry::builder(workspace_id, issuer, AuditAction::Create)
                .entity(entity::INVITE, &invite.id)
                .new_value(snapshot::invite(&invite))
                .build(),
        );
        Ok(invite)
    }

    /// Accept an invite as `user_id`, whose email must match the invite's.
    ///
    /// The invite transition and the membership upsert commit together. An
    /// existing higher role is kept and a deactivated membership is reactivated.
    pub async fn accept_invite(
        &self,
        token: &str,
        user_id: &UserId,
    ) -> Result<WorkspaceMembership> {
        let invite = self
            .store
            .get_invite_by_token(token)
            .await
            .map_err(AccessError::lookup("invite"))?;
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(AccessError::lookup("user"))?;
        if normalize_email(&user.email) != invite.email {
            return Err(AccessError::Forbidden(
                "invite was issued to a different email address".to_string(),
            ));
        }

        let now = Utc::now();
        match invite.status_at(now) {
            InviteStatus::Pending => {}
            InviteStatus::Expired => return Err(AccessError::Expired),
            status => {
                return Err(AccessError::Conflict(format!(
                    "invite is {}",
                    status.as_str()
                )))
            }
        }

        let accepted = self
            .store
            .accept_invite(&AcceptInviteParams {
                invite_id: invite.id.clone(),
                user_id: user_id.clone(),
                now,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict => {
                    AccessError::Conflict("invite is no longer pending".to_string())
                }
                other => AccessError::lookup("invite")(other),
            })?;

        let action = if accepted.previous.is_some() {
            AuditAction::Update
        } else {
            AuditAction::Create
        };
        let mut entry = AuditEntry::builder(&invite.workspace_id, user_id, action)
            .entity(entity::WORKSPACE_MEMBERSHIP, user_id)
            .new_value(snapshot::membership(&accepted.membership))
            .metadata(json!({ "invite_id": invite.id.to_string() }));
        if let Some(previous) = &accepted.previous {
            entry = entry.old_value(snapshot::membership(previous));
        }
        self.record(entry.build());

        tracing::debug!(
            invite_id = %invite.id,
            user_id = %user_id,
            role = %accepted.membership.role,
            "invite accepted"
        );
        Ok(accepted.membership)
    }

    /// Revoke a pending invite (OWNER or ADMIN of the invite's workspace).
    /// Accepted, revoked and expired invites are final.
    pub async fn revoke_invite(&self, issuer: &UserId, invite_id: &InviteId) -> Result<Invite> {
        let invite = self
            .store
            .get_invite(invite_id)
            .await
            .map_err(AccessError::lookup("invite"))?;
        self.assert_access(
            issuer,
            &invite.workspace_id,
            &Scope::Workspace,
            INVITE_MANAGERS,
        )
        .await?;
        let now = Utc::now();
        match invite.status_at(now) {
            InviteStatus::Pending => {}
            InviteStatus::Expired => return Err(AccessError::Expired),
            status => {
                return Err(AccessError::Conflict(format!(
                    "invite is {}",
                    status.as_str()
                )))
            }
        }

        let revoked = self
            .store
            .revoke_invite(invite_id, now)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => {
                    AccessError::Conflict("invite is no longer pending".to_string())
                }
                other => AccessError::lookup("invite")(other),
            })?;
        self.record(
            AuditEntry::builder(&invite.workspace_id, issuer, AuditAction::Update)
                .entity(entity::INVITE, invite_id)
                .old_value(snapshot::invite(&invite))
                .new_value(snapshot::invite(&revoked))
                .build(),
        );
        Ok(revoked)
    }

    /// Pending, unexpired invites of a workspace, newest first.
    pub async fn list_active_invites(&self, workspace_id: &WorkspaceId) -> Result<Vec<Invite>> {
        Ok(self
            .store
            .list_active_invites(workspace_id, Utc::now())
            .await?)
    }

    /// Look up an invite by token, e.g. to preview it before accepting.
    pub async fn get_invite_by_token(&self, token: &str) -> Result<InviteView> {
        let invite = self
            .store
            .get_invite_by_token(token)
            .await
            .map_err(AccessError::lookup("invite"))?;
        let status = invite.status_at(Utc::now());
        Ok(InviteView { invite, status })
    }
}
