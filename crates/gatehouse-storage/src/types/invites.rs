//! Workspace invite types.

use chrono::{DateTime, Utc};

use super::{InviteId, Role, UserId, WorkspaceId, WorkspaceMembership};

/// Stored life cycle of an invite. Accepted and revoked are terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InviteState {
    Pending,
    Accepted { at: DateTime<Utc>, by: UserId },
    Revoked { at: DateTime<Utc> },
}

impl InviteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteState::Pending => "pending",
            InviteState::Accepted { .. } => "accepted",
            InviteState::Revoked { .. } => "revoked",
        }
    }
}

/// Status as observed at a point in time; `Expired` is derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Revoked => "revoked",
            InviteStatus::Expired => "expired",
        }
    }
}

/// Invite record
#[derive(Clone, Debug)]
pub struct Invite {
    pub id: InviteId,
    pub workspace_id: WorkspaceId,
    pub email: String, // Lowercased
    pub role: Role,    // Never Owner
    pub token: String,
    pub state: InviteState,
    pub created_by_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    pub fn status_at(&self, now: DateTime<Utc>) -> InviteStatus {
        match self.state {
            InviteState::Accepted { .. } => InviteStatus::Accepted,
            InviteState::Revoked { .. } => InviteStatus::Revoked,
            InviteState::Pending if now >= self.expires_at => InviteStatus::Expired,
            InviteState::Pending => InviteStatus::Pending,
        }
    }
}

/// Parameters for creating an invite
#[derive(Clone, Debug)]
pub struct CreateInviteParams {
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub role: Role,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_by_user_id: UserId,
}

/// Parameters for the atomic accept transition
#[derive(Clone, Debug)]
pub struct AcceptInviteParams {
    pub invite_id: InviteId,
    pub user_id: UserId,
    pub now: DateTime<Utc>,
}

/// Outcome of an accepted invite
#[derive(Clone, Debug)]
pub struct AcceptedInvite {
    pub invite: Invite,
    pub membership: WorkspaceMembership,
    /// Membership as it was before acceptance (None if newly created)
    pub previous: Option<WorkspaceMembership>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invite(state: InviteState, expires_at: DateTime<Utc>) -> Invite {
        Invite {
            id: InviteId::new(),
            workspace_id: WorkspaceId::new(),
            email: "new@example.com".to_string(),
            role: Role::Member,
            token: "t".to_string(),
            state,
            created_by_user_id: UserId::new(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_pending_invite_expires_at_boundary() {
        let now = Utc::now();
        let inv = invite(InviteState::Pending, now);
        assert_eq!(inv.status_at(now - Duration::seconds(1)), InviteStatus::Pending);
        assert_eq!(inv.status_at(now), InviteStatus::Expired);
    }

    #[test]
    fn test_terminal_states_win_over_expiry() {
        let now = Utc::now();
        let past = now - Duration::days(1);
        let accepted = invite(
            InviteState::Accepted {
                at: past,
                by: UserId::new(),
            },
            past,
        );
        assert_eq!(accepted.status_at(now), InviteStatus::Accepted);

        let revoked = invite(InviteState::Revoked { at: past }, past);
        assert_eq!(revoked.status_at(now), InviteStatus::Revoked);
    }
}
