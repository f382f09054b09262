//! Workspace and workspace membership types.

use chrono::{DateTime, Utc};

use super::{Role, UserId, WorkspaceId};

/// Workspace record (tenant boundary)
#[derive(Clone, Debug)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub slug: String, // Unique across all workspaces
    pub owner_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a workspace.
/// The owner's OWNER membership is created in the same transaction.
#[derive(Clone, Debug)]
pub struct CreateWorkspaceParams {
    pub name: String,
    pub slug: String,
    pub owner_user_id: UserId,
}

/// Life cycle of a membership row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipStatus {
    Active,
    Deactivated { at: DateTime<Utc> },
}

impl MembershipStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MembershipStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Deactivated { .. } => "deactivated",
        }
    }
}

/// Workspace membership: (workspace, user) -> role
#[derive(Clone, Debug)]
pub struct WorkspaceMembership {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceMembership {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
