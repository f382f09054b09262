//! Project and project membership types.

use chrono::{DateTime, Utc};

use super::{GroupingId, ProjectId, Role, UserId, WorkspaceId};

/// Project record
#[derive(Clone, Debug)]
pub struct Project {
    pub id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub grouping_id: Option<GroupingId>, // None for legacy projects
    pub name: String,
    pub creator_id: Option<UserId>,
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creator and owner always retain control over the project.
    pub fn is_controlled_by(&self, user_id: &UserId) -> bool {
        self.creator_id.as_ref() == Some(user_id) || self.owner_id.as_ref() == Some(user_id)
    }
}

/// Parameters for creating a project
#[derive(Clone, Debug)]
pub struct CreateProjectParams {
    pub workspace_id: WorkspaceId,
    pub grouping_id: Option<GroupingId>,
    pub name: String,
    pub creator_id: Option<UserId>,
    pub owner_id: Option<UserId>,
}

/// Project membership: (project, user) -> role
#[derive(Clone, Debug)]
pub struct ProjectMembership {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
