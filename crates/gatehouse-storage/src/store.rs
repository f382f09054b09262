//! The Store trait that backends implement.

use chrono::{DateTime, Utc};

use crate::types::*;
use crate::StoreError;

/// The storage trait the access engine depends on.
///
/// Every write that must be atomic (workspace creation with its owner
/// membership, invite acceptance with its membership upsert) is a single
/// method so backends can wrap it in one transaction.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────────── Users ──────────────────────────────────────────

    /// Create a user (email is stored lowercase; duplicates are AlreadyExists).
    async fn create_user(&self, email: &str) -> Result<User, StoreError>;

    /// Get user by ID.
    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError>;

    /// Get user by email (case-insensitive).
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Fetch the given users; unknown IDs are skipped.
    async fn list_users(&self, user_ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    // ───────────────────────────────────── Workspaces ─────────────────────────────────────

    /// Create a workspace and its owner's OWNER membership atomically.
    async fn create_workspace(
        &self,
        params: &CreateWorkspaceParams,
    ) -> Result<Workspace, StoreError>;

    /// Get workspace by ID.
    async fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Workspace, StoreError>;

    /// Get workspace by its unique slug.
    async fn get_workspace_by_slug(&self, slug: &str) -> Result<Workspace, StoreError>;

    // ───────────────────────────────── Workspace memberships ──────────────────────────────

    /// Get the membership row for (workspace, user), active or not.
    async fn get_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<WorkspaceMembership, StoreError>;

    /// List every membership row of a workspace.
    async fn list_workspace_memberships(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMembership>, StoreError>;

    /// Insert a new active membership (AlreadyExists if the pair exists).
    async fn add_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> Result<WorkspaceMembership, StoreError>;

    /// Change the role of an existing membership.
    async fn update_workspace_membership_role(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> Result<WorkspaceMembership, StoreError>;

    /// Activate or deactivate an existing membership.
    async fn set_workspace_membership_status(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: MembershipStatus,
    ) -> Result<WorkspaceMembership, StoreError>;

    /// Remove a membership row, along with the user's project memberships
    /// and grouping memberships inside the workspace.
    async fn remove_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Projects ───────────────────────────────────────

    /// Create a project within a workspace.
    async fn create_project(&self, params: &CreateProjectParams) -> Result<Project, StoreError>;

    /// Get a project by ID.
    async fn get_project(&self, project_id: &ProjectId) -> Result<Project, StoreError>;

    /// List all projects in a workspace.
    async fn list_projects(&self, workspace_id: &WorkspaceId) -> Result<Vec<Project>, StoreError>;

    /// Move a project into a grouping (or out of any grouping with None).
    async fn set_project_grouping(
        &self,
        project_id: &ProjectId,
        grouping_id: Option<GroupingId>,
    ) -> Result<Project, StoreError>;

    // ───────────────────────────────── Project memberships ────────────────────────────────

    /// Get the membership row for (project, user).
    async fn get_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<ProjectMembership, StoreError>;

    /// List all memberships of a project.
    async fn list_project_memberships(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ProjectMembership>, StoreError>;

    /// Insert or update the role for (project, user).
    async fn set_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        role: Role,
    ) -> Result<ProjectMembership, StoreError>;

    /// Remove the membership row for (project, user).
    async fn remove_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Groupings ──────────────────────────────────────

    /// Create a grouping. A duplicate (workspace, name) is AlreadyExists.
    async fn create_grouping(
        &self,
        params: &CreateGroupingParams,
    ) -> Result<ProjectGrouping, StoreError>;

    /// Get a grouping by ID.
    async fn get_grouping(&self, grouping_id: &GroupingId) -> Result<ProjectGrouping, StoreError>;

    /// Get a grouping by name within a workspace.
    async fn get_grouping_by_name(
        &self,
        workspace_id: &WorkspaceId,
        name: &str,
    ) -> Result<ProjectGrouping, StoreError>;

    /// List all groupings in a workspace (oldest first).
    async fn list_groupings(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<ProjectGrouping>, StoreError>;

    /// Change a grouping's visibility.
    async fn set_grouping_visibility(
        &self,
        grouping_id: &GroupingId,
        visibility: Visibility,
    ) -> Result<ProjectGrouping, StoreError>;

    /// Add a user to a grouping (AlreadyExists if present).
    async fn add_grouping_member(
        &self,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<GroupingMember, StoreError>;

    /// Remove a user from a grouping.
    async fn remove_grouping_member(
        &self,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    /// List members of a grouping.
    async fn list_grouping_members(
        &self,
        grouping_id: &GroupingId,
    ) -> Result<Vec<GroupingMember>, StoreError>;

    // ───────────────────────────────────── Invites ────────────────────────────────────────

    /// Create a pending invite.
    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError>;

    /// Get invite by ID.
    async fn get_invite(&self, invite_id: &InviteId) -> Result<Invite, StoreError>;

    /// Get invite by token.
    async fn get_invite_by_token(&self, token: &str) -> Result<Invite, StoreError>;

    /// List invites of a workspace that are pending and unexpired at `now`, newest first.
    async fn list_active_invites(
        &self,
        workspace_id: &WorkspaceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invite>, StoreError>;

    /// Mark a pending, unexpired invite accepted and upsert the membership, in one
    /// transaction. Conflict if the invite was no longer pending/unexpired.
    async fn accept_invite(&self, params: &AcceptInviteParams)
        -> Result<AcceptedInvite, StoreError>;

    /// Mark a pending, unexpired invite revoked. Conflict otherwise.
    async fn revoke_invite(
        &self,
        invite_id: &InviteId,
        now: DateTime<Utc>,
    ) -> Result<Invite, StoreError>;
}
