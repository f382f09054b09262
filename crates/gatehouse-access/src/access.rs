//! Access assertion across workspace and project scope.

use gatehouse_audit::{entity, AuditAction, AuditEntry};
use gatehouse_storage::{ProjectId, Role, StoreError, UserId, WorkspaceId};
use serde_json::json;

use crate::engine::AccessEngine;
use crate::error::{AccessError, Result};
use crate::hierarchy::satisfies;

/// What an access check is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Workspace,
    Project(ProjectId),
}

impl Scope {
    fn target(&self, workspace_id: &WorkspaceId) -> String {
        match self {
            Scope::Workspace => workspace_id.to_string(),
            Scope::Project(project_id) => project_id.to_string(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Scope::Workspace => "workspace",
            Scope::Project(_) => "project",
        }
    }
}

impl AccessEngine {
    /// Succeed if `user_id` holds one of `required` (or better) in the scope.
    ///
    /// Resolution order:
    /// 1. No active workspace membership = DENY
    /// 2. Project scope: the project must belong to the workspace, else NotFound
    /// 3. Workspace role satisfies `required` = ALLOW (workspace admins need no project row)
    /// 4. Project scope: project role satisfies `required`, or the user created
    ///    or owns the project = ALLOW
    /// 5. Otherwise DENY
    ///
    /// With the development bypass enabled, a DENY becomes an ALLOW plus a
    /// policy-override audit entry. Tenant isolation (step 2) is never bypassed.
    ///
    /// Step 2 runs before the workspace-role check, so a project id that is
    /// missing from the workspace is NotFound even for ADMIN and OWNER.
    pub async fn assert_access(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        scope: &Scope,
        required: &[Role],
    ) -> Result<()> {
        let Some(membership) = self.active_membership(workspace_id, user_id).await? else {
            return self.deny(
                user_id,
                workspace_id,
                scope,
                required,
                "not a member of this workspace",
            );
        };

        let project = match scope {
            Scope::Project(project_id) => {
                Some(self.project_in_workspace(project_id, workspace_id).await?)
            }
            Scope::Workspace => None,
        };

        if satisfies(membership.role, required) {
            tracing::debug!(
                user_id = %user_id,
                workspace_id = %workspace_id,
                role = %membership.role,
                "access granted by workspace role"
            );
            return Ok(());
        }

        let Some(project) = project else {
            return self.deny(
                user_id,
                workspace_id,
                scope,
                required,
                "insufficient workspace role",
            );
        };

        if let Some(role) = self.project_role(user_id, &project.id).await? {
            if satisfies(role, required) {
                tracing::debug!(
                    user_id = %user_id,
                    project_id = %project.id,
                    role = %role,
                    "access granted by project role"
                );
                return Ok(());
            }
        }

        if project.is_controlled_by(user_id) {
            tracing::debug!(
                user_id = %user_id,
                project_id = %project.id,
                "access granted to project creator or owner"
            );
            return Ok(());
        }

        self.deny(
            user_id,
            workspace_id,
            scope,
            required,
            "insufficient project role",
        )
    }

    /// Role of an active workspace member, None otherwise.
    pub async fn workspace_role(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Role>> {
        Ok(self
            .active_membership(workspace_id, user_id)
            .await?
            .map(|m| m.role))
    }

    /// Role from the project's own membership row, None if there is none.
    pub async fn project_role(
        &self,
        user_id: &UserId,
        project_id: &ProjectId,
    ) -> Result<Option<Role>> {
        match self.store.get_project_membership(project_id, user_id).await {
            Ok(m) => Ok(Some(m.role)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `assert_access` at workspace scope, returning the caller's own role.
    pub(crate) async fn authorize_workspace(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        required: &[Role],
    ) -> Result<Option<Role>> {
        self.assert_access(user_id, workspace_id, &Scope::Workspace, required)
            .await?;
        self.workspace_role(user_id, workspace_id).await
    }

    fn deny(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        scope: &Scope,
        required: &[Role],
        reason: &str,
    ) -> Result<()> {
        if !self.config.policy.allow_unauthenticated_fallback {
            tracing::debug!(
                user_id = %user_id,
                workspace_id = %workspace_id,
                scope = scope.as_str(),
                reason,
                "access denied"
            );
            return Err(AccessError::Forbidden(reason.to_string()));
        }

        tracing::warn!(
            user_id = %user_id,
            workspace_id = %workspace_id,
            scope = scope.as_str(),
            reason,
            "development bypass allowed a denied access check"
        );
        let required: Vec<&str> = required.iter().map(|r| r.as_str()).collect();
        self.record(
            AuditEntry::builder(workspace_id, user_id, AuditAction::PolicyOverride)
                .entity(entity::ACCESS_CHECK, scope.target(workspace_id))
                .metadata(json!({
                    "scope": scope.as_str(),
                    "required_roles": required,
                    "reason": reason,
                }))
                .build(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_target() {
        let ws = WorkspaceId::new();
        let project = ProjectId::new();
        assert_eq!(Scope::Workspace.target(&ws), ws.to_string());
        assert_eq!(Scope::Project(project.clone()).target(&ws), project.to_string());
        assert_eq!(Scope::Project(project).as_str(), "project");
    }
}
