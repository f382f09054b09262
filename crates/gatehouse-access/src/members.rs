//! Workspace creation plus workspace and project membership administration.

use chrono::Utc;
use gatehouse_audit::{entity, AuditAction, AuditEntry};
use gatehouse_storage::{
    CreateWorkspaceParams, MembershipStatus, ProjectId, ProjectMembership, Role, StoreError,
    UserId, Workspace, WorkspaceId, WorkspaceMembership,
};

use crate::access::Scope;
use crate::engine::AccessEngine;
use crate::error::{AccessError, Result};
use crate::snapshot;

/// PROMOTE when the role gains authority, UPDATE otherwise.
fn role_change_action(old: Role, new: Role) -> AuditAction {
    if new > old {
        AuditAction::Promote
    } else {
        AuditAction::Update
    }
}

fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if !valid {
        return Err(AccessError::InvalidArgument(format!(
            "invalid workspace slug: {slug:?}"
        )));
    }
    Ok(())
}

impl AccessEngine {
    /// Create a workspace owned by `owner`, who becomes its first OWNER.
    pub async fn create_workspace(
        &self,
        owner: &UserId,
        name: &str,
        slug: &str,
    ) -> Result<Workspace> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccessError::InvalidArgument(
                "workspace name must not be empty".to_string(),
            ));
        }
        validate_slug(slug)?;
        self.store
            .get_user(owner)
            .await
            .map_err(AccessError::lookup("user"))?;

        let workspace = self
            .store
            .create_workspace(&CreateWorkspaceParams {
                name: name.to_string(),
                slug: slug.to_string(),
                owner_user_id: owner.clone(),
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    AccessError::Conflict("workspace slug already taken".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(workspace_id = %workspace.id, slug = %workspace.slug, "workspace created");
        self.record(
            AuditEntry::builder(&workspace.id, owner, AuditAction::Create)
                .entity(entity::WORKSPACE, &workspace.id)
                .new_value(snapshot::workspace(&workspace))
                .build(),
        );
        Ok(workspace)
    }

    /// Change a member's workspace role (ADMIN+).
    ///
    /// Only an OWNER may grant OWNER or change an OWNER's role, and the last
    /// active OWNER cannot be demoted. Setting the current role is a no-op.
    pub async fn change_member_role(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
        role: Role,
    ) -> Result<WorkspaceMembership> {
        let actor_role = self
            .authorize_workspace(actor, workspace_id, &[Role::Admin])
            .await?;
        let current = self.membership(workspace_id, target).await?;
        if role == Role::Owner || current.role == Role::Owner {
            require_owner(actor_role)?;
        }
        if current.role == role {
            return Ok(current);
        }
        if current.role == Role::Owner {
            self.ensure_other_owner(workspace_id, &current).await?;
        }

        let updated = self
            .store
            .update_workspace_membership_role(workspace_id, target, role)
            .await
            .map_err(AccessError::lookup("membership"))?;
        self.record(
            AuditEntry::builder(workspace_id, actor, role_change_action(current.role, role))
                .entity(entity::WORKSPACE_MEMBERSHIP, target)
                .old_value(snapshot::membership(&current))
                .new_value(snapshot::membership(&updated))
                .build(),
        );
        Ok(updated)
    }

    /// Remove a member from the workspace (ADMIN+), along with their project
    /// and grouping memberships in it.
    pub async fn remove_member(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
    ) -> Result<()> {
        let actor_role = self
            .authorize_workspace(actor, workspace_id, &[Role::Admin])
            .await?;
        let current = self.membership(workspace_id, target).await?;
        if current.role == Role::Owner {
            require_owner(actor_role)?;
            self.ensure_other_owner(workspace_id, &current).await?;
        }

        self.store
            .remove_workspace_membership(workspace_id, target)
            .await
            .map_err(AccessError::lookup("membership"))?;
        self.record(
            AuditEntry::builder(workspace_id, actor, AuditAction::Delete)
                .entity(entity::WORKSPACE_MEMBERSHIP, target)
                .old_value(snapshot::membership(&current))
                .build(),
        );
        Ok(())
    }

    /// Deactivate a member (ADMIN+). Deactivated members keep their row but
    /// fail every access check and drop out of assignability.
    pub async fn deactivate_member(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
    ) -> Result<WorkspaceMembership> {
        let actor_role = self
            .authorize_workspace(actor, workspace_id, &[Role::Admin])
            .await?;
        let current = self.membership(workspace_id, target).await?;
        if !current.is_active() {
            return Ok(current);
        }
        if current.role == Role::Owner {
            require_owner(actor_role)?;
            self.ensure_other_owner(workspace_id, &current).await?;
        }

        let updated = self
            .store
            .set_workspace_membership_status(
                workspace_id,
                target,
                MembershipStatus::Deactivated { at: Utc::now() },
            )
            .await
            .map_err(AccessError::lookup("membership"))?;
        self.record(
            AuditEntry::builder(workspace_id, actor, AuditAction::Deactivate)
                .entity(entity::WORKSPACE_MEMBERSHIP, target)
                .old_value(snapshot::membership(&current))
                .new_value(snapshot::membership(&updated))
                .build(),
        );
        Ok(updated)
    }

    /// Reactivate a deactivated member (ADMIN+).
    pub async fn activate_member(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
    ) -> Result<WorkspaceMembership> {
        self.assert_access(actor, workspace_id, &Scope::Workspace, &[Role::Admin])
            .await?;
        let current = self.membership(workspace_id, target).await?;
        if current.is_active() {
            return Ok(current);
        }

        let updated = self
            .store
            .set_workspace_membership_status(workspace_id, target, MembershipStatus::Active)
            .await
            .map_err(AccessError::lookup("membership"))?;
        self.record(
            AuditEntry::builder(workspace_id, actor, AuditAction::Activate)
                .entity(entity::WORKSPACE_MEMBERSHIP, target)
                .old_value(snapshot::membership(&current))
                .new_value(snapshot::membership(&updated))
                .build(),
        );
        Ok(updated)
    }

    /// Grant or change a project role (project ADMIN+, OWNER to grant OWNER).
    /// The target must be an active workspace member.
    pub async fn set_project_member_role(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        target: &UserId,
        role: Role,
    ) -> Result<ProjectMembership> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        let scope = Scope::Project(project.id.clone());
        let required = if role == Role::Owner {
            Role::Owner
        } else {
            Role::Admin
        };
        self.assert_access(actor, &project.workspace_id, &scope, &[required])
            .await?;
        self.require_active_member(&project.workspace_id, target)
            .await?;

        let previous = match self.store.get_project_membership(project_id, target).await {
            Ok(m) => Some(m),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(previous) = &previous {
            if previous.role == role {
                return Ok(previous.clone());
            }
        }

        let updated = self
            .store
            .set_project_membership(project_id, target, role)
            .await?;
        let action = previous
            .as_ref()
            .map_or(AuditAction::Create, |p| role_change_action(p.role, role));
        let mut entry = AuditEntry::builder(&project.workspace_id, actor, action)
            .entity(entity::PROJECT_MEMBERSHIP, target)
            .new_value(snapshot::project_membership(&updated))
            .metadata(serde_json::json!({ "project_id": project.id.to_string() }));
        if let Some(previous) = &previous {
            entry = entry.old_value(snapshot::project_membership(previous));
        }
        self.record(entry.build());
        Ok(updated)
    }

    pub async fn remove_project_member(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        target: &UserId,
    ) -> Result<()> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        self.assert_access(
            actor,
            &project.workspace_id,
            &Scope::Project(project.id.clone()),
            &[Role::Admin],
        )
        .await?;

        let current = self
            .store
            .get_project_membership(project_id, target)
            .await
            .map_err(AccessError::lookup("project membership"))?;
        self.store
            .remove_project_membership(project_id, target)
            .await
            .map_err(AccessError::lookup("project membership"))?;
        self.record(
            AuditEntry::builder(&project.workspace_id, actor, AuditAction::Delete)
                .entity(entity::PROJECT_MEMBERSHIP, target)
                .old_value(snapshot::project_membership(&current))
                .metadata(serde_json::json!({ "project_id": project.id.to_string() }))
                .build(),
        );
        Ok(())
    }

    async fn membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<WorkspaceMembership> {
        self.store
            .get_workspace_membership(workspace_id, user_id)
            .await
            .map_err(AccessError::lookup("membership"))
    }

    /// Conflict unless another active OWNER remains besides `leaving`.
    async fn ensure_other_owner(
        &self,
        workspace_id: &WorkspaceId,
        leaving: &WorkspaceMembership,
    ) -> Result<()> {
        if !leaving.is_active() {
            return Ok(());
        }
        let others = self
            .store
            .list_workspace_memberships(workspace_id)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::Owner && m.is_active() && m.user_id != leaving.user_id)
            .count();
        if others == 0 {
            return Err(AccessError::Conflict(
                "workspace must keep at least one active owner".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_owner(actor_role: Option<Role>) -> Result<()> {
    if actor_role != Some(Role::Owner) {
        return Err(AccessError::Forbidden(
            "only an owner can grant or change the owner role".to_string(),
        ));
    }
    Ok(())
}
