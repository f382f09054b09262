//! Project groupings and project placement.

use gatehouse_audit::{entity, AuditAction, AuditEntry};
use gatehouse_storage::{
    CreateGroupingParams, CreateProjectParams, GroupingId, GroupingMember, Project,
    ProjectGrouping, ProjectId, Role, StoreError, UserId, Visibility, WorkspaceId,
    DEFAULT_GROUPING_NAME,
};
use serde_json::json;

use crate::access::Scope;
use crate::engine::AccessEngine;
use crate::error::{AccessError, Result};
use crate::snapshot;

fn validate_name(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccessError::InvalidArgument(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(name.to_string())
}

fn is_default_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEFAULT_GROUPING_NAME)
}

impl AccessEngine {
    /// Create a grouping (ADMIN+). A name already used in the workspace is a
    /// Conflict, and so is the default grouping's name, which only
    /// [`AccessEngine::default_grouping`] creates.
    pub async fn create_grouping(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        name: &str,
        visibility: Visibility,
    ) -> Result<ProjectGrouping> {
        self.assert_access(actor, workspace_id, &Scope::Workspace, &[Role::Admin])
            .await?;
        let name = validate_name("grouping", name)?;
        if is_default_name(&name) {
            return Err(AccessError::Conflict(format!(
                "grouping name {DEFAULT_GROUPING_NAME:?} is reserved"
            )));
        }

        let grouping = self
            .store
            .create_grouping(&CreateGroupingParams {
                workspace_id: workspace_id.clone(),
                name,
                visibility,
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    AccessError::Conflict("grouping name already in use".to_string())
                }
                other => AccessError::lookup("workspace")(other),
            })?;

        self.record(
            AuditEntry::builder(workspace_id, actor, AuditAction::Create)
                .entity(entity::GROUPING, &grouping.id)
                .new_value(snapshot::grouping(&grouping))
                .build(),
        );
        Ok(grouping)
    }

    /// All groupings of a workspace (VIEWER+), oldest first. A workspace
    /// without any grouping gets the default PUBLIC one on first listing.
    pub async fn list_groupings(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<ProjectGrouping>> {
        self.assert_access(actor, workspace_id, &Scope::Workspace, &[Role::Viewer])
            .await?;
        let groupings = self.store.list_groupings(workspace_id).await?;
        if !groupings.is_empty() {
            return Ok(groupings);
        }

        let (grouping, created) = self.get_or_create_default_grouping(workspace_id).await?;
        if created {
            self.record(
                AuditEntry::builder(workspace_id, actor, AuditAction::Create)
                    .entity(entity::GROUPING, &grouping.id)
                    .new_value(snapshot::grouping(&grouping))
                    .metadata(json!({ "reason": "default grouping" }))
                    .build(),
            );
        }
        Ok(vec![grouping])
    }

    /// The workspace's default grouping, created on first use.
    ///
    /// Concurrent first calls all return the same row.
    pub async fn default_grouping(&self, workspace_id: &WorkspaceId) -> Result<ProjectGrouping> {
        Ok(self.get_or_create_default_grouping(workspace_id).await?.0)
    }

    async fn get_or_create_default_grouping(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<(ProjectGrouping, bool)> {
        match self
            .store
            .get_grouping_by_name(workspace_id, DEFAULT_GROUPING_NAME)
            .await
        {
            Ok(g) => return Ok((g, false)),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let params = CreateGroupingParams {
            workspace_id: workspace_id.clone(),
            name: DEFAULT_GROUPING_NAME.to_string(),
            visibility: Visibility::Public,
        };
        match self.store.create_grouping(&params).await {
            Ok(g) => {
                tracing::debug!(workspace_id = %workspace_id, "created default grouping");
                Ok((g, true))
            }
            // Lost the race; the winner's row is the default.
            Err(StoreError::AlreadyExists) => {
                let g = self
                    .store
                    .get_grouping_by_name(workspace_id, DEFAULT_GROUPING_NAME)
                    .await?;
                Ok((g, false))
            }
            Err(e) => Err(AccessError::lookup("workspace")(e)),
        }
    }

    /// Change a grouping's visibility (ADMIN+). The default grouping stays PUBLIC.
    pub async fn set_grouping_visibility(
        &self,
        actor: &UserId,
        grouping_id: &GroupingId,
        visibility: Visibility,
    ) -> Result<ProjectGrouping> {
        let grouping = self.grouping(grouping_id).await?;
        self.assert_access(
            actor,
            &grouping.workspace_id,
            &Scope::Workspace,
            &[Role::Admin],
        )
        .await?;
        if grouping.visibility == visibility {
            return Ok(grouping);
        }
        if grouping.name == DEFAULT_GROUPING_NAME {
            return Err(AccessError::Conflict(
                "the default grouping is always public".to_string(),
            ));
        }

        let updated = self
            .store
            .set_grouping_visibility(grouping_id, visibility)
            .await
            .map_err(AccessError::lookup("grouping"))?;
        self.record(
            AuditEntry::builder(&grouping.workspace_id, actor, AuditAction::Update)
                .entity(entity::GROUPING, grouping_id)
                .old_value(snapshot::grouping(&grouping))
                .new_value(snapshot::grouping(&updated))
                .build(),
        );
        Ok(updated)
    }

    /// Add an active workspace member to a grouping (ADMIN+).
    pub async fn add_grouping_member(
        &self,
        actor: &UserId,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<GroupingMember> {
        let grouping = self.grouping(grouping_id).await?;
        self.assert_access(
            actor,
            &grouping.workspace_id,
            &Scope::Workspace,
            &[Role::Admin],
        )
        .await?;
        self.require_active_member(&grouping.workspace_id, user_id)
            .await?;

        let member = self
            .store
            .add_grouping_member(grouping_id, user_id)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    AccessError::Conflict("user is already in this grouping".to_string())
                }
                other => other.into(),
            })?;
        self.record(
            AuditEntry::builder(&grouping.workspace_id, actor, AuditAction::Assign)
                .entity(entity::GROUPING_MEMBERSHIP, grouping_id)
                .new_value(json!({ "user_id": user_id.to_string() }))
                .build(),
        );
        Ok(member)
    }

    pub async fn remove_grouping_member(
        &self,
        actor: &UserId,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<()> {
        let grouping = self.grouping(grouping_id).await?;
        self.assert_access(
            actor,
            &grouping.workspace_id,
            &Scope::Workspace,
            &[Role::Admin],
        )
        .await?;

        self.store
            .remove_grouping_member(grouping_id, user_id)
            .await
            .map_err(AccessError::lookup("grouping member"))?;
        self.record(
            AuditEntry::builder(&grouping.workspace_id, actor, AuditAction::Unassign)
                .entity(entity::GROUPING_MEMBERSHIP, grouping_id)
                .old_value(json!({ "user_id": user_id.to_string() }))
                .build(),
        );
        Ok(())
    }

    /// Projects of a workspace (VIEWER+), oldest first.
    pub async fn list_projects(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Project>> {
        self.assert_access(actor, workspace_id, &Scope::Workspace, &[Role::Viewer])
            .await?;
        Ok(self.store.list_projects(workspace_id).await?)
    }

    /// Create a project (workspace MEMBER+). The actor becomes its creator
    /// and owner. Without an explicit grouping the project lands in the
    /// workspace's default grouping.
    pub async fn create_project(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        name: &str,
        grouping_id: Option<GroupingId>,
    ) -> Result<Project> {
        self.assert_access(actor, workspace_id, &Scope::Workspace, &[Role::Member])
            .await?;
        let name = validate_name("project", name)?;

        let grouping = match grouping_id {
            Some(id) => self.grouping_in_workspace(&id, workspace_id).await?,
            None => self.default_grouping(workspace_id).await?,
        };

        let project = self
            .store
            .create_project(&CreateProjectParams {
                workspace_id: workspace_id.clone(),
                grouping_id: Some(grouping.id),
                name,
                creator_id: Some(actor.clone()),
                owner_id: Some(actor.clone()),
            })
            .await?;
        self.record(
            AuditEntry::builder(workspace_id, actor, AuditAction::Create)
                .entity(entity::PROJECT, &project.id)
                .new_value(snapshot::project(&project))
                .build(),
        );
        Ok(project)
    }

    /// Move a project into another grouping of the same workspace, or out of
    /// any grouping with `None` (project ADMIN+).
    pub async fn move_project(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        grouping_id: Option<GroupingId>,
    ) -> Result<Project> {
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
        if let Some(id) = &grouping_id {
            self.grouping_in_workspace(id, &project.workspace_id)
                .await?;
        }
        if project.grouping_id == grouping_id {
            return Ok(project);
        }

        let moved = self
            .store
            .set_project_grouping(project_id, grouping_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        let placement =
            |g: &Option<GroupingId>| json!({ "grouping_id": g.as_ref().map(|g| g.to_string()) });
        self.record(
            AuditEntry::builder(&project.workspace_id, actor, AuditAction::Move)
                .entity(entity::PROJECT, project_id)
                .old_value(placement(&project.grouping_id))
                .new_value(placement(&moved.grouping_id))
                .build(),
        );
        Ok(moved)
    }

    async fn grouping(&self, grouping_id: &GroupingId) -> Result<ProjectGrouping> {
        self.store
            .get_grouping(grouping_id)
            .await
            .map_err(AccessError::lookup("grouping"))
    }

    async fn grouping_in_workspace(
        &self,
        grouping_id: &GroupingId,
        workspace_id: &WorkspaceId,
    ) -> Result<ProjectGrouping> {
        let grouping = self.grouping(grouping_id).await?;
        if grouping.workspace_id != *workspace_id {
            return Err(AccessError::NotFound("grouping".to_string()));
        }
        Ok(grouping)
    }
}
