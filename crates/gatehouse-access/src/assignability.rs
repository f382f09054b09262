//! Which users may be assigned work in a project.

use std::collections::{BTreeSet, HashSet};

use gatehouse_audit::{entity, AuditAction, AuditEntry};
use gatehouse_storage::{Project, ProjectId, Role, UserId, UserSummary, Visibility};
use serde_json::json;

use crate::access::Scope;
use crate::engine::AccessEngine;
use crate::error::{AccessError, Result};

/// A change of assignee on a work item inside a project.
#[derive(Clone, Debug)]
pub struct AssignmentChange {
    /// Identifier of the work item owned by the caller's domain.
    pub item_id: String,
    pub previous: Option<UserId>,
    pub next: Option<UserId>,
}

impl AccessEngine {
    /// Users eligible for assignment in the project, sorted by email.
    ///
    /// Projects without a grouping or in a PUBLIC grouping open assignment to
    /// every active workspace member. A TARGETED grouping narrows it to the
    /// grouping's members, the project's members and its creator and owner.
    pub async fn assignable_users(&self, project_id: &ProjectId) -> Result<Vec<UserSummary>> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        let ids = self.eligible_user_ids(&project).await?;
        let ids: Vec<UserId> = ids.into_iter().collect();

        let mut users: Vec<UserSummary> = self
            .store
            .list_users(&ids)
            .await?
            .iter()
            .map(UserSummary::from)
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    /// Server-side check for an assignment: the actor needs project MEMBER and
    /// the assignee must be in the project's eligible set.
    pub async fn authorize_assignment(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        assignee: &UserId,
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
            &[Role::Member],
        )
        .await?;

        if !self.eligible_user_ids(&project).await?.contains(assignee) {
            return Err(AccessError::Forbidden(
                "user cannot be assigned work in this project".to_string(),
            ));
        }
        Ok(())
    }

    /// Record an assignment that the caller has applied.
    ///
    /// ASSIGN when there is a new assignee, UNASSIGN when the item was cleared.
    pub async fn record_assignment(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        change: &AssignmentChange,
    ) -> Result<()> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        let action = if change.next.is_some() {
            AuditAction::Assign
        } else {
            AuditAction::Unassign
        };
        let assignee =
            |u: &Option<UserId>| json!({ "assignee": u.as_ref().map(|u| u.to_string()) });
        self.record(
            AuditEntry::builder(&project.workspace_id, actor, action)
                .entity(entity::WORK_ITEM, &change.item_id)
                .old_value(assignee(&change.previous))
                .new_value(assignee(&change.next))
                .metadata(json!({ "project_id": project.id.to_string() }))
                .build(),
        );
        Ok(())
    }

    pub(crate) async fn eligible_user_ids(&self, project: &Project) -> Result<BTreeSet<UserId>> {
        let grouping = match &project.grouping_id {
            Some(grouping_id) => Some(
                self.store
                    .get_grouping(grouping_id)
                    .await
                    .map_err(AccessError::lookup("grouping"))?,
            ),
            None => None,
        };

        let memberships = self
            .store
            .list_workspace_memberships(&project.workspace_id)
            .await?;

        let targeted = grouping
            .as_ref()
            .is_some_and(|g| g.visibility == Visibility::Targeted);
        if !targeted {
            return Ok(memberships
                .into_iter()
                .filter(|m| m.is_active())
                .map(|m| m.user_id)
                .collect());
        }

        let mut ids = BTreeSet::new();
        if let Some(grouping) = &grouping {
            for member in self.store.list_grouping_members(&grouping.id).await? {
                ids.insert(member.user_id);
            }
        }
        for member in self.store.list_project_memberships(&project.id).await? {
            ids.insert(member.user_id);
        }
        ids.extend(project.creator_id.iter().cloned());
        ids.extend(project.owner_id.iter().cloned());

        let deactivated: HashSet<UserId> = memberships
            .into_iter()
            .filter(|m| !m.is_active())
            .map(|m| m.user_id)
            .collect();
        ids.retain(|id| !deactivated.contains(id));
        Ok(ids)
    }
}
