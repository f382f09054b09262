use std::sync::Arc;

use gatehouse_audit::{AuditEntry, AuditLog, AuditLogError, AuditLogFilter};
use gatehouse_storage::{
    Project, ProjectId, Store, StoreError, UserId, WorkspaceId, WorkspaceMembership,
};

use crate::config::EngineConfig;
use crate::error::{AccessError, Result};
use crate::recorder::AuditRecorder;

/// The access-control engine.
///
/// Holds no per-request state; every operation reads what it needs from the
/// store. Audit entries are handed to a background [`AuditRecorder`] after
/// the corresponding mutation has been committed.
#[derive(Clone)]
pub struct AccessEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) audit_log: Arc<dyn AuditLog>,
    pub(crate) recorder: AuditRecorder,
    pub(crate) config: EngineConfig,
}

impl AccessEngine {
    /// Build an engine. Must be called from within a tokio runtime, since it
    /// spawns the audit writer.
    pub fn new(store: Arc<dyn Store>, audit_log: Arc<dyn AuditLog>, config: EngineConfig) -> Self {
        let recorder = AuditRecorder::spawn(
            audit_log.clone(),
            config.audit_queue_capacity,
            config.audit_max_retries,
        );
        Self {
            store,
            audit_log,
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ───────────────────────────────────── Audit trail ────────────────────────────────────

    /// Queue an audit entry. Never fails the caller.
    pub fn record(&self, entry: AuditEntry) {
        self.recorder.record(entry);
    }

    /// Wait until all queued audit entries have been handled.
    pub async fn flush(&self) {
        self.recorder.flush().await;
    }

    /// Audit history of a workspace, newest first.
    ///
    /// The filter's workspace is always replaced by `workspace_id`.
    pub async fn history(
        &self,
        workspace_id: &WorkspaceId,
        filter: AuditLogFilter,
    ) -> Result<Vec<AuditEntry>> {
        let filter = filter.workspace_id(workspace_id.clone());
        self.audit_log.query(filter).await.map_err(|e| match e {
            AuditLogError::InvalidFilter(msg) => AccessError::InvalidArgument(msg),
            other => AccessError::Internal(other.to_string()),
        })
    }

    // ───────────────────────────────────── Shared lookups ─────────────────────────────────

    /// The caller's membership, or None if absent or deactivated.
    pub(crate) async fn active_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<Option<WorkspaceMembership>> {
        match self
            .store
            .get_workspace_membership(workspace_id, user_id)
            .await
        {
            Ok(m) if m.is_active() => Ok(Some(m)),
            Ok(_) | Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Target users of membership operations must be active workspace members.
    pub(crate) async fn require_active_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<WorkspaceMembership> {
        self.active_membership(workspace_id, user_id)
            .await?
            .ok_or_else(|| {
                AccessError::InvalidArgument(
                    "user is not an active member of this workspace".to_string(),
                )
            })
    }

    /// Load a project, treating a project from another workspace as missing.
    pub(crate) async fn project_in_workspace(
        &self,
        project_id: &ProjectId,
        workspace_id: &WorkspaceId,
    ) -> Result<Project> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(AccessError::lookup("project"))?;
        if project.workspace_id != *workspace_id {
            return Err(AccessError::NotFound("project".to_string()));
        }
        Ok(project)
    }
}
