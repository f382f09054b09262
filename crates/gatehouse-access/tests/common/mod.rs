#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gatehouse_access::{AccessEngine, AccessPolicyConfig, EngineConfig};
use gatehouse_audit::{
    AuditAction, AuditEntry, AuditLog, AuditLogError, AuditLogFilter, AuditLogId,
};
use gatehouse_storage::{
    CreateInviteParams, CreateProjectParams, GroupingId, Invite, Project, Role, Store, User,
    UserId, Workspace, WorkspaceId,
};
use gatehouse_store_sqlite::SqliteStore;

/// An engine over a fresh in-memory database with one workspace and its owner.
pub struct Harness {
    pub engine: AccessEngine,
    pub store: Arc<SqliteStore>,
    pub owner: User,
    pub workspace: Workspace,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        audit_max_retries: 0,
        ..EngineConfig::default()
    }
}

pub fn bypass_config() -> EngineConfig {
    EngineConfig {
        policy: AccessPolicyConfig {
            allow_unauthenticated_fallback: true,
        },
        ..test_config()
    }
}

pub async fn setup() -> Harness {
    setup_with(test_config()).await
}

pub async fn setup_with(config: EngineConfig) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let engine = AccessEngine::new(store.clone(), store.clone(), config);
    let owner = store.create_user("owner@example.com").await.unwrap();
    let workspace = engine
        .create_workspace(&owner.id, "Acme", "acme")
        .await
        .unwrap();
    Harness {
        engine,
        store,
        owner,
        workspace,
    }
}

impl Harness {
    pub fn ws(&self) -> &WorkspaceId {
        &self.workspace.id
    }

    /// A new user who belongs to no workspace.
    pub async fn user(&self, email: &str) -> User {
        self.store.create_user(email).await.unwrap()
    }

    /// A new user with an active membership in the harness workspace.
    pub async fn member(&self, email: &str, role: Role) -> User {
        let user = self.user(email).await;
        self.store
            .add_workspace_membership(self.ws(), &user.id, role)
            .await
            .unwrap();
        user
    }

    /// A project inserted directly, bypassing access checks.
    pub async fn project(
        &self,
        name: &str,
        grouping_id: Option<GroupingId>,
        creator_id: Option<UserId>,
    ) -> Project {
        self.store
            .create_project(&CreateProjectParams {
                workspace_id: self.ws().clone(),
                grouping_id,
                name: name.to_string(),
                creator_id,
                owner_id: None,
            })
            .await
            .unwrap()
    }

    /// A pending invite inserted directly with a chosen token and expiry.
    pub async fn seed_invite(
        &self,
        email: &str,
        role: Role,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Invite {
        self.store
            .create_invite(&CreateInviteParams {
                workspace_id: self.ws().clone(),
                email: email.to_string(),
                role,
                token: token.to_string(),
                expires_at,
                created_by_user_id: self.owner.id.clone(),
            })
            .await
            .unwrap()
    }

    /// Flushed audit history of the harness workspace.
    pub async fn history(&self, filter: AuditLogFilter) -> Vec<AuditEntry> {
        self.engine.flush().await;
        self.engine.history(self.ws(), filter).await.unwrap()
    }

    pub async fn actions(&self, entity_type: &str) -> Vec<AuditAction> {
        self.history(AuditLogFilter::new().entity_type(entity_type))
            .await
            .into_iter()
            .map(|e| e.action)
            .collect()
    }
}

/// Audit log whose writes always fail.
#[derive(Default)]
pub struct FailingAuditLog {
    pub attempts: AtomicU32,
}

impl FailingAuditLog {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuditLog for FailingAuditLog {
    async fn record(&self, _entry: AuditEntry) -> Result<(), AuditLogError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AuditLogError::Database("audit table unavailable".into()))
    }

    async fn query(&self, _filter: AuditLogFilter) -> Result<Vec<AuditEntry>, AuditLogError> {
        Err(AuditLogError::Database("audit table unavailable".into()))
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEntry, AuditLogError> {
        Err(AuditLogError::NotFound(id))
    }

    async fn count(&self, _filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        Err(AuditLogError::Database("audit table unavailable".into()))
    }
}
