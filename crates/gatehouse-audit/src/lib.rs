//! Audit logging abstraction for gatehouse.
//!
//! This crate defines the `AuditLog` trait for persisting audit entries
//! and the types representing permission-relevant transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_storage::{UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    /// Generate a new audit log ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditLogId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kinds of permission-relevant transitions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Assign,
    Unassign,
    Move,
    Promote,
    Deactivate,
    Activate,
    /// An access check failed but was let through by the development bypass
    PolicyOverride,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Assign => "assign",
            AuditAction::Unassign => "unassign",
            AuditAction::Move => "move",
            AuditAction::Promote => "promote",
            AuditAction::Deactivate => "deactivate",
            AuditAction::Activate => "activate",
            AuditAction::PolicyOverride => "policy_override",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "assign" => Ok(AuditAction::Assign),
            "unassign" => Ok(AuditAction::Unassign),
            "move" => Ok(AuditAction::Move),
            "promote" => Ok(AuditAction::Promote),
            "deactivate" => Ok(AuditAction::Deactivate),
            "activate" => Ok(AuditAction::Activate),
            "policy_override" => Ok(AuditAction::PolicyOverride),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Entity type names used across the engine.
pub mod entity {
    pub const WORKSPACE: &str = "workspace";
    pub const WORKSPACE_MEMBERSHIP: &str = "workspace_membership";
    pub const PROJECT: &str = "project";
    pub const PROJECT_MEMBERSHIP: &str = "project_membership";
    pub const GROUPING: &str = "project_grouping";
    pub const GROUPING_MEMBERSHIP: &str = "project_grouping_membership";
    pub const INVITE: &str = "workspace_invite";
    pub const ACCESS_CHECK: &str = "access_check";
    pub const WORK_ITEM: &str = "work_item";
}

/// One append-only audit row.
///
/// Uses raw UUIDs for serialization compatibility. Use the builder
/// to construct entries from typed IDs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this audit entry
    pub id: AuditLogId,
    /// Workspace the transition happened in
    pub workspace_id: Uuid,
    /// User that performed the action
    pub acting_user_id: Uuid,
    pub action: AuditAction,
    /// Type of entity affected (see [`entity`])
    pub entity_type: String,
    /// Identifier of the affected entity
    pub entity_id: String,
    /// Snapshot before the mutation
    pub old_value: Option<serde_json::Value>,
    /// Snapshot after the mutation
    pub new_value: Option<serde_json::Value>,
    /// Free-form context
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a new audit entry builder
    pub fn builder(
        workspace_id: &WorkspaceId,
        acting_user_id: &UserId,
        action: AuditAction,
    ) -> AuditEntryBuilder {
        AuditEntryBuilder::new(workspace_id, acting_user_id, action)
    }
}

/// Builder for constructing audit entries
pub struct AuditEntryBuilder {
    workspace_id: Uuid,
    acting_user_id: Uuid,
    action: AuditAction,
    entity_type: String,
    entity_id: String,
    old_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
}

impl AuditEntryBuilder {
    pub fn new(workspace_id: &WorkspaceId, acting_user_id: &UserId, action: AuditAction) -> Self {
        Self {
            workspace_id: workspace_id.0,
            acting_user_id: acting_user_id.0,
            action,
            entity_type: String::new(),
            entity_id: String::new(),
            old_value: None,
            new_value: None,
            metadata: None,
        }
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.entity_type = entity_type.into();
        self.entity_id = entity_id.to_string();
        self
    }

    pub fn old_value(mut self, value: serde_json::Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: serde_json::Value) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> AuditEntry {
        AuditEntry {
            id: AuditLogId::new(),
            workspace_id: self.workspace_id,
            acting_user_id: self.acting_user_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            old_value: self.old_value,
            new_value: self.new_value,
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

/// Filter for querying audit logs
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    pub workspace_id: Option<WorkspaceId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Filter by acting user
    pub user_id: Option<UserId>,
    pub action: Option<AuditAction>,
    /// Maximum number of results to return
    pub limit: Option<u32>,
    /// Number of results to skip (for pagination)
    pub offset: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace_id(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Error type for audit log operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Trait for audit log persistence.
///
/// Implementations store entries and provide query capabilities
/// for compliance and history views.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry.
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditLogError>;

    /// Query entries matching the filter, ordered newest first.
    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEntry>, AuditLogError>;

    /// Get a specific audit log entry by ID.
    async fn get(&self, id: AuditLogId) -> Result<AuditEntry, AuditLogError>;

    /// Count entries matching the filter (limit/offset ignored).
    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::Promote.to_string(), "promote");
        assert_eq!(AuditAction::PolicyOverride.to_string(), "policy_override");
    }

    #[test]
    fn test_audit_action_parse() {
        assert_eq!(
            "unassign".parse::<AuditAction>().unwrap(),
            AuditAction::Unassign
        );
        assert!("invalid.action".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_audit_action_all_variants_roundtrip() {
        let actions = [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::Delete,
            AuditAction::Assign,
            AuditAction::Unassign,
            AuditAction::Move,
            AuditAction::Promote,
            AuditAction::Deactivate,
            AuditAction::Activate,
            AuditAction::PolicyOverride,
        ];

        for action in actions {
            let parsed: AuditAction = action.to_string().parse().unwrap();
            assert_eq!(action, parsed, "Roundtrip failed for {:?}", action);
        }
    }

    #[test]
    fn test_audit_entry_builder() {
        let workspace_id = WorkspaceId::new();
        let user_id = UserId::new();
        let target = UserId::new();
        let entry = AuditEntry::builder(&workspace_id, &user_id, AuditAction::Promote)
            .entity(entity::WORKSPACE_MEMBERSHIP, &target)
            .old_value(serde_json::json!({"role": "member"}))
            .new_value(serde_json::json!({"role": "admin"}))
            .build();

        assert_eq!(entry.workspace_id, workspace_id.0);
        assert_eq!(entry.acting_user_id, user_id.0);
        assert_eq!(entry.entity_type, "workspace_membership");
        assert_eq!(entry.entity_id, target.to_string());
        assert_eq!(entry.old_value.unwrap()["role"], "member");
        assert_eq!(entry.new_value.unwrap()["role"], "admin");
        assert!(entry.metadata.is_none());
    }

    #[test]
    fn test_audit_entry_timestamp_is_recent() {
        let before = Utc::now();
        let entry =
            AuditEntry::builder(&WorkspaceId::new(), &UserId::new(), AuditAction::Create).build();
        let after = Utc::now();

        assert!(entry.created_at >= before);
        assert!(entry.created_at <= after);
        assert_eq!(entry.id.0.get_version_num(), 7);
    }

    #[test]
    fn test_audit_entry_serialization() {
        let entry = AuditEntry::builder(&WorkspaceId::new(), &UserId::new(), AuditAction::Move)
            .entity(entity::PROJECT, "p-1")
            .metadata(serde_json::json!({"reason": "reorg"}))
            .build();

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: AuditEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(entry.id, deserialized.id);
        assert_eq!(deserialized.action, AuditAction::Move);
        assert_eq!(deserialized.metadata.unwrap()["reason"], "reorg");
    }

    #[test]
    fn test_audit_log_filter_default() {
        let filter = AuditLogFilter::default();
        assert!(filter.workspace_id.is_none());
        assert!(filter.action.is_none());
        assert!(filter.limit.is_none());
        assert!(filter.offset.is_none());
    }

    #[test]
    fn test_audit_log_error_display() {
        let db_err = AuditLogError::Database("connection failed".to_string());
        assert!(db_err.to_string().contains("database error"));

        let id = AuditLogId::new();
        assert!(AuditLogError::NotFound(id).to_string().contains("not found"));
    }

    #[test]
    fn test_audit_action_serde() {
        let json = serde_json::to_string(&AuditAction::PolicyOverride).unwrap();
        assert_eq!(json, "\"policy_override\"");
    }
}
