use chrono::{DateTime, Utc};
use gatehouse_audit::{
    AuditAction, AuditEntry, AuditLog, AuditLogError, AuditLogFilter, AuditLogId,
};
use gatehouse_storage::{
    normalize_email, AcceptInviteParams, AcceptedInvite, CreateGroupingParams,
    CreateInviteParams, CreateProjectParams, CreateWorkspaceParams, GroupingId, GroupingMember,
    Invite, InviteId, InviteState, MembershipStatus, Project, ProjectGrouping, ProjectId,
    ProjectMembership, Role, Store, StoreError, User, UserId, Visibility, Workspace, WorkspaceId,
    WorkspaceMembership,
};
use sqlx::{
    sqlite::{SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite, SqliteExecutor, SqlitePool,
};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const MEMBERSHIP_COLUMNS: &str =
    "workspace_id, user_id, role, status, deactivated_at, created_at, updated_at";
const PROJECT_COLUMNS: &str =
    "id, workspace_id, grouping_id, name, creator_id, owner_id, created_at";
const INVITE_COLUMNS: &str = "id, workspace_id, email, role, token, state, resolved_at, \
     accepted_by, created_by_user_id, created_at, expires_at";
const AUDIT_COLUMNS: &str = "id, workspace_id, acting_user_id, action, entity_type, entity_id, \
     old_value, new_value, metadata, created_at";

/// SQLite-backed implementation of [`Store`] and [`AuditLog`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Private in-memory database, used by tests and the admin CLI's `--ephemeral` mode.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        // The database lives as long as its single connection does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;
        Self::migrate(pool).await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;
        Self::migrate(pool).await
    }

    /// Close the pool. Later calls fail with `StoreError::Backend`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!("sqlite store migrated");
        Ok(Self { pool })
    }
}

// ───────────────────────────────────── Helpers ────────────────────────────────────────────

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Map a failed write, turning constraint violations into the matching [`StoreError`].
fn write_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() || db.message().contains("UNIQUE") {
            return StoreError::AlreadyExists;
        }
        if db.is_foreign_key_violation() {
            return StoreError::NotFound;
        }
    }
    backend(e)
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_ts(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {micros}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(s).map_err(|e| StoreError::Backend(e.to_string()))
}

fn parse_role(s: &str) -> Result<Role, StoreError> {
    s.parse::<Role>()
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn col<T>(row: &SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(name).map_err(backend)
}

fn uuid_col(row: &SqliteRow, name: &str) -> Result<Uuid, StoreError> {
    parse_uuid(&col::<String>(row, name)?)
}

fn opt_uuid_col(row: &SqliteRow, name: &str) -> Result<Option<Uuid>, StoreError> {
    col::<Option<String>>(row, name)?
        .map(|s| parse_uuid(&s))
        .transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: UserId(uuid_col(row, "id")?),
        email: col(row, "email")?,
        created_at: from_ts(col(row, "created_at")?)?,
    })
}

fn workspace_from_row(row: &SqliteRow) -> Result<Workspace, StoreError> {
    Ok(Workspace {
        id: WorkspaceId(uuid_col(row, "id")?),
        name: col(row, "name")?,
        slug: col(row, "slug")?,
        owner_user_id: UserId(uuid_col(row, "owner_user_id")?),
        created_at: from_ts(col(row, "created_at")?)?,
    })
}

fn membership_from_row(row: &SqliteRow) -> Result<WorkspaceMembership, StoreError> {
    let status = match (
        col::<String>(row, "status")?.as_str(),
        col::<Option<i64>>(row, "deactivated_at")?,
    ) {
        ("active", _) => MembershipStatus::Active,
        ("deactivated", Some(at)) => MembershipStatus::Deactivated { at: from_ts(at)? },
        (other, _) => {
            return Err(StoreError::Backend(format!(
                "invalid membership status: {other}"
            )))
        }
    };
    Ok(WorkspaceMembership {
        workspace_id: WorkspaceId(uuid_col(row, "workspace_id")?),
        user_id: UserId(uuid_col(row, "user_id")?),
        role: parse_role(&col::<String>(row, "role")?)?,
        status,
        created_at: from_ts(col(row, "created_at")?)?,
        updated_at: from_ts(col(row, "updated_at")?)?,
    })
}

fn project_from_row(row: &SqliteRow) -> Result<Project, StoreError> {
    Ok(Project {
        id: ProjectId(uuid_col(row, "id")?),
        workspace_id: WorkspaceId(uuid_col(row, "workspace_id")?),
        grouping_id: opt_uuid_col(row, "grouping_id")?.map(GroupingId),
        name: col(row, "name")?,
        creator_id: opt_uuid_col(row, "creator_id")?.map(UserId),
        owner_id: opt_uuid_col(row, "owner_id")?.map(UserId),
        created_at: from_ts(col(row, "created_at")?)?,
    })
}

fn project_membership_from_row(row: &SqliteRow) -> Result<ProjectMembership, StoreError> {
    Ok(ProjectMembership {
        project_id: ProjectId(uuid_col(row, "project_id")?),
        user_id: UserId(uuid_col(row, "user_id")?),
        role: parse_role(&col::<String>(row, "role")?)?,
        created_at: from_ts(col(row, "created_at")?)?,
        updated_at: from_ts(col(row, "updated_at")?)?,
    })
}

fn grouping_from_row(row: &SqliteRow) -> Result<ProjectGrouping, StoreError> {
    Ok(ProjectGrouping {
        id: GroupingId(uuid_col(row, "id")?),
        workspace_id: WorkspaceId(uuid_col(row, "workspace_id")?),
        name: col(row, "name")?,
        visibility: col::<String>(row, "visibility")?
            .parse::<Visibility>()
            .map_err(StoreError::Backend)?,
        created_at: from_ts(col(row, "created_at")?)?,
    })
}

fn grouping_member_from_row(row: &SqliteRow) -> Result<GroupingMember, StoreError> {
    Ok(GroupingMember {
        grouping_id: GroupingId(uuid_col(row, "grouping_id")?),
        user_id: UserId(uuid_col(row, "user_id")?),
        created_at: from_ts(col(row, "created_at")?)?,
    })
}

fn invite_from_row(row: &SqliteRow) -> Result<Invite, StoreError> {
    let state = match (
        col::<String>(row, "state")?.as_str(),
        col::<Option<i64>>(row, "resolved_at")?,
        opt_uuid_col(row, "accepted_by")?,
    ) {
        ("pending", _, _) => InviteState::Pending,
        ("accepted", Some(at), Some(by)) => InviteState::Accepted {
            at: from_ts(at)?,
            by: UserId(by),
        },
        ("revoked", Some(at), _) => InviteState::Revoked { at: from_ts(at)? },
        (other, _, _) => {
            return Err(StoreError::Backend(format!("invalid invite state: {other}")))
        }
    };
    Ok(Invite {
        id: InviteId(uuid_col(row, "id")?),
        workspace_id: WorkspaceId(uuid_col(row, "workspace_id")?),
        email: col(row, "email")?,
        role: parse_role(&col::<String>(row, "role")?)?,
        token: col(row, "token")?,
        state,
        created_by_user_id: UserId(uuid_col(row, "created_by_user_id")?),
        created_at: from_ts(col(row, "created_at")?)?,
        expires_at: from_ts(col(row, "expires_at")?)?,
    })
}

async fn fetch_membership<'e, E>(
    exec: E,
    workspace_id: &WorkspaceId,
    user_id: &UserId,
) -> Result<Option<WorkspaceMembership>, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships
         WHERE workspace_id = ? AND user_id = ?"
    ))
    .bind(workspace_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(exec)
    .await
    .map_err(backend)?;
    row.as_ref().map(membership_from_row).transpose()
}

async fn fetch_invite<'e, E>(exec: E, invite_id: &InviteId) -> Result<Option<Invite>, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "SELECT {INVITE_COLUMNS} FROM workspace_invites WHERE id = ?"
    ))
    .bind(invite_id.to_string())
    .fetch_optional(exec)
    .await
    .map_err(backend)?;
    row.as_ref().map(invite_from_row).transpose()
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────────────── Users ──────────────────────────────────────────

    async fn create_user(&self, email: &str) -> Result<User, StoreError> {
        let user = User {
            id: UserId::new(),
            email: normalize_email(email),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO users(id, email, created_at) VALUES(?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(ts(user.created_at))
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError> {
        let row = sqlx::query("SELECT id, email, created_at FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let row = sqlx::query("SELECT id, email, created_at FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row)
    }

    async fn list_users(&self, user_ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, email, created_at FROM users WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in user_ids {
            ids.push_bind(id.to_string());
        }
        ids.push_unseparated(") ORDER BY email");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter().map(user_from_row).collect()
    }

    // ───────────────────────────────────── Workspaces ─────────────────────────────────────

    async fn create_workspace(
        &self,
        params: &CreateWorkspaceParams,
    ) -> Result<Workspace, StoreError> {
        let workspace = Workspace {
            id: WorkspaceId::new(),
            name: params.name.clone(),
            slug: params.slug.clone(),
            owner_user_id: params.owner_user_id.clone(),
            created_at: Utc::now(),
        };
        let now = ts(workspace.created_at);

        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            "INSERT INTO workspaces(id, name, slug, owner_user_id, created_at)
             VALUES(?, ?, ?, ?, ?)",
        )
        .bind(workspace.id.to_string())
        .bind(&workspace.name)
        .bind(&workspace.slug)
        .bind(workspace.owner_user_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        sqlx::query(
            "INSERT INTO workspace_memberships(workspace_id, user_id, role, status, created_at, updated_at)
             VALUES(?, ?, 'owner', 'active', ?, ?)",
        )
        .bind(workspace.id.to_string())
        .bind(workspace.owner_user_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        tx.commit().await.map_err(backend)?;
        Ok(workspace)
    }

    async fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Workspace, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, slug, owner_user_id, created_at FROM workspaces WHERE id = ?",
        )
        .bind(workspace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        workspace_from_row(&row)
    }

    async fn get_workspace_by_slug(&self, slug: &str) -> Result<Workspace, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, slug, owner_user_id, created_at FROM workspaces WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        workspace_from_row(&row)
    }

    // ───────────────────────────────── Workspace memberships ──────────────────────────────

    async fn get_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<WorkspaceMembership, StoreError> {
        fetch_membership(&self.pool, workspace_id, user_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn list_workspace_memberships(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMembership>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships
             WHERE workspace_id = ? ORDER BY created_at, user_id"
        ))
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn add_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> Result<WorkspaceMembership, StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO workspace_memberships(workspace_id, user_id, role, status, created_at, updated_at)
             VALUES(?, ?, ?, 'active', ?, ?)",
        )
        .bind(workspace_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(WorkspaceMembership {
            workspace_id: workspace_id.clone(),
            user_id: user_id.clone(),
            role,
            status: MembershipStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_workspace_membership_role(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> Result<WorkspaceMembership, StoreError> {
        let result = sqlx::query(
            "UPDATE workspace_memberships SET role = ?, updated_at = ?
             WHERE workspace_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(ts(Utc::now()))
        .bind(workspace_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_workspace_membership(workspace_id, user_id).await
    }

    async fn set_workspace_membership_status(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: MembershipStatus,
    ) -> Result<WorkspaceMembership, StoreError> {
        let deactivated_at = match status {
            MembershipStatus::Active => None,
            MembershipStatus::Deactivated { at } => Some(ts(at)),
        };
        let result = sqlx::query(
            "UPDATE workspace_memberships SET status = ?, deactivated_at = ?, updated_at = ?
             WHERE workspace_id = ? AND user_id = ?",
        )
        .bind(status.as_str())
        .bind(deactivated_at)
        .bind(ts(Utc::now()))
        .bind(workspace_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_workspace_membership(workspace_id, user_id).await
    }

    async fn remove_workspace_membership(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let ws = workspace_id.to_string();
        let user = user_id.to_string();

        let mut tx = self.pool.begin().await.map_err(backend)?;
        let removed = sqlx::query(
            "DELETE FROM workspace_memberships WHERE workspace_id = ? AND user_id = ?",
        )
        .bind(&ws)
        .bind(&user)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if removed.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query(
            "DELETE FROM project_memberships WHERE user_id = ?
             AND project_id IN (SELECT id FROM projects WHERE workspace_id = ?)",
        )
        .bind(&user)
        .bind(&ws)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            "DELETE FROM grouping_members WHERE user_id = ?
             AND grouping_id IN (SELECT id FROM project_groupings WHERE workspace_id = ?)",
        )
        .bind(&user)
        .bind(&ws)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    // ───────────────────────────────────── Projects ───────────────────────────────────────

    async fn create_project(&self, params: &CreateProjectParams) -> Result<Project, StoreError> {
        let project = Project {
            id: ProjectId::new(),
            workspace_id: params.workspace_id.clone(),
            grouping_id: params.grouping_id.clone(),
            name: params.name.clone(),
            creator_id: params.creator_id.clone(),
            owner_id: params.owner_id.clone(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO projects(id, workspace_id, grouping_id, name, creator_id, owner_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(project.workspace_id.to_string())
        .bind(project.grouping_id.as_ref().map(|g| g.to_string()))
        .bind(&project.name)
        .bind(project.creator_id.as_ref().map(|u| u.to_string()))
        .bind(project.owner_id.as_ref().map(|u| u.to_string()))
        .bind(ts(project.created_at))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(project)
    }

    async fn get_project(&self, project_id: &ProjectId) -> Result<Project, StoreError> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;
        project_from_row(&row)
    }

    async fn list_projects(&self, workspace_id: &WorkspaceId) -> Result<Vec<Project>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE workspace_id = ? ORDER BY created_at, id"
        ))
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(project_from_row).collect()
    }

    async fn set_project_grouping(
        &self,
        project_id: &ProjectId,
        grouping_id: Option<GroupingId>,
    ) -> Result<Project, StoreError> {
        let result = sqlx::query("UPDATE projects SET grouping_id = ? WHERE id = ?")
            .bind(grouping_id.as_ref().map(|g| g.to_string()))
            .bind(project_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_project(project_id).await
    }

    // ───────────────────────────────── Project memberships ────────────────────────────────

    async fn get_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<ProjectMembership, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, user_id, role, created_at, updated_at FROM project_memberships
             WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        project_membership_from_row(&row)
    }

    async fn list_project_memberships(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ProjectMembership>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, user_id, role, created_at, updated_at FROM project_memberships
             WHERE project_id = ? ORDER BY created_at, user_id",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(project_membership_from_row).collect()
    }

    async fn set_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        role: Role,
    ) -> Result<ProjectMembership, StoreError> {
        let now = ts(Utc::now());
        sqlx::query(
            "INSERT INTO project_memberships(project_id, user_id, role, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(project_id, user_id) DO UPDATE
             SET role = excluded.role, updated_at = excluded.updated_at",
        )
        .bind(project_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        self.get_project_membership(project_id, user_id).await
    }

    async fn remove_project_membership(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM project_memberships WHERE project_id = ? AND user_id = ?")
                .bind(project_id.to_string())
                .bind(user_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────────────── Groupings ──────────────────────────────────────

    async fn create_grouping(
        &self,
        params: &CreateGroupingParams,
    ) -> Result<ProjectGrouping, StoreError> {
        let grouping = ProjectGrouping {
            id: GroupingId::new(),
            workspace_id: params.workspace_id.clone(),
            name: params.name.clone(),
            visibility: params.visibility,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO project_groupings(id, workspace_id, name, visibility, created_at)
             VALUES(?, ?, ?, ?, ?)",
        )
        .bind(grouping.id.to_string())
        .bind(grouping.workspace_id.to_string())
        .bind(&grouping.name)
        .bind(grouping.visibility.as_str())
        .bind(ts(grouping.created_at))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(grouping)
    }

    async fn get_grouping(&self, grouping_id: &GroupingId) -> Result<ProjectGrouping, StoreError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, visibility, created_at FROM project_groupings
             WHERE id = ?",
        )
        .bind(grouping_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        grouping_from_row(&row)
    }

    async fn get_grouping_by_name(
        &self,
        workspace_id: &WorkspaceId,
        name: &str,
    ) -> Result<ProjectGrouping, StoreError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, visibility, created_at FROM project_groupings
             WHERE workspace_id = ? AND name = ?",
        )
        .bind(workspace_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        grouping_from_row(&row)
    }

    async fn list_groupings(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<ProjectGrouping>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, visibility, created_at FROM project_groupings
             WHERE workspace_id = ? ORDER BY created_at, id",
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(grouping_from_row).collect()
    }

    async fn set_grouping_visibility(
        &self,
        grouping_id: &GroupingId,
        visibility: Visibility,
    ) -> Result<ProjectGrouping, StoreError> {
        let result = sqlx::query("UPDATE project_groupings SET visibility = ? WHERE id = ?")
            .bind(visibility.as_str())
            .bind(grouping_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_grouping(grouping_id).await
    }

    async fn add_grouping_member(
        &self,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<GroupingMember, StoreError> {
        let member = GroupingMember {
            grouping_id: grouping_id.clone(),
            user_id: user_id.clone(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO grouping_members(grouping_id, user_id, created_at) VALUES(?, ?, ?)",
        )
        .bind(grouping_id.to_string())
        .bind(user_id.to_string())
        .bind(ts(member.created_at))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(member)
    }

    async fn remove_grouping_member(
        &self,
        grouping_id: &GroupingId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM grouping_members WHERE grouping_id = ? AND user_id = ?")
                .bind(grouping_id.to_string())
                .bind(user_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_grouping_members(
        &self,
        grouping_id: &GroupingId,
    ) -> Result<Vec<GroupingMember>, StoreError> {
        let rows = sqlx::query(
            "SELECT grouping_id, user_id, created_at FROM grouping_members
             WHERE grouping_id = ? ORDER BY created_at, user_id",
        )
        .bind(grouping_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(grouping_member_from_row).collect()
    }

    // ───────────────────────────────────── Invites ────────────────────────────────────────

    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError> {
        let invite = Invite {
            id: InviteId::new(),
            workspace_id: params.workspace_id.clone(),
            email: normalize_email(&params.email),
            role: params.role,
            token: params.token.clone(),
            state: InviteState::Pending,
            created_by_user_id: params.created_by_user_id.clone(),
            created_at: Utc::now(),
            expires_at: params.expires_at,
        };
        sqlx::query(
            "INSERT INTO workspace_invites(id, workspace_id, email, role, token, state,
                 created_by_user_id, created_at, expires_at)
             VALUES(?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(invite.id.to_string())
        .bind(invite.workspace_id.to_string())
        .bind(&invite.email)
        .bind(invite.role.as_str())
        .bind(&invite.token)
        .bind(invite.created_by_user_id.to_string())
        .bind(ts(invite.created_at))
        .bind(ts(invite.expires_at))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(invite)
    }

    async fn get_invite(&self, invite_id: &InviteId) -> Result<Invite, StoreError> {
        fetch_invite(&self.pool, invite_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn get_invite_by_token(&self, token: &str) -> Result<Invite, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INVITE_COLUMNS} FROM workspace_invites WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;
        invite_from_row(&row)
    }

    async fn list_active_invites(
        &self,
        workspace_id: &WorkspaceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invite>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVITE_COLUMNS} FROM workspace_invites
             WHERE workspace_id = ? AND state = 'pending' AND expires_at > ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(workspace_id.to_string())
        .bind(ts(now))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(invite_from_row).collect()
    }

    async fn accept_invite(
        &self,
        params: &AcceptInviteParams,
    ) -> Result<AcceptedInvite, StoreError> {
        let now = ts(params.now);
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Only one acceptance can win the pending -> accepted transition.
        let claimed = sqlx::query(
            "UPDATE workspace_invites SET state = 'accepted', resolved_at = ?, accepted_by = ?
             WHERE id = ? AND state = 'pending' AND expires_at > ?",
        )
        .bind(now)
        .bind(params.user_id.to_string())
        .bind(params.invite_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        if claimed.rows_affected() == 0 {
            let exists = fetch_invite(&mut *tx, &params.invite_id).await?.is_some();
            tx.rollback().await.map_err(backend)?;
            return Err(if exists {
                StoreError::Conflict
            } else {
                StoreError::NotFound
            });
        }

        let invite = fetch_invite(&mut *tx, &params.invite_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let previous = fetch_membership(&mut *tx, &invite.workspace_id, &params.user_id).await?;
        let role = previous
            .as_ref()
            .map_or(invite.role, |m| m.role.max(invite.role));

        sqlx::query(
            "INSERT INTO workspace_memberships(workspace_id, user_id, role, status, deactivated_at, created_at, updated_at)
             VALUES(?, ?, ?, 'active', NULL, ?, ?)
             ON CONFLICT(workspace_id, user_id) DO UPDATE
             SET role = excluded.role, status = 'active', deactivated_at = NULL,
                 updated_at = excluded.updated_at",
        )
        .bind(invite.workspace_id.to_string())
        .bind(params.user_id.to_string())
        .bind(role.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        let membership = fetch_membership(&mut *tx, &invite.workspace_id, &params.user_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        tx.commit().await.map_err(backend)?;
        Ok(AcceptedInvite {
            invite,
            membership,
            previous,
        })
    }

    async fn revoke_invite(
        &self,
        invite_id: &InviteId,
        now: DateTime<Utc>,
    ) -> Result<Invite, StoreError> {
        let result = sqlx::query(
            "UPDATE workspace_invites SET state = 'revoked', resolved_at = ?
             WHERE id = ? AND state = 'pending' AND expires_at > ?",
        )
        .bind(ts(now))
        .bind(invite_id.to_string())
        .bind(ts(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        let invite = self.get_invite(invite_id).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(invite)
    }
}

// ───────────────────────────────────── Audit log ──────────────────────────────────────────

fn audit_err(e: sqlx::Error) -> AuditLogError {
    AuditLogError::Database(e.to_string())
}

fn json_col(row: &SqliteRow, name: &str) -> Result<Option<serde_json::Value>, AuditLogError> {
    row.try_get::<Option<String>, _>(name)
        .map_err(audit_err)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| AuditLogError::Database(e.to_string()))
}

fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, AuditLogError> {
    let text = |name: &str| row.try_get::<String, _>(name).map_err(audit_err);
    let uuid = |name: &str| {
        Uuid::try_parse(&text(name)?).map_err(|e| AuditLogError::Database(e.to_string()))
    };
    let created_at = row.try_get::<i64, _>("created_at").map_err(audit_err)?;
    Ok(AuditEntry {
        id: AuditLogId(uuid("id")?),
        workspace_id: uuid("workspace_id")?,
        acting_user_id: uuid("acting_user_id")?,
        action: text("action")?
            .parse::<AuditAction>()
            .map_err(AuditLogError::Database)?,
        entity_type: text("entity_type")?,
        entity_id: text("entity_id")?,
        old_value: json_col(row, "old_value")?,
        new_value: json_col(row, "new_value")?,
        metadata: json_col(row, "metadata")?,
        created_at: DateTime::from_timestamp_micros(created_at).ok_or_else(|| {
            AuditLogError::Database(format!("timestamp out of range: {created_at}"))
        })?,
    })
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &AuditLogFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(ws) = &filter.workspace_id {
        qb.push(" AND workspace_id = ").push_bind(ws.to_string());
    }
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(user) = &filter.user_id {
        qb.push(" AND acting_user_id = ").push_bind(user.to_string());
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }
}

#[async_trait::async_trait]
impl AuditLog for SqliteStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditLogError> {
        sqlx::query(&format!(
            "INSERT INTO audit_log({AUDIT_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(entry.id.to_string())
        .bind(entry.workspace_id.to_string())
        .bind(entry.acting_user_id.to_string())
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.old_value.as_ref().map(|v| v.to_string()))
        .bind(entry.new_value.as_ref().map(|v| v.to_string()))
        .bind(entry.metadata.as_ref().map(|v| v.to_string()))
        .bind(entry.created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(audit_err)?;
        Ok(())
    }

    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEntry>, AuditLogError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_log"));
        push_filter(&mut qb, &filter);
        qb.push(" ORDER BY created_at DESC, id DESC");
        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        qb.push(" LIMIT ")
            .push_bind(filter.limit.map_or(-1, i64::from));
        qb.push(" OFFSET ")
            .push_bind(i64::from(filter.offset.unwrap_or(0)));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(audit_err)?;
        rows.iter().map(audit_entry_from_row).collect()
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEntry, AuditLogError> {
        let row = sqlx::query(&format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(audit_err)?
            .ok_or(AuditLogError::NotFound(id))?;
        audit_entry_from_row(&row)
    }

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM audit_log");
        push_filter(&mut qb, &filter);
        let count: i64 = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(audit_err)?
            .try_get(0)
            .map_err(audit_err)?;
        Ok(count as u64)
    }
}
