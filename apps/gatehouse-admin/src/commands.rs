//! Command handlers. Each resolves emails and slugs to ids, calls the
//! engine and prints a short human-readable result.

use std::sync::Arc;

use gatehouse_access::{AccessEngine, EngineConfig, Scope};
use gatehouse_audit::{AuditAction, AuditLogFilter};
use gatehouse_storage::{
    GroupingId, InviteId, ProjectId, Role, Store, StoreError, User, Visibility, Workspace,
};
use gatehouse_store_sqlite::SqliteStore;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub struct Context {
    pub engine: AccessEngine,
    store: Arc<SqliteStore>,
    actor_email: Option<String>,
}

impl Context {
    pub async fn open(
        database_url: &str,
        config: EngineConfig,
        actor_email: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(SqliteStore::open(database_url).await?);
        Ok(Self::with_store(store, config, actor_email))
    }

    pub async fn ephemeral(
        config: EngineConfig,
        actor_email: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(SqliteStore::open_in_memory().await?);
        Ok(Self::with_store(store, config, actor_email))
    }

    fn with_store(
        store: Arc<SqliteStore>,
        config: EngineConfig,
        actor_email: Option<String>,
    ) -> Self {
        let engine = AccessEngine::new(store.clone(), store.clone(), config);
        Self {
            engine,
            store,
            actor_email,
        }
    }

    /// Drain pending audit entries, then close the database.
    pub async fn close(&self) {
        self.engine.flush().await;
        self.store.close().await;
    }

    async fn actor(&self) -> Result<User, Box<dyn std::error::Error>> {
        let email = self
            .actor_email
            .as_deref()
            .ok_or("this command needs --as <email> (or GATEHOUSE_ACTOR)")?;
        self.user(email).await
    }

    async fn user(&self, email: &str) -> Result<User, Box<dyn std::error::Error>> {
        self.store
            .get_user_by_email(email)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => format!("User '{}' not found", email).into(),
                other => other.into(),
            })
    }

    async fn workspace(&self, slug: &str) -> Result<Workspace, Box<dyn std::error::Error>> {
        self.store
            .get_workspace_by_slug(slug)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => format!("Workspace '{}' not found", slug).into(),
                other => other.into(),
            })
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

// ───────────────────────────────────── Users & workspaces ─────────────────────────────

pub async fn cmd_user_create(ctx: &Context, email: &str) -> CmdResult {
    let user = ctx.store.create_user(email).await?;
    println!("✓ User created: {} ({})", user.email, user.id);
    Ok(())
}

pub async fn cmd_workspace_create(ctx: &Context, name: &str, slug: &str) -> CmdResult {
    let owner = ctx.actor().await?;
    let workspace = ctx.engine.create_workspace(&owner.id, name, slug).await?;
    println!("✓ Workspace created: {} ({})", workspace.slug, workspace.id);
    println!("  Owner: {}", owner.email);
    Ok(())
}

pub async fn cmd_workspace_members(ctx: &Context, slug: &str) -> CmdResult {
    let workspace = ctx.workspace(slug).await?;
    let memberships = ctx.store.list_workspace_memberships(&workspace.id).await?;
    let ids: Vec<_> = memberships.iter().map(|m| m.user_id.clone()).collect();
    let users = ctx.store.list_users(&ids).await?;

    println!("Members of {}:", workspace.slug);
    for membership in &memberships {
        let email = users
            .iter()
            .find(|u| u.id == membership.user_id)
            .map_or("<unknown>", |u| u.email.as_str());
        println!(
            "  {:<32} {:<8} {}",
            email,
            membership.role.as_str(),
            membership.status.as_str()
        );
    }
    Ok(())
}

// ───────────────────────────────────── Memberships ────────────────────────────────────

pub async fn cmd_member_role(ctx: &Context, slug: &str, email: &str, role: Role) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let target = ctx.user(email).await?;
    let membership = ctx
        .engine
        .change_member_role(&actor.id, &workspace.id, &target.id, role)
        .await?;
    println!("✓ {} is now {} in {}", email, membership.role, workspace.slug);
    Ok(())
}

pub async fn cmd_member_remove(ctx: &Context, slug: &str, email: &str) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let target = ctx.user(email).await?;
    ctx.engine
        .remove_member(&actor.id, &workspace.id, &target.id)
        .await?;
    println!("✓ {} removed from {}", email, workspace.slug);
    Ok(())
}

pub async fn cmd_member_set_active(
    ctx: &Context,
    slug: &str,
    email: &str,
    active: bool,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let target = ctx.user(email).await?;
    let membership = if active {
        ctx.engine
            .activate_member(&actor.id, &workspace.id, &target.id)
            .await?
    } else {
        ctx.engine
            .deactivate_member(&actor.id, &workspace.id, &target.id)
            .await?
    };
    println!(
        "✓ {} is {} in {}",
        email,
        membership.status.as_str(),
        workspace.slug
    );
    Ok(())
}

pub async fn cmd_project_member_role(
    ctx: &Context,
    project_id: &ProjectId,
    email: &str,
    role: Role,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let target = ctx.user(email).await?;
    let membership = ctx
        .engine
        .set_project_member_role(&actor.id, project_id, &target.id, role)
        .await?;
    println!("✓ {} is now {} on project {}", email, membership.role, project_id);
    Ok(())
}

pub async fn cmd_project_member_remove(
    ctx: &Context,
    project_id: &ProjectId,
    email: &str,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let target = ctx.user(email).await?;
    ctx.engine
        .remove_project_member(&actor.id, project_id, &target.id)
        .await?;
    println!("✓ {} removed from project {}", email, project_id);
    Ok(())
}

// ───────────────────────────────────── Invites ────────────────────────────────────────

pub async fn cmd_invite_issue(ctx: &Context, slug: &str, email: &str, role: Role) -> CmdResult {
    let issuer = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let invite = ctx
        .engine
        .issue_invite(&issuer.id, &workspace.id, email, role)
        .await?;
    println!("✓ Invite created for {} as {}\n", invite.email, invite.role);
    println!("Invite ID: {}", invite.id);
    println!("Token:     {}", invite.token);
    println!("Expires:   {}", invite.expires_at);
    Ok(())
}

pub async fn cmd_invite_accept(ctx: &Context, token: &str) -> CmdResult {
    let user = ctx.actor().await?;
    let membership = ctx.engine.accept_invite(token, &user.id).await?;
    let workspace = ctx.store.get_workspace(&membership.workspace_id).await?;
    println!(
        "✓ {} joined {} as {}",
        user.email, workspace.slug, membership.role
    );
    Ok(())
}

pub async fn cmd_invite_revoke(ctx: &Context, invite_id: &InviteId) -> CmdResult {
    let issuer = ctx.actor().await?;
    let invite = ctx.engine.revoke_invite(&issuer.id, invite_id).await?;
    println!("✓ Invite for {} revoked", invite.email);
    Ok(())
}

pub async fn cmd_invite_list(ctx: &Context, slug: &str) -> CmdResult {
    let workspace = ctx.workspace(slug).await?;
    let invites = ctx.engine.list_active_invites(&workspace.id).await?;
    if invites.is_empty() {
        println!("No pending invites.");
        return Ok(());
    }
    println!("{:<38} {:<32} {:<8} EXPIRES", "ID", "EMAIL", "ROLE");
    for invite in invites {
        println!(
            "{:<38} {:<32} {:<8} {}",
            invite.id.to_string(),
            invite.email,
            invite.role.as_str(),
            invite.expires_at
        );
    }
    Ok(())
}

pub async fn cmd_invite_show(ctx: &Context, token: &str) -> CmdResult {
    let view = ctx.engine.get_invite_by_token(token).await?;
    let workspace = ctx.store.get_workspace(&view.invite.workspace_id).await?;
    println!("Workspace: {}", workspace.slug);
    println!("Email:     {}", view.invite.email);
    println!("Role:      {}", view.invite.role);
    println!("Status:    {}", view.status.as_str());
    println!("Expires:   {}", view.invite.expires_at);
    Ok(())
}

// ───────────────────────────────────── Groupings & projects ───────────────────────────

pub async fn cmd_grouping_create(
    ctx: &Context,
    slug: &str,
    name: &str,
    visibility: Visibility,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let grouping = ctx
        .engine
        .create_grouping(&actor.id, &workspace.id, name, visibility)
        .await?;
    println!(
        "✓ Grouping created: {} ({}, {})",
        grouping.name,
        grouping.visibility.as_str(),
        grouping.id
    );
    Ok(())
}

pub async fn cmd_grouping_list(ctx: &Context, slug: &str) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let groupings = ctx.engine.list_groupings(&actor.id, &workspace.id).await?;
    for grouping in groupings {
        println!(
            "{:<38} {:<24} {}",
            grouping.id.to_string(),
            grouping.name,
            grouping.visibility.as_str()
        );
    }
    Ok(())
}

pub async fn cmd_grouping_visibility(
    ctx: &Context,
    grouping_id: &GroupingId,
    visibility: Visibility,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let grouping = ctx
        .engine
        .set_grouping_visibility(&actor.id, grouping_id, visibility)
        .await?;
    println!(
        "✓ Grouping {} is now {}",
        grouping.name,
        grouping.visibility.as_str()
    );
    Ok(())
}

pub async fn cmd_grouping_member(
    ctx: &Context,
    grouping_id: &GroupingId,
    email: &str,
    add: bool,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let target = ctx.user(email).await?;
    if add {
        ctx.engine
            .add_grouping_member(&actor.id, grouping_id, &target.id)
            .await?;
        println!("✓ {} added to grouping {}", email, grouping_id);
    } else {
        ctx.engine
            .remove_grouping_member(&actor.id, grouping_id, &target.id)
            .await?;
        println!("✓ {} removed from grouping {}", email, grouping_id);
    }
    Ok(())
}

pub async fn cmd_project_list(ctx: &Context, slug: &str) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let projects = ctx.engine.list_projects(&actor.id, &workspace.id).await?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }
    for project in projects {
        let grouping = project
            .grouping_id
            .as_ref()
            .map_or_else(|| "-".to_string(), |g| g.to_string());
        println!("{:<38} {:<24} {}", project.id.to_string(), project.name, grouping);
    }
    Ok(())
}

pub async fn cmd_project_create(
    ctx: &Context,
    slug: &str,
    name: &str,
    grouping: Option<GroupingId>,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let project = ctx
        .engine
        .create_project(&actor.id, &workspace.id, name, grouping)
        .await?;
    println!("✓ Project created: {} ({})", project.name, project.id);
    Ok(())
}

pub async fn cmd_project_move(
    ctx: &Context,
    project_id: &ProjectId,
    grouping: Option<GroupingId>,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let project = ctx
        .engine
        .move_project(&actor.id, project_id, grouping)
        .await?;
    match &project.grouping_id {
        Some(id) => println!("✓ Project {} moved to grouping {}", project.name, id),
        None => println!("✓ Project {} no longer belongs to a grouping", project.name),
    }
    Ok(())
}

pub async fn cmd_project_assignable(ctx: &Context, project_id: &ProjectId) -> CmdResult {
    let users = ctx.engine.assignable_users(project_id).await?;
    if users.is_empty() {
        println!("Nobody can be assigned work in this project.");
    }
    for user in users {
        println!("{:<38} {}", user.user_id.to_string(), user.email);
    }
    Ok(())
}

// ───────────────────────────────────── Checks & history ───────────────────────────────

pub async fn cmd_check(
    ctx: &Context,
    slug: &str,
    roles: &[Role],
    project: Option<ProjectId>,
) -> CmdResult {
    let actor = ctx.actor().await?;
    let workspace = ctx.workspace(slug).await?;
    let scope = project.map_or(Scope::Workspace, Scope::Project);
    let allowed = ctx
        .engine
        .assert_access(&actor.id, &workspace.id, &scope, roles)
        .await
        .is_ok();
    println!("allowed: {}", yes_no(allowed));
    if !allowed {
        return Err(format!("{} lacks the required role", actor.email).into());
    }
    Ok(())
}

pub struct HistoryFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub user: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

pub async fn cmd_history(ctx: &Context, slug: &str, args: HistoryFilter) -> CmdResult {
    let workspace = ctx.workspace(slug).await?;
    let mut filter = AuditLogFilter::new().limit(args.limit).offset(args.offset);
    if let Some(entity_type) = args.entity_type {
        filter = filter.entity_type(entity_type);
    }
    if let Some(entity_id) = args.entity_id {
        filter = filter.entity_id(entity_id);
    }
    if let Some(action) = args.action {
        filter = filter.action(action);
    }
    if let Some(email) = &args.user {
        filter = filter.user_id(ctx.user(email).await?.id);
    }

    let entries = ctx.engine.history(&workspace.id, filter).await?;
    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<16} {:<28} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            entry.entity_type,
            entry.entity_id
        );
        if let Some(metadata) = &entry.metadata {
            println!("    {}", metadata);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_and_workspace_are_not_found() {
        let ctx = Context::ephemeral(EngineConfig::default(), None).await.unwrap();
        let err = ctx.user("nobody@example.com").await.unwrap_err();
        assert_eq!(err.to_string(), "User 'nobody@example.com' not found");
        let err = ctx.workspace("acme").await.unwrap_err();
        assert_eq!(err.to_string(), "Workspace 'acme' not found");
    }

    #[tokio::test]
    async fn test_backend_failures_are_not_reported_as_not_found() {
        let ctx = Context::ephemeral(EngineConfig::default(), None).await.unwrap();
        ctx.close().await;

        let err = ctx.user("nobody@example.com").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Backend(_))
        ));
        let err = ctx.workspace("acme").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Backend(_))
        ));
    }
}
