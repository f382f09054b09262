use clap::{Parser, Subcommand};
use gatehouse_access::EngineConfig;
use gatehouse_storage::{GroupingId, InviteId, ProjectId, Role, Visibility};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Context;

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "gatehouse-admin")]
#[command(about = "Administer gatehouse workspaces, memberships and invites")]
struct Cli {
    /// SQLite database URL
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        default_value = "sqlite:gatehouse.db?mode=rwc"
    )]
    database_url: String,

    /// Use a throwaway in-memory database instead of DATABASE_URL
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Email of the user performing the command
    #[arg(long = "as", global = true, env = "GATEHOUSE_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// User commands
    User {
        #[command(subcommand)]
        user_cmd: UserCommand,
    },
    /// Workspace commands
    Workspace {
        #[command(subcommand)]
        workspace_cmd: WorkspaceCommand,
    },
    /// Workspace and project membership commands
    Member {
        #[command(subcommand)]
        member_cmd: MemberCommand,
    },
    /// Invite commands
    Invite {
        #[command(subcommand)]
        invite_cmd: InviteCommand,
    },
    /// Project grouping commands
    Grouping {
        #[command(subcommand)]
        grouping_cmd: GroupingCommand,
    },
    /// Project commands
    Project {
        #[command(subcommand)]
        project_cmd: ProjectCommand,
    },
    /// Check whether the actor holds a role in a workspace or project
    Check {
        /// Workspace slug
        workspace: String,
        /// Accepted roles (any one is enough)
        #[arg(required = true)]
        roles: Vec<Role>,
        /// Check at project scope instead of workspace scope
        #[arg(long)]
        project: Option<ProjectId>,
    },
    /// Show the audit history of a workspace, newest first
    History {
        /// Workspace slug
        workspace: String,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        action: Option<gatehouse_audit::AuditAction>,
        /// Only entries made by this user (email)
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a user
    Create {
        /// Email address
        email: String,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommand {
    /// Create a workspace owned by the actor
    Create {
        /// Display name
        name: String,
        /// Unique slug (lowercase letters, digits, dashes)
        slug: String,
    },
    /// List the members of a workspace
    Members {
        /// Workspace slug
        workspace: String,
    },
}

#[derive(Subcommand)]
enum MemberCommand {
    /// Change a member's workspace role
    Role {
        workspace: String,
        email: String,
        role: Role,
    },
    /// Remove a member from a workspace
    Remove { workspace: String, email: String },
    /// Deactivate a member without removing them
    Deactivate { workspace: String, email: String },
    /// Reactivate a deactivated member
    Activate { workspace: String, email: String },
    /// Grant or change a project role
    ProjectRole {
        project_id: ProjectId,
        email: String,
        role: Role,
    },
    /// Remove a project role
    ProjectRemove { project_id: ProjectId, email: String },
}

#[derive(Subcommand)]
enum InviteCommand {
    /// Invite an email address to a workspace
    Issue {
        /// Workspace slug
        workspace: String,
        email: String,
        #[arg(default_value = "member")]
        role: Role,
    },
    /// Accept an invite as the actor
    Accept { token: String },
    /// Revoke a pending invite
    Revoke { invite_id: InviteId },
    /// List pending, unexpired invites
    List { workspace: String },
    /// Show an invite and its status
    Show { token: String },
}

#[derive(Subcommand)]
enum GroupingCommand {
    /// Create a grouping
    Create {
        workspace: String,
        name: String,
        #[arg(long, default_value = "public")]
        visibility: Visibility,
    },
    /// List groupings (creates the default one if there are none)
    List { workspace: String },
    /// Change who is eligible for assignment in the grouping's projects
    Visibility {
        grouping_id: GroupingId,
        visibility: Visibility,
    },
    /// Add a workspace member to a grouping
    AddMember { grouping_id: GroupingId, email: String },
    /// Remove a member from a grouping
    RemoveMember { grouping_id: GroupingId, email: String },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// List the projects of a workspace
    List { workspace: String },
    /// Create a project owned by the actor
    Create {
        workspace: String,
        name: String,
        /// Target grouping (defaults to the workspace's default grouping)
        #[arg(long)]
        grouping: Option<GroupingId>,
    },
    /// Move a project to another grouping, or out of any with no --grouping
    Move {
        project_id: ProjectId,
        #[arg(long)]
        grouping: Option<GroupingId>,
    },
    /// List users who may be assigned work in a project
    Assignable { project_id: ProjectId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let ctx = if cli.ephemeral {
        tracing::warn!("using an in-memory database; nothing will be persisted");
        Context::ephemeral(config, cli.actor).await?
    } else {
        Context::open(&cli.database_url, config, cli.actor).await?
    };

    let result = run(&ctx, cli.command).await;
    ctx.close().await;
    result
}

async fn run(ctx: &Context, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::User { user_cmd } => match user_cmd {
            UserCommand::Create { email } => commands::cmd_user_create(ctx, &email).await,
        },
        Command::Workspace { workspace_cmd } => match workspace_cmd {
            WorkspaceCommand::Create { name, slug } => {
                commands::cmd_workspace_create(ctx, &name, &slug).await
            }
            WorkspaceCommand::Members { workspace } => {
                commands::cmd_workspace_members(ctx, &workspace).await
            }
        },
        Command::Member { member_cmd } => match member_cmd {
            MemberCommand::Role {
                workspace,
                email,
                role,
            } => commands::cmd_member_role(ctx, &workspace, &email, role).await,
            MemberCommand::Remove { workspace, email } => {
                commands::cmd_member_remove(ctx, &workspace, &email).await
            }
            MemberCommand::Deactivate { workspace, email } => {
                commands::cmd_member_set_active(ctx, &workspace, &email, false).await
            }
            MemberCommand::Activate { workspace, email } => {
                commands::cmd_member_set_active(ctx, &workspace, &email, true).await
            }
            MemberCommand::ProjectRole {
                project_id,
                email,
                role,
            } => commands::cmd_project_member_role(ctx, &project_id, &email, role).await,
            MemberCommand::ProjectRemove { project_id, email } => {
                commands::cmd_project_member_remove(ctx, &project_id, &email).await
            }
        },
        Command::Invite { invite_cmd } => match invite_cmd {
            InviteCommand::Issue {
                workspace,
                email,
                role,
            } => commands::cmd_invite_issue(ctx, &workspace, &email, role).await,
            InviteCommand::Accept { token } => commands::cmd_invite_accept(ctx, &token).await,
            InviteCommand::Revoke { invite_id } => {
                commands::cmd_invite_revoke(ctx, &invite_id).await
            }
            InviteCommand::List { workspace } => commands::cmd_invite_list(ctx, &workspace).await,
            InviteCommand::Show { token } => commands::cmd_invite_show(ctx, &token).await,
        },
        Command::Grouping { grouping_cmd } => match grouping_cmd {
            GroupingCommand::Create {
                workspace,
                name,
                visibility,
            } => commands::cmd_grouping_create(ctx, &workspace, &name, visibility).await,
            GroupingCommand::List { workspace } => {
                commands::cmd_grouping_list(ctx, &workspace).await
            }
            GroupingCommand::Visibility {
                grouping_id,
                visibility,
            } => commands::cmd_grouping_visibility(ctx, &grouping_id, visibility).await,
            GroupingCommand::AddMember { grouping_id, email } => {
                commands::cmd_grouping_member(ctx, &grouping_id, &email, true).await
            }
            GroupingCommand::RemoveMember { grouping_id, email } => {
                commands::cmd_grouping_member(ctx, &grouping_id, &email, false).await
            }
        },
        Command::Project { project_cmd } => match project_cmd {
            ProjectCommand::List { workspace } => {
                commands::cmd_project_list(ctx, &workspace).await
            }
            ProjectCommand::Create {
                workspace,
                name,
                grouping,
            } => commands::cmd_project_create(ctx, &workspace, &name, grouping).await,
            ProjectCommand::Move {
                project_id,
                grouping,
            } => commands::cmd_project_move(ctx, &project_id, grouping).await,
            ProjectCommand::Assignable { project_id } => {
                commands::cmd_project_assignable(ctx, &project_id).await
            }
        },
        Command::Check {
            workspace,
            roles,
            project,
        } => commands::cmd_check(ctx, &workspace, &roles, project).await,
        Command::History {
            workspace,
            entity_type,
            entity_id,
            action,
            user,
            limit,
            offset,
        } => {
            let filter = commands::HistoryFilter {
                entity_type,
                entity_id,
                action,
                user,
                limit,
                offset,
            };
            commands::cmd_history(ctx, &workspace, filter).await
        }
    }
}
