//! JSON snapshots stored as old/new values in audit entries.

use gatehouse_storage::{
    Invite, Project, ProjectGrouping, ProjectMembership, Workspace, WorkspaceMembership,
};
use serde_json::{json, Value};

pub(crate) fn workspace(ws: &Workspace) -> Value {
    json!({
        "name": ws.name,
        "slug": ws.slug,
        "owner_user_id": ws.owner_user_id.to_string(),
    })
}

pub(crate) fn membership(m: &WorkspaceMembership) -> Value {
    json!({
        "user_id": m.user_id.to_string(),
        "role": m.role.as_str(),
        "status": m.status.as_str(),
    })
}

pub(crate) fn project(p: &Project) -> Value {
    json!({
        "name": p.name,
        "grouping_id": p.grouping_id.as_ref().map(|g| g.to_string()),
        "creator_id": p.creator_id.as_ref().map(|u| u.to_string()),
        "owner_id": p.owner_id.as_ref().map(|u| u.to_string()),
    })
}

pub(crate) fn project_membership(m: &ProjectMembership) -> Value {
    json!({
        "user_id": m.user_id.to_string(),
        "role": m.role.as_str(),
    })
}

pub(crate) fn grouping(g: &ProjectGrouping) -> Value {
    json!({
        "name": g.name,
        "visibility": g.visibility.as_str(),
    })
}

// Never includes the token.
pub(crate) fn invite(i: &Invite) -> Value {
    json!({
        "email": i.email,
        "role": i.role.as_str(),
        "state": i.state.as_str(),
        "expires_at": i.expires_at.to_rfc3339(),
    })
}
