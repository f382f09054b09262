mod common;

use common::setup;
use gatehouse_access::{AccessError, AssignmentChange};
use gatehouse_audit::{entity, AuditAction, AuditLogFilter};
use gatehouse_storage::{ProjectId, Role, Store, Visibility};

fn emails(users: &[gatehouse_storage::UserSummary]) -> Vec<&str> {
    users.iter().map(|u| u.email.as_str()).collect()
}

#[tokio::test]
async fn legacy_project_is_open_to_all_workspace_members() {
    let h = setup().await;
    h.member("a@example.com", Role::Viewer).await;
    h.member("b@example.com", Role::Member).await;
    h.user("outsider@example.com").await;
    let project = h.project("legacy", None, None).await;

    let users = h.engine.assignable_users(&project.id).await.unwrap();
    assert_eq!(
        emails(&users),
        vec!["a@example.com", "b@example.com", "owner@example.com"]
    );
}

#[tokio::test]
async fn public_grouping_ignores_grouping_membership() {
    let h = setup().await;
    let a = h.member("a@example.com", Role::Member).await;
    h.member("b@example.com", Role::Member).await;
    let grouping = h
        .engine
        .create_grouping(&h.owner.id, h.ws(), "Open", Visibility::Public)
        .await
        .unwrap();
    h.engine
        .add_grouping_member(&h.owner.id, &grouping.id, &a.id)
        .await
        .unwrap();
    let project = h.project("open", Some(grouping.id), None).await;

    let users = h.engine.assignable_users(&project.id).await.unwrap();
    assert_eq!(
        emails(&users),
        vec!["a@example.com", "b@example.com", "owner@example.com"]
    );
}

#[tokio::test]
async fn targeted_grouping_unions_members_creator_and_owner() {
    let h = setup().await;
    let a = h.member("a@example.com", Role::Member).await;
    let b = h.member("b@example.com", Role::Member).await;
    let c = h.member("c@example.com", Role::Member).await;
    let creator = h.member("creator@example.com", Role::Member).await;
    let owner = h.member("powner@example.com", Role::Member).await;
    h.member("bystander@example.com", Role::Member).await;

    let grouping = h
        .engine
        .create_grouping(&h.owner.id, h.ws(), "Secret", Visibility::Targeted)
        .await
        .unwrap();
    for user in [&a, &b] {
        h.engine
            .add_grouping_member(&h.owner.id, &grouping.id, &user.id)
            .await
            .unwrap();
    }
    let project = h
        .store
        .create_project(&gatehouse_storage::CreateProjectParams {
            workspace_id: h.ws().clone(),
            grouping_id: Some(grouping.id.clone()),
            name: "secret".into(),
            creator_id: Some(creator.id.clone()),
            owner_id: Some(owner.id.clone()),
        })
        .await
        .unwrap();
    for user in [&b, &c] {
        h.store
            .set_project_membership(&project.id, &user.id, Role::Member)
            .await
            .unwrap();
    }

    let users = h.engine.assignable_users(&project.id).await.unwrap();
    assert_eq!(
        emails(&users),
        vec![
            "a@example.com",
            "b@example.com",
            "c@example.com",
            "creator@example.com",
            "powner@example.com",
        ]
    );
}

#[tokio::test]
async fn deactivated_members_are_not_assignable() {
    let h = setup().await;
    let a = h.member("a@example.com", Role::Member).await;
    let project = h.project("legacy", None, None).await;
    h.engine
        .deactivate_member(&h.owner.id, h.ws(), &a.id)
        .await
        .unwrap();

    let users = h.engine.assignable_users(&project.id).await.unwrap();
    assert_eq!(emails(&users), vec!["owner@example.com"]);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let h = setup().await;
    let err = h
        .engine
        .assignable_users(&ProjectId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)));
}

#[tokio::test]
async fn assignment_is_revalidated_against_the_eligible_set() {
    let h = setup().await;
    let insider = h.member("insider@example.com", Role::Member).await;
    let outsider = h.member("outsider@example.com", Role::Member).await;
    let grouping = h
        .engine
        .create_grouping(&h.owner.id, h.ws(), "Secret", Visibility::Targeted)
        .await
        .unwrap();
    h.engine
        .add_grouping_member(&h.owner.id, &grouping.id, &insider.id)
        .await
        .unwrap();
    let project = h.project("secret", Some(grouping.id), None).await;

    h.engine
        .authorize_assignment(&h.owner.id, &project.id, &insider.id)
        .await
        .unwrap();
    let err = h
        .engine
        .authorize_assignment(&h.owner.id, &project.id, &outsider.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));

    // Outsider has no project role, so they cannot assign either.
    let err = h
        .engine
        .authorize_assignment(&outsider.id, &project.id, &insider.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));
}

#[tokio::test]
async fn assignments_are_audited_with_both_assignees() {
    let h = setup().await;
    let a = h.member("a@example.com", Role::Member).await;
    let project = h.project("site", None, None).await;

    h.engine
        .record_assignment(
            &h.owner.id,
            &project.id,
            &AssignmentChange {
                item_id: "task-1".into(),
                previous: None,
                next: Some(a.id.clone()),
            },
        )
        .await
        .unwrap();
    h.engine
        .record_assignment(
            &h.owner.id,
            &project.id,
            &AssignmentChange {
                item_id: "task-1".into(),
                previous: Some(a.id.clone()),
                next: None,
            },
        )
        .await
        .unwrap();

    let entries = h
        .history(
            AuditLogFilter::new()
                .entity_type(entity::WORK_ITEM)
                .entity_id("task-1"),
        )
        .await;
    let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Unassign, AuditAction::Assign]);
    assert_eq!(
        entries[0].old_value.as_ref().unwrap()["assignee"],
        a.id.to_string()
    );
    assert!(entries[0].new_value.as_ref().unwrap()["assignee"].is_null());
}
