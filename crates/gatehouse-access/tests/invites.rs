mod common;

use chrono::{Duration, Utc};
use common::{setup, setup_with, test_config};
use gatehouse_access::{AccessError, EngineConfig};
use gatehouse_audit::{entity, AuditAction};
use gatehouse_storage::{InviteState, InviteStatus, Role, Store};

#[tokio::test]
async fn owner_invites_are_rejected_for_every_issuer() {
    let h = setup().await;
    let admin = h.member("admin@example.com", Role::Admin).await;
    let viewer = h.member("viewer@example.com", Role::Viewer).await;

    for issuer in [&h.owner.id, &admin.id, &viewer.id] {
        let err = h
            .engine
            .issue_invite(issuer, h.ws(), "new@example.com", Role::Owner)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Conflict(_)), "{err:?}");
    }
}

#[tokio::test]
async fn only_owners_and_admins_issue_invites() {
    let h = setup().await;
    let admin = h.member("admin@example.com", Role::Admin).await;
    let member = h.member("member@example.com", Role::Member).await;

    let invite = h
        .engine
        .issue_invite(&admin.id, h.ws(), "New@Example.com", Role::Member)
        .await
        .unwrap();
    assert_eq!(invite.email, "new@example.com");
    assert_eq!(invite.token.len(), 64);
    assert_eq!(invite.state, InviteState::Pending);
    let ttl = invite.expires_at - invite.created_at;
    assert!(ttl > Duration::days(7) - Duration::minutes(1) && ttl <= Duration::days(7));

    let err = h
        .engine
        .issue_invite(&member.id, h.ws(), "other@example.com", Role::Viewer)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));

    let err = h
        .engine
        .issue_invite(&admin.id, h.ws(), "not-an-email", Role::Viewer)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::InvalidArgument(_)));
}

#[tokio::test]
async fn duplicate_pending_invites_are_allowed() {
    let h = setup().await;
    let first = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "dup@example.com", Role::Member)
        .await
        .unwrap();
    let second = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "dup@example.com", Role::Viewer)
        .await
        .unwrap();
    assert_ne!(first.token, second.token);
    assert_eq!(h.engine.list_active_invites(h.ws()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn accepting_twice_fails_the_second_time() {
    let h = setup().await;
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();
    let user = h.user("NEW@example.com").await;

    let membership = h.engine.accept_invite(&invite.token, &user.id).await.unwrap();
    assert_eq!(membership.role, Role::Member);
    assert!(membership.is_active());

    let stored = h.store.get_invite(&invite.id).await.unwrap();
    assert!(matches!(stored.state, InviteState::Accepted { ref by, .. } if *by == user.id));

    let err = h
        .engine
        .accept_invite(&invite.token, &user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Conflict(_)));
    assert_eq!(
        h.engine.workspace_role(&user.id, h.ws()).await.unwrap(),
        Some(Role::Member)
    );
    assert_eq!(
        h.actions(entity::WORKSPACE_MEMBERSHIP).await,
        vec![AuditAction::Create]
    );
}

#[tokio::test]
async fn email_must_match_the_invite() {
    let h = setup().await;
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();
    let someone_else = h.user("else@example.com").await;

    let err = h
        .engine
        .accept_invite(&invite.token, &someone_else.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));

    let err = h
        .engine
        .accept_invite("no-such-token", &someone_else.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)));
}

#[tokio::test]
async fn revoked_invite_cannot_be_accepted_and_accepted_cannot_be_revoked() {
    let h = setup().await;
    let user = h.user("new@example.com").await;

    let pending = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();
    let revoked = h.engine.revoke_invite(&h.owner.id, &pending.id).await.unwrap();
    assert!(matches!(revoked.state, InviteState::Revoked { .. }));
    let err = h
        .engine
        .accept_invite(&pending.token, &user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Conflict(_)));
    let err = h
        .engine
        .revoke_invite(&h.owner.id, &pending.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Conflict(_)));

    let accepted = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();
    h.engine.accept_invite(&accepted.token, &user.id).await.unwrap();
    let err = h
        .engine
        .revoke_invite(&h.owner.id, &accepted.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Conflict(_)));

    // Rows are kept for the audit trail.
    assert!(h.store.get_invite(&pending.id).await.is_ok());
}

#[tokio::test]
async fn revoke_requires_admin_of_the_invites_workspace() {
    let h = setup().await;
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();

    let other_owner = h.user("boss@example.com").await;
    h.engine
        .create_workspace(&other_owner.id, "Other", "other")
        .await
        .unwrap();
    let err = h
        .engine
        .revoke_invite(&other_owner.id, &invite.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));

    let member = h.member("member@example.com", Role::Member).await;
    let err = h
        .engine
        .revoke_invite(&member.id, &invite.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)));
}

#[tokio::test]
async fn expired_invites_are_hidden_and_cannot_be_accepted() {
    let h = setup().await;
    let user = h.user("late@example.com").await;
    let expired = h
        .seed_invite(
            "late@example.com",
            Role::Member,
            "expired-token",
            Utc::now() - Duration::hours(1),
        )
        .await;
    let live = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "fresh@example.com", Role::Viewer)
        .await
        .unwrap();

    let active = h.engine.list_active_invites(h.ws()).await.unwrap();
    let ids: Vec<_> = active.iter().map(|i| i.id.clone()).collect();
    assert_eq!(ids, vec![live.id]);

    let view = h.engine.get_invite_by_token("expired-token").await.unwrap();
    assert_eq!(view.status, InviteStatus::Expired);
    assert_eq!(view.invite.state, InviteState::Pending);

    let err = h
        .engine
        .accept_invite("expired-token", &user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Expired));

    // Expiry is final: revoking fails and the stored row stays untouched.
    let err = h
        .engine
        .revoke_invite(&h.owner.id, &expired.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Expired));
    let stored = h.store.get_invite(&expired.id).await.unwrap();
    assert_eq!(stored.state, InviteState::Pending);
}

#[tokio::test]
async fn accepting_never_demotes_an_existing_member() {
    let h = setup().await;
    let admin = h.member("admin@example.com", Role::Admin).await;
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "admin@example.com", Role::Viewer)
        .await
        .unwrap();

    let membership = h.engine.accept_invite(&invite.token, &admin.id).await.unwrap();
    assert_eq!(membership.role, Role::Admin);
}

#[tokio::test]
async fn accepting_reactivates_and_can_raise_the_role() {
    let h = setup().await;
    let user = h.member("back@example.com", Role::Viewer).await;
    h.engine
        .deactivate_member(&h.owner.id, h.ws(), &user.id)
        .await
        .unwrap();
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "back@example.com", Role::Member)
        .await
        .unwrap();

    let membership = h.engine.accept_invite(&invite.token, &user.id).await.unwrap();
    assert!(membership.is_active());
    assert_eq!(membership.role, Role::Member);
    assert_eq!(
        h.actions(entity::WORKSPACE_MEMBERSHIP).await,
        vec![AuditAction::Update, AuditAction::Deactivate]
    );
}

#[tokio::test]
async fn invite_transitions_are_audited_without_tokens() {
    let h = setup().await;
    let invite = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "new@example.com", Role::Member)
        .await
        .unwrap();
    h.engine.revoke_invite(&h.owner.id, &invite.id).await.unwrap();

    let entries = h
        .history(gatehouse_audit::AuditLogFilter::new().entity_type(entity::INVITE))
        .await;
    let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Update, AuditAction::Create]);
    assert_eq!(entries[0].old_value.as_ref().unwrap()["state"], "pending");
    assert_eq!(entries[0].new_value.as_ref().unwrap()["state"], "revoked");
    for entry in &entries {
        let json = serde_json::to_string(entry).unwrap();
        assert!(!json.contains(&invite.token));
    }
}

#[tokio::test]
async fn an_out_of_range_ttl_fails_the_invite_without_panicking() {
    let h = setup_with(EngineConfig {
        invite_ttl: Duration::try_hours(9_999_999_999).unwrap(),
        ..test_config()
    })
    .await;

    let err = h
        .engine
        .issue_invite(&h.owner.id, h.ws(), "far@example.com", Role::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Internal(_)));
    assert!(h.engine.list_active_invites(h.ws()).await.unwrap().is_empty());
}
