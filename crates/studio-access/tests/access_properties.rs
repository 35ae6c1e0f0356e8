//! End-to-end behaviour of the access decision service.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use studio_access::{
    AccessCheck, AccessConfig, AccessDecisionService, AccessError, AccessPolicy, AccessResult,
    AssignOptions, AuditLogEntry, AuditOutcome, AuditQuery, Condition, ConditionOperator,
    DecisionSource, Identity, MembershipProvider, NoIdentity, NoopPersistence, Permission,
    PermissionScope, PersistenceStore, PolicyDraft, PolicyPatch, Role, RoleAssignment, RoleDraft,
    RolePatch, StaticIdentity, StaticMembership,
};

/// Builds an initialized service over the given membership table.
async fn service_with(membership: StaticMembership) -> AccessDecisionService {
    let service = AccessDecisionService::new(
        AccessConfig::default(),
        Arc::new(NoopPersistence),
        Arc::new(NoIdentity),
        Arc::new(membership),
    )
    .unwrap();
    service.initialize().await.unwrap();
    service
}

async fn service() -> AccessDecisionService {
    service_with(StaticMembership::new()).await
}

/// Membership provider that never answers in time.
struct StalledMembership;

#[async_trait]
impl MembershipProvider for StalledMembership {
    async fn is_team_member(&self, _: &str, _: &str) -> AccessResult<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(true)
    }

    async fn is_org_member(&self, _: &str, _: &str) -> AccessResult<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(true)
    }
}

/// Membership provider that holds team lookups until released.
#[derive(Default)]
struct GatedMembership {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl MembershipProvider for GatedMembership {
    async fn is_team_member(&self, _: &str, _: &str) -> AccessResult<bool> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(true)
    }

    async fn is_org_member(&self, _: &str, _: &str) -> AccessResult<bool> {
        Ok(false)
    }
}

/// Store whose first assignment save is much slower than the rest.
#[derive(Default)]
struct UnevenStore {
    saves: AtomicUsize,
    assignments: Mutex<Vec<RoleAssignment>>,
}

#[async_trait]
impl PersistenceStore for UnevenStore {
    async fn load_roles(&self) -> AccessResult<Vec<Role>> {
        Ok(Vec::new())
    }

    async fn save_roles(&self, _: &[Role]) -> AccessResult<()> {
        Ok(())
    }

    async fn load_assignments(&self) -> AccessResult<Vec<RoleAssignment>> {
        Ok(Vec::new())
    }

    async fn save_assignments(&self, assignments: &[RoleAssignment]) -> AccessResult<()> {
        let delay = if self.saves.fetch_add(1, Ordering::SeqCst) == 0 { 50 } else { 1 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        *self.assignments.lock().unwrap() = assignments.to_vec();
        Ok(())
    }

    async fn load_policies(&self) -> AccessResult<Vec<AccessPolicy>> {
        Ok(Vec::new())
    }

    async fn save_policies(&self, _: &[AccessPolicy]) -> AccessResult<()> {
        Ok(())
    }

    async fn load_audit_logs(&self) -> AccessResult<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }

    async fn save_audit_logs(&self, _: &[AuditLogEntry]) -> AccessResult<()> {
        Ok(())
    }
}

/// Tests that a user with nothing assigned is denied.
#[tokio::test]
async fn test_no_assignments_denied() {
    let service = service().await;

    let decision = service.check_access("nobody", &AccessCheck::new("conversation", "read")).await;

    assert!(!decision.allowed);
    assert_eq!(decision.reason, "No matching permissions found");
    assert_eq!(decision.source, DecisionSource::None);
    assert!(decision.effective_permissions.is_empty());
}

/// Tests own-scope permissions against the owner field.
#[tokio::test]
async fn test_member_own_scope() {
    let service = service().await;
    service.assign_role("u", "member", AssignOptions::new()).await.unwrap();

    let base = AccessCheck::new("conversation", "create");
    let own = service
        .check_access("u", &base.clone().with_context("ownerId", json!("u")))
        .await;
    let other = service
        .check_access("u", &base.clone().with_context("ownerId", json!("other")))
        .await;
    let creator = service
        .check_access("u", &base.with_context("createdBy", json!("u")))
        .await;

    assert!(own.allowed);
    assert_eq!(own.reason, "Granted by role permission");
    assert!(!other.allowed);
    assert!(creator.allowed);
}

/// Tests that an own-scope check without ownership context fails closed.
#[tokio::test]
async fn test_own_scope_without_context_denied() {
    let service = service().await;
    service.assign_role("u", "member", AssignOptions::new()).await.unwrap();

    let decision = service.check_access("u", &AccessCheck::new("conversation", "create")).await;

    assert!(!decision.allowed);
    assert_eq!(decision.reason, "No matching permissions found");
}

/// Tests that expired assignments stop granting access.
#[tokio::test]
async fn test_expired_assignment_denied() {
    let service = service().await;
    service
        .assign_role("u", "owner", AssignOptions::new().expires_in(Duration::from_millis(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let decision = service.check_access("u", &AccessCheck::new("conversation", "read")).await;
    assert!(!decision.allowed);
    assert!(service.get_user_roles("u").is_empty());
    assert_eq!(service.get_user_assignments("u").len(), 1);
}

/// Tests that a cached grant does not outlive its assignment.
#[tokio::test]
async fn test_cached_grant_capped_by_expiry() {
    let service = service().await;
    service
        .assign_role("u", "owner", AssignOptions::new().expires_in(Duration::from_millis(100)))
        .await
        .unwrap();
    let check = AccessCheck::new("conversation", "read");

    assert!(service.check_access("u", &check).await.allowed);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let decision = service.check_access("u", &check).await;
    assert!(!decision.allowed);
    assert_ne!(decision.source, DecisionSource::Cache);
}

/// Tests that revocation takes effect on the very next check.
#[tokio::test]
async fn test_revoke_invalidates_cache() {
    let service = service().await;
    let assignment = service.assign_role("u", "owner", AssignOptions::new()).await.unwrap();
    let check = AccessCheck::new("conversation", "delete");

    assert!(service.check_access("u", &check).await.allowed);
    assert!(service.check_access("u", &check).await.allowed);

    service.revoke_role(&assignment.id).await.unwrap();
    assert!(!service.check_access("u", &check).await.allowed);

    let err = service.revoke_role(&assignment.id).await.unwrap_err();
    assert!(matches!(err, AccessError::AssignmentNotFound(_)));
}

/// Tests system role immutability against custom role mutability.
#[tokio::test]
async fn test_system_roles_are_immutable() {
    let service = service().await;

    let rename = service.update_role("admin", RolePatch::rename("superuser")).await;
    assert!(matches!(rename, Err(AccessError::ImmutableSystemRole(_))));
    let delete = service.delete_role("admin").await;
    assert!(matches!(delete, Err(AccessError::ImmutableSystemRole(_))));

    let custom = service.create_role(RoleDraft::new("editor", 40)).await.unwrap();
    let renamed = service.update_role(&custom.id, RolePatch::rename("writer")).await.unwrap();
    assert_eq!(renamed.name, "writer");
    service.delete_role(&custom.id).await.unwrap();
    assert!(service.get_role(&custom.id).is_none());

    let deactivated = service.update_role("viewer", RolePatch::active(false)).await.unwrap();
    assert!(!deactivated.is_active);
}

/// Tests that deactivating a held role invalidates cached grants.
#[tokio::test]
async fn test_role_update_invalidates_holders() {
    let service = service().await;
    service.assign_role("u", "member", AssignOptions::new()).await.unwrap();
    let membership_check = AccessCheck::new("conversation", "update").with_context("ownerId", json!("u"));

    assert!(service.check_access("u", &membership_check).await.allowed);

    service.update_role("member", RolePatch::active(false)).await.unwrap();
    assert!(!service.check_access("u", &membership_check).await.allowed);
}

/// Tests that an explicit deny overrides every role permission.
#[tokio::test]
async fn test_deny_policy_wins() {
    let service = service().await;
    service.assign_role("u", "owner", AssignOptions::new()).await.unwrap();
    let policy = service
        .create_policy(
            PolicyDraft::deny("freeze-deletes")
                .on_types(["conversation"])
                .for_actions(["delete"])
                .with_priority(100),
        )
        .await
        .unwrap();

    let decision = service.check_access("u", &AccessCheck::new("conversation", "delete")).await;

    assert!(!decision.allowed);
    assert_eq!(decision.reason, "Denied by policy: freeze-deletes");
    assert_eq!(decision.matched_policies, vec![policy.id]);
    assert_eq!(decision.source, DecisionSource::Policy);
}

/// Tests that policy mutations clear cached decisions.
#[tokio::test]
async fn test_policy_mutation_clears_cache() {
    let service = service().await;
    service.assign_role("u", "owner", AssignOptions::new()).await.unwrap();
    let check = AccessCheck::new("message", "read");

    assert!(service.check_access("u", &check).await.allowed);
    assert_eq!(service.get_stats().cache_size, 1);

    let policy = service
        .create_policy(PolicyDraft::deny("lockdown").for_actions(["*"]))
        .await
        .unwrap();
    assert_eq!(service.get_stats().cache_size, 0);
    assert!(!service.check_access("u", &check).await.allowed);

    service
        .update_policy(
            &policy.id,
            PolicyPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(service.check_access("u", &check).await.allowed);

    service.delete_policy(&policy.id).await.unwrap();
    assert!(service.get_policy(&policy.id).is_none());
}

/// Tests that each check appends exactly one audit entry.
#[tokio::test]
async fn test_audit_entry_per_check() {
    let service = service().await;
    service.assign_role("alice", "owner", AssignOptions::new()).await.unwrap();

    service.check_access("alice", &AccessCheck::new("conversation", "read")).await;
    service.check_access("alice", &AccessCheck::new("conversation", "read")).await;
    service.check_access("bob", &AccessCheck::new("conversation", "read")).await;
    service
        .check_access("bob", &AccessCheck::new("message", "delete").with_resource_id("m-1"))
        .await;

    assert_eq!(service.get_stats().audit_log_count, 4);

    let bob_denials = service.get_audit_logs(
        &AuditQuery::new()
            .for_user("bob")
            .with_result(AuditOutcome::Denied),
    );
    assert_eq!(bob_denials.len(), 2);
    assert!(bob_denials.iter().all(|e| e.user_id == "bob"));
    assert!(bob_denials.iter().all(|e| e.reason == "No matching permissions found"));
    assert_eq!(bob_denials[0].resource_id.as_deref(), Some("m-1"));

    let alice = service.get_audit_logs(&AuditQuery::new().for_user("alice"));
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|e| e.result == AuditOutcome::Allowed));

    let limited = service.get_audit_logs(&AuditQuery::new().limit(3));
    assert_eq!(limited.len(), 3);
}

/// Tests that audit entries carry the signed-in user's display name.
#[tokio::test]
async fn test_audit_user_name_from_identity() {
    let service = AccessDecisionService::new(
        AccessConfig::default(),
        Arc::new(NoopPersistence),
        Arc::new(StaticIdentity::new(Identity::new("alice", "Alice Liddell"))),
        Arc::new(StaticMembership::new()),
    )
    .unwrap();
    service.initialize().await.unwrap();

    service.check_access("alice", &AccessCheck::new("x", "y")).await;
    service.check_access("bob", &AccessCheck::new("x", "y")).await;

    let entries = service.get_audit_logs(&AuditQuery::new());
    assert_eq!(entries[0].user_name, "bob");
    assert_eq!(entries[1].user_name, "Alice Liddell");
}

/// Tests a custom role with no permissions.
#[tokio::test]
async fn test_empty_custom_role_denied() {
    let service = service().await;
    let role = service.create_role(RoleDraft::new("auditor", 60)).await.unwrap();
    service.assign_role("u", &role.id, AssignOptions::new()).await.unwrap();

    let decision = service.check_access("u", &AccessCheck::new("conversation", "read")).await;

    assert!(!decision.allowed);
    assert_eq!(decision.reason, "No matching permissions found");
}

/// Tests organization scope against organization membership.
#[tokio::test]
async fn test_admin_organization_scope() {
    let membership = StaticMembership::new();
    membership.add_org_member("org-1", "u");
    let service = service_with(membership).await;
    service.assign_role("u", "admin", AssignOptions::new()).await.unwrap();

    let org1 = service
        .check_access("u", &AccessCheck::new("user", "update").with_context("organizationId", json!("org-1")))
        .await;
    let org2 = service
        .check_access("u", &AccessCheck::new("user", "update").with_context("organizationId", json!("org-2")))
        .await;

    assert!(org1.allowed);
    assert!(!org2.allowed);
}

/// Tests team scope against workspace membership, via inheritance.
#[tokio::test]
async fn test_viewer_team_scope() {
    let membership = StaticMembership::new();
    membership.add_team_member("ws-1", "u");
    let service = service_with(membership).await;
    service.assign_role("u", "admin", AssignOptions::new()).await.unwrap();

    // admin -> member -> viewer grants message:read at team scope.
    let ws1 = service
        .check_access("u", &AccessCheck::new("message", "read").with_context("workspaceId", json!("ws-1")))
        .await;
    let ws2 = service
        .check_access("u", &AccessCheck::new("message", "read").with_context("workspaceId", json!("ws-2")))
        .await;

    assert!(ws1.allowed);
    assert!(!ws2.allowed);

    let roles: Vec<String> = service.get_user_roles("u").into_iter().map(|r| r.id).collect();
    assert_eq!(roles, vec!["admin", "member", "viewer"]);
}

/// Tests that inheritance cycles terminate.
#[tokio::test]
async fn test_inheritance_cycle_terminates() {
    let service = service().await;
    let a = service
        .create_role(
            RoleDraft::new("a", 30).with_permission(Permission::new("note", "read", PermissionScope::All)),
        )
        .await
        .unwrap();
    let b = service
        .create_role(RoleDraft::new("b", 30).with_parent(a.id.clone()))
        .await
        .unwrap();
    service
        .update_role(
            &a.id,
            RolePatch {
                inherits_from: Some(vec![b.id.clone()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    service.assign_role("u", &b.id, AssignOptions::new()).await.unwrap();

    assert_eq!(service.get_user_roles("u").len(), 2);
    assert!(service.check_access("u", &AccessCheck::new("note", "read")).await.allowed);
}

/// Tests that a malformed `in` condition produces an error denial.
#[tokio::test]
async fn test_malformed_condition_fails_closed() {
    let service = service().await;
    let role = service
        .create_role(RoleDraft::new("broken", 10).with_permission(
            Permission::new("*", "*", PermissionScope::All).when(Condition::new(
                "tier",
                ConditionOperator::In,
                "gold",
            )),
        ))
        .await
        .unwrap();
    service.assign_role("u", &role.id, AssignOptions::new()).await.unwrap();

    let decision = service
        .check_access("u", &AccessCheck::new("conversation", "read").with_context("tier", json!("gold")))
        .await;

    assert!(!decision.allowed);
    assert!(decision.reason.starts_with("Error: "), "reason was {}", decision.reason);
    assert_eq!(decision.source, DecisionSource::Error);
    assert_eq!(service.get_stats().audit_log_count, 1);
}

/// Tests that an unresponsive membership provider denies.
#[tokio::test]
async fn test_membership_timeout_denies() {
    let config = AccessConfig {
        membership_timeout_ms: 20,
        ..AccessConfig::default()
    };
    let service = AccessDecisionService::new(
        config,
        Arc::new(NoopPersistence),
        Arc::new(NoIdentity),
        Arc::new(StalledMembership),
    )
    .unwrap();
    service.initialize().await.unwrap();
    service.assign_role("u", "viewer", AssignOptions::new()).await.unwrap();

    let decision = tokio::time::timeout(
        Duration::from_secs(5),
        service.check_access(
            "u",
            &AccessCheck::new("conversation", "read").with_context("workspaceId", json!("ws-1")),
        ),
    )
    .await
    .unwrap();

    assert!(!decision.allowed);
}

/// Tests templated conditions on policies.
#[tokio::test]
async fn test_policy_with_user_placeholder() {
    let service = service().await;
    service
        .create_policy(
            PolicyDraft::allow("authors-edit-own")
                .on_types(["message"])
                .for_actions(["update"])
                .when(Condition::equals("authorId", "{{userId}}")),
        )
        .await
        .unwrap();

    let mine = AccessCheck::new("message", "update").with_context("authorId", json!("u"));
    let theirs = AccessCheck::new("message", "update").with_context("authorId", json!("v"));

    assert!(service.check_access("u", &mine).await.allowed);
    assert!(!service.check_access("u", &theirs).await.allowed);
}

/// Tests assignment validation.
#[tokio::test]
async fn test_assignment_errors() {
    let service = service().await;

    let missing = service.assign_role("u", "ghost", AssignOptions::new()).await;
    assert!(matches!(missing, Err(AccessError::RoleNotFound(_))));

    service.update_role("viewer", RolePatch::active(false)).await.unwrap();
    let inactive = service.assign_role("u", "viewer", AssignOptions::new()).await;
    assert!(matches!(inactive, Err(AccessError::InactiveRole(_))));
}

/// Tests invalid configuration is rejected at construction.
#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = AccessConfig {
        audit_capacity: 0,
        ..AccessConfig::default()
    };
    let result = AccessDecisionService::new(
        config,
        Arc::new(NoopPersistence),
        Arc::new(NoIdentity),
        Arc::new(StaticMembership::new()),
    );

    assert!(matches!(result, Err(AccessError::Configuration(_))));
}

/// Tests that a decision evaluated across a revocation is not cached.
#[tokio::test]
async fn test_revoke_during_evaluation_not_cached() {
    let membership = Arc::new(GatedMembership::default());
    let config = AccessConfig {
        membership_timeout_ms: 10_000,
        ..AccessConfig::default()
    };
    let service = Arc::new(
        AccessDecisionService::new(
            config,
            Arc::new(NoopPersistence),
            Arc::new(NoIdentity),
            membership.clone(),
        )
        .unwrap(),
    );
    service.initialize().await.unwrap();
    let assignment = service.assign_role("u", "viewer", AssignOptions::new()).await.unwrap();

    let check = AccessCheck::new("conversation", "read").with_context("workspaceId", json!("ws-1"));
    let in_flight = {
        let service = service.clone();
        let check = check.clone();
        tokio::spawn(async move { service.check_access("u", &check).await })
    };

    membership.entered.notified().await;
    service.revoke_role(&assignment.id).await.unwrap();
    membership.release.notify_one();

    // The in-flight answer reflects the state it started from.
    assert!(in_flight.await.unwrap().allowed);

    let after = service.check_access("u", &check).await;
    assert!(!after.allowed);
    assert_ne!(after.source, DecisionSource::Cache);
    assert_eq!(service.cache_stats().hits, 0);
}

/// Tests that deny beats allow at equal priority.
#[tokio::test]
async fn test_equal_priority_deny_wins() {
    let service = service().await;
    service.assign_role("u", "owner", AssignOptions::new()).await.unwrap();
    service
        .create_policy(PolicyDraft::allow("open-export").for_actions(["export"]).with_priority(10))
        .await
        .unwrap();
    service
        .create_policy(PolicyDraft::deny("freeze-export").for_actions(["export"]).with_priority(10))
        .await
        .unwrap();

    let decision = service.check_access("u", &AccessCheck::new("conversation", "export")).await;

    assert!(!decision.allowed);
    assert_eq!(decision.reason, "Denied by policy: freeze-export");
}

/// Tests that deleting a parent role leaves its children editable.
#[tokio::test]
async fn test_delete_parent_role_keeps_child_usable() {
    let service = service().await;
    let parent = service
        .create_role(
            RoleDraft::new("exporter", 30)
                .with_permission(Permission::new("conversation", "export", PermissionScope::All)),
        )
        .await
        .unwrap();
    let child = service
        .create_role(RoleDraft::new("senior-exporter", 40).with_parent(parent.id.clone()))
        .await
        .unwrap();
    service.assign_role("u", &child.id, AssignOptions::new()).await.unwrap();
    let check = AccessCheck::new("conversation", "export");
    assert!(service.check_access("u", &check).await.allowed);

    service.delete_role(&parent.id).await.unwrap();

    assert!(service.get_role(&child.id).unwrap().inherits_from.is_empty());
    assert!(!service.check_access("u", &check).await.allowed);
    let updated = service.update_role(&child.id, RolePatch::active(false)).await.unwrap();
    assert!(!updated.is_active);
}

/// Tests that overlapping writes leave the newest collection in storage.
#[tokio::test]
async fn test_concurrent_assignments_persist_latest_snapshot() {
    let store = Arc::new(UnevenStore::default());
    let service = AccessDecisionService::new(
        AccessConfig::default(),
        store.clone(),
        Arc::new(NoIdentity),
        Arc::new(StaticMembership::new()),
    )
    .unwrap();
    service.initialize().await.unwrap();

    let (a, b, c) = tokio::join!(
        service.assign_role("a", "viewer", AssignOptions::new()),
        service.assign_role("b", "viewer", AssignOptions::new()),
        service.assign_role("c", "viewer", AssignOptions::new()),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let saved = store.assignments.lock().unwrap();
    let mut users: Vec<&str> = saved.iter().map(|a| a.user_id.as_str()).collect();
    users.sort_unstable();
    assert_eq!(users, vec!["a", "b", "c"]);
}
