//! Access decision service.

use crate::assignment::{AssignOptions, AssignmentManager, RoleAssignment};
use crate::audit::{AuditLog, AuditLogEntry, AuditOutcome, AuditQuery};
use crate::cache::{CacheKey, CacheStats, DecisionCache};
use crate::condition::{Bindings, Context};
use crate::config::AccessConfig;
use crate::permission::PermissionEvaluator;
use crate::persistence::{NoopPersistence, PersistenceStore};
use crate::policy::{AccessPolicy, PolicyDraft, PolicyEngine, PolicyPatch, PolicyStore, Principal};
use crate::providers::{IdentityProvider, MembershipProvider, NoIdentity, StaticMembership};
use crate::rbac::{Permission, Role, RoleDraft, RoleFilter, RolePatch, RoleStore};
use crate::AccessResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A single access question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheck {
    /// Resource type.
    pub resource: String,
    /// Action to perform.
    pub action: String,
    /// Resource instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Request context (ownerId, workspaceId, organizationId, groups, ...).
    #[serde(default)]
    pub context: Context,
}

impl AccessCheck {
    /// Creates a type-level check.
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            resource_id: None,
            context: Context::new(),
        }
    }

    /// Targets a specific instance.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Adds a context value.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Merges a context map.
    #[must_use]
    pub fn with_context_map(mut self, context: Context) -> Self {
        self.context.extend(context);
        self
    }

    fn groups(&self) -> Vec<String> {
        match self.context.get("groups") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(group)) => vec![group.clone()],
            _ => Vec::new(),
        }
    }
}

/// What produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// Served from the decision cache.
    Cache,
    /// Explicit policy.
    Policy,
    /// Role permission.
    Permission,
    /// Nothing matched.
    None,
    /// Evaluation failed.
    Error,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Policy => write!(f, "policy"),
            Self::Permission => write!(f, "permission"),
            Self::None => write!(f, "none"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    /// Whether access is allowed.
    pub allowed: bool,
    /// Human-readable reason.
    pub reason: String,
    /// IDs of the policies that decided the outcome.
    pub matched_policies: Vec<String>,
    /// Permissions the user held when the decision was made.
    pub effective_permissions: Vec<Permission>,
    /// Decision source.
    pub source: DecisionSource,
    /// When the decision was evaluated.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub evaluated_at: DateTime<Utc>,
}

impl AccessDecision {
    /// Creates an allow decision.
    pub fn allowed(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_policies: Vec::new(),
            effective_permissions: Vec::new(),
            source: DecisionSource::Permission,
            evaluated_at: Utc::now(),
        }
    }

    /// Creates a deny decision.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            matched_policies: Vec::new(),
            effective_permissions: Vec::new(),
            source: DecisionSource::None,
            evaluated_at: Utc::now(),
        }
    }

    /// Sets the decision source.
    #[must_use]
    pub fn from_source(mut self, source: DecisionSource) -> Self {
        self.source = source;
        self
    }

    /// Records a deciding policy.
    #[must_use]
    pub fn with_policy(mut self, policy_id: Option<String>) -> Self {
        self.matched_policies.extend(policy_id);
        self
    }

    /// Attaches the effective permission set.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.effective_permissions = permissions;
        self
    }

    /// Stamps the evaluation time.
    #[must_use]
    pub fn at(mut self, evaluated_at: DateTime<Utc>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }
}

/// Collection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessStats {
    /// Roles, system and custom.
    pub total_roles: usize,
    /// Active roles.
    pub active_roles: usize,
    /// Assignment records, expired ones included.
    pub total_assignments: usize,
    /// Policies.
    pub total_policies: usize,
    /// Active policies.
    pub active_policies: usize,
    /// Retained audit entries.
    pub audit_log_count: usize,
    /// Cached decisions.
    pub cache_size: usize,
}

/// Access decision service combining role permissions, explicit policies,
/// a decision cache and an audit trail.
pub struct AccessDecisionService {
    config: AccessConfig,
    roles: Arc<RoleStore>,
    assignments: AssignmentManager,
    policies: Arc<PolicyStore>,
    policy_engine: PolicyEngine,
    permissions: PermissionEvaluator,
    cache: DecisionCache,
    audit: AuditLog,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn PersistenceStore>,
    /// One writer per collection; each holds its lock from snapshot to save.
    write_locks: WriteLocks,
}

#[derive(Default)]
struct WriteLocks {
    roles: Mutex<()>,
    assignments: Mutex<()>,
    policies: Mutex<()>,
    audit: Mutex<()>,
}

impl AccessDecisionService {
    /// Creates a service. Call [`initialize`](Self::initialize) before use.
    pub fn new(
        config: AccessConfig,
        store: Arc<dyn PersistenceStore>,
        identity: Arc<dyn IdentityProvider>,
        membership: Arc<dyn MembershipProvider>,
    ) -> AccessResult<Self> {
        config.validate()?;

        let roles = Arc::new(RoleStore::new());
        let policies = Arc::new(PolicyStore::new());

        Ok(Self {
            assignments: AssignmentManager::new(roles.clone()),
            policy_engine: PolicyEngine::new(policies.clone()),
            permissions: PermissionEvaluator::new(
                identity.clone(),
                membership,
                config.membership_timeout(),
            ),
            cache: DecisionCache::new(config.cache_max_entries, config.cache_ttl()),
            audit: AuditLog::new(config.audit_capacity),
            roles,
            policies,
            identity,
            store,
            write_locks: WriteLocks::default(),
            config,
        })
    }

    /// Creates an ephemeral service with default settings, no identity and
    /// an empty membership table.
    pub fn with_defaults() -> AccessResult<Self> {
        Self::new(
            AccessConfig::default(),
            Arc::new(NoopPersistence),
            Arc::new(NoIdentity),
            Arc::new(StaticMembership::new()),
        )
    }

    /// Loads persisted collections and seeds the built-in roles.
    pub async fn initialize(&self) -> AccessResult<()> {
        let roles = self.store.load_roles().await?;
        let assignments = self.store.load_assignments().await?;
        let policies = self.store.load_policies().await?;
        let audit_logs = self.store.load_audit_logs().await?;

        tracing::info!(
            roles = roles.len(),
            assignments = assignments.len(),
            policies = policies.len(),
            audit_logs = audit_logs.len(),
            "Loaded access control state"
        );

        self.roles.replace_all(roles);
        self.assignments.replace_all(assignments);
        self.policies.replace_all(policies);
        self.audit.restore(audit_logs);
        self.cache.clear();

        if self.config.seed_system_roles {
            let added = self.roles.seed_system_roles();
            if added > 0 {
                tracing::info!(added, "Seeded system roles");
                self.persist_roles().await;
            }
        }

        Ok(())
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Decides whether `user_id` may perform `check`. Never fails: internal
    /// faults become denials with an `Error:` reason. Every call appends
    /// exactly one audit entry.
    pub async fn check_access(&self, user_id: &str, check: &AccessCheck) -> AccessDecision {
        let key = CacheKey::for_check(user_id, check);

        let decision = match self.cache.get(&key) {
            Some(cached) => cached.from_source(DecisionSource::Cache),
            None => {
                let epoch = self.cache.epoch();
                let now = Utc::now();
                match self.evaluate(user_id, check, now).await {
                    Ok(decision) => {
                        // A mutation during evaluation may have made this decision stale.
                        let ttl = self.cache_ttl_for(user_id, now);
                        self.cache.put_if_current(key, decision.clone(), ttl, epoch);
                        decision
                    }
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            resource = %check.resource,
                            action = %check.action,
                            error = %e,
                            "Access evaluation failed"
                        );
                        AccessDecision::denied(format!("Error: {}", e))
                            .from_source(DecisionSource::Error)
                            .at(now)
                    }
                }
            }
        };

        self.record(user_id, check, &decision).await;
        decision
    }

    async fn evaluate(
        &self,
        user_id: &str,
        check: &AccessCheck,
        now: DateTime<Utc>,
    ) -> AccessResult<AccessDecision> {
        let roles = self.assignments.get_user_roles_at(user_id, now);
        let effective = effective_permissions(&roles);
        let bindings = Bindings::new(user_id, now);

        let principal = Principal::new(user_id)
            .with_roles(roles.iter().flat_map(|r| [r.id.clone(), r.name.clone()]))
            .with_groups(check.groups());

        let policy = self.policy_engine.evaluate(&principal, check, &bindings)?;
        if policy.is_deny() {
            let name = policy.policy_name.clone().unwrap_or_default();
            return Ok(AccessDecision::denied(format!("Denied by policy: {}", name))
                .from_source(DecisionSource::Policy)
                .with_policy(policy.policy_id)
                .with_permissions(effective)
                .at(now));
        }

        let granted = self
            .permissions
            .find_match(&effective, check, user_id, &bindings)
            .await?
            .is_some();

        let decision = if granted {
            AccessDecision::allowed("Granted by role permission")
                .from_source(DecisionSource::Permission)
                .with_policy(if policy.is_allow() { policy.policy_id } else { None })
        } else if policy.is_allow() {
            let name = policy.policy_name.clone().unwrap_or_default();
            AccessDecision::allowed(format!("Allowed by policy: {}", name))
                .from_source(DecisionSource::Policy)
                .with_policy(policy.policy_id)
        } else {
            AccessDecision::denied("No matching permissions found").from_source(DecisionSource::None)
        };

        tracing::debug!(
            user_id = %user_id,
            resource = %check.resource,
            action = %check.action,
            allowed = decision.allowed,
            source = %decision.source,
            roles = roles.len(),
            "Access evaluated"
        );

        Ok(decision.with_permissions(effective).at(now))
    }

    /// Default TTL, capped so a cached grant cannot outlive the assignment
    /// behind it.
    fn cache_ttl_for(&self, user_id: &str, now: DateTime<Utc>) -> Duration {
        let ttl = self.cache.default_ttl();
        match self.assignments.next_expiry(user_id, now) {
            Some(expiry) => (expiry - now).to_std().map_or(Duration::ZERO, |left| left.min(ttl)),
            None => ttl,
        }
    }

    async fn record(&self, user_id: &str, check: &AccessCheck, decision: &AccessDecision) {
        let user_name = tokio::time::timeout(self.config.membership_timeout(), self.identity.current_user())
            .await
            .ok()
            .flatten()
            .filter(|identity| identity.id == user_id)
            .map_or_else(|| user_id.to_string(), |identity| identity.name);

        let entry = AuditLogEntry::new(
            user_id,
            check.action.clone(),
            check.resource.clone(),
            AuditOutcome::from_allowed(decision.allowed),
            decision.reason.clone(),
        )
        .with_user_name(user_name)
        .with_resource_id(check.resource_id.clone());

        self.audit.append(entry);
    }

    // Roles

    /// Creates a custom role.
    pub async fn create_role(&self, draft: RoleDraft) -> AccessResult<Role> {
        let role = self.roles.create(draft)?;
        tracing::info!(role_id = %role.id, name = %role.name, "Role created");
        self.persist_roles().await;
        Ok(role)
    }

    /// Updates a role. System roles accept only activation changes.
    pub async fn update_role(&self, id: &str, patch: RolePatch) -> AccessResult<Role> {
        let affected = self.assignments.users_holding(id);
        let role = self.roles.update(id, patch)?;
        let dropped = self.cache.invalidate_users(&affected);

        tracing::info!(
            role_id = %role.id,
            is_active = role.is_active,
            invalidated = dropped,
            "Role updated"
        );
        self.persist_roles().await;
        Ok(role)
    }

    /// Deletes a custom role.
    pub async fn delete_role(&self, id: &str) -> AccessResult<Role> {
        let affected = self.assignments.users_holding(id);
        let role = self.roles.delete(id)?;
        let dropped = self.cache.invalidate_users(&affected);

        tracing::info!(role_id = %role.id, invalidated = dropped, "Role deleted");
        self.persist_roles().await;
        Ok(role)
    }

    /// Gets a role by ID.
    pub fn get_role(&self, id: &str) -> Option<Role> {
        self.roles.get(id)
    }

    /// Lists roles, highest level first.
    pub fn list_roles(&self, filter: RoleFilter) -> Vec<Role> {
        self.roles.list(filter)
    }

    // Assignments

    /// Grants a role to a user.
    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        options: AssignOptions,
    ) -> AccessResult<RoleAssignment> {
        let assignment = self.assignments.assign_role(user_id, role_id, options)?;
        self.cache.invalidate_user(user_id);

        tracing::info!(
            assignment_id = %assignment.id,
            user_id = %assignment.user_id,
            role_id = %assignment.role_id,
            expires_at = ?assignment.expires_at,
            "Role assigned"
        );
        self.persist_assignments().await;
        Ok(assignment)
    }

    /// Revokes an assignment.
    pub async fn revoke_role(&self, assignment_id: &str) -> AccessResult<RoleAssignment> {
        let assignment = self.assignments.revoke_role(assignment_id)?;
        self.cache.invalidate_user(&assignment.user_id);

        tracing::info!(
            assignment_id = %assignment.id,
            user_id = %assignment.user_id,
            role_id = %assignment.role_id,
            "Role revoked"
        );
        self.persist_assignments().await;
        Ok(assignment)
    }

    /// Effective roles of a user, inheritance included.
    pub fn get_user_roles(&self, user_id: &str) -> Vec<Role> {
        self.assignments.get_user_roles(user_id)
    }

    /// Raw assignment records of a user.
    pub fn get_user_assignments(&self, user_id: &str) -> Vec<RoleAssignment> {
        self.assignments.get_user_assignments(user_id)
    }

    // Policies

    /// Creates a policy.
    pub async fn create_policy(&self, draft: PolicyDraft) -> AccessResult<AccessPolicy> {
        let policy = self.policies.create(draft)?;
        let dropped = self.cache.clear();

        tracing::info!(
            policy_id = %policy.id,
            name = %policy.name,
            effect = %policy.effect,
            invalidated = dropped,
            "Policy created"
        );
        self.persist_policies().await;
        Ok(policy)
    }

    /// Updates a policy.
    pub async fn update_policy(&self, id: &str, patch: PolicyPatch) -> AccessResult<AccessPolicy> {
        let policy = self.policies.update(id, patch)?;
        let dropped = self.cache.clear();

        tracing::info!(policy_id = %policy.id, invalidated = dropped, "Policy updated");
        self.persist_policies().await;
        Ok(policy)
    }

    /// Deletes a policy.
    pub async fn delete_policy(&self, id: &str) -> AccessResult<AccessPolicy> {
        let policy = self.policies.delete(id)?;
        let dropped = self.cache.clear();

        tracing::info!(policy_id = %policy.id, invalidated = dropped, "Policy deleted");
        self.persist_policies().await;
        Ok(policy)
    }

    /// Gets a policy by ID.
    pub fn get_policy(&self, id: &str) -> Option<AccessPolicy> {
        self.policies.get(id)
    }

    /// Lists policies.
    pub fn list_policies(&self) -> Vec<AccessPolicy> {
        self.policies.list()
    }

    // Audit and stats

    /// Queries the audit log, newest first.
    pub fn get_audit_logs(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        self.audit.query(query)
    }

    /// Returns collection counters.
    pub fn get_stats(&self) -> AccessStats {
        AccessStats {
            total_roles: self.roles.len(),
            active_roles: self
                .roles
                .list(RoleFilter {
                    is_active: Some(true),
                    is_system: None,
                })
                .len(),
            total_assignments: self.assignments.len(),
            total_policies: self.policies.len(),
            active_policies: self.policies.active_len(),
            audit_log_count: self.audit.len(),
            cache_size: self.cache.len(),
        }
    }

    /// Returns decision cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Writes the audit log to storage if it changed.
    pub async fn flush(&self) -> AccessResult<()> {
        let _guard = self.write_locks.audit.lock().await;
        let Some(entries) = self.audit.take_dirty() else {
            return Ok(());
        };

        if let Err(e) = self.store.save_audit_logs(&entries).await {
            self.audit.mark_dirty();
            return Err(e);
        }
        tracing::debug!(entries = entries.len(), "Audit log flushed");
        Ok(())
    }

    /// Spawns a task that periodically purges expired cache entries and
    /// flushes the audit log.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.maintenance_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;

                let purged = self.cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired decisions");
                }
                if let Err(e) = self.flush().await {
                    tracing::warn!(error = %e, "Audit flush failed");
                }
            }
        })
    }

    async fn persist_roles(&self) {
        let _guard = self.write_locks.roles.lock().await;
        let roles = self.roles.list(RoleFilter::default());
        if let Err(e) = self.store.save_roles(&roles).await {
            tracing::warn!(error = %e, "Failed to persist roles");
        }
    }

    async fn persist_assignments(&self) {
        let _guard = self.write_locks.assignments.lock().await;
        let assignments = self.assignments.all();
        if let Err(e) = self.store.save_assignments(&assignments).await {
            tracing::warn!(error = %e, "Failed to persist assignments");
        }
    }

    async fn persist_policies(&self) {
        let _guard = self.write_locks.policies.lock().await;
        let policies = self.policies.list();
        if let Err(e) = self.store.save_policies(&policies).await {
            tracing::warn!(error = %e, "Failed to persist policies");
        }
    }
}

/// Deduplicated union of role permissions, in role order.
fn effective_permissions(roles: &[Role]) -> Vec<Permission> {
    let mut effective: Vec<Permission> = Vec::new();
    for permission in roles.iter().flat_map(|r| r.permissions.iter()) {
        if !effective.contains(permission) {
            effective.push(permission.clone());
        }
    }
    effective
}
