//! Explicit allow/deny policies.

use crate::authorizer::AccessCheck;
use crate::condition::{Bindings, Condition, ConditionEvaluator, ConditionOperator, Context};
use crate::{AccessError, AccessResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Policy effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Allow access.
    Allow,
    /// Deny access.
    Deny,
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Who a policy applies to. Empty lists match everyone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principals {
    /// User IDs.
    #[serde(default)]
    pub users: Vec<String>,
    /// Role IDs or names.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Group names.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// What a policy applies to. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyResources {
    /// Resource types (`*` matches all).
    #[serde(default)]
    pub types: Vec<String>,
    /// Specific resource IDs.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Glob patterns over `type` or `type:id`.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Access policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    /// Policy ID.
    pub id: String,
    /// Policy name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Priority, higher evaluated first.
    pub priority: i32,
    /// Effect of a match.
    pub effect: Effect,
    /// Principals.
    #[serde(default)]
    pub principals: Principals,
    /// Resources.
    #[serde(default)]
    pub resources: PolicyResources,
    /// Actions (`*` matches all).
    pub actions: Vec<String>,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Whether the policy is evaluated.
    pub is_active: bool,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last update time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl AccessPolicy {
    /// Checks the principal dimension.
    pub fn matches_principal(&self, principal: &Principal) -> bool {
        let p = &self.principals;
        (p.users.is_empty() || p.users.contains(&principal.user_id))
            && (p.roles.is_empty() || p.roles.iter().any(|r| principal.roles.contains(r)))
            && (p.groups.is_empty() || p.groups.iter().any(|g| principal.groups.contains(g)))
    }

    /// Checks the resource dimension, compiling patterns on the fly.
    pub fn matches_resource(&self, resource: &str, resource_id: Option<&str>) -> bool {
        let patterns: Vec<Regex> = self
            .resources
            .patterns
            .iter()
            .filter_map(|p| compile_glob(p).ok())
            .collect();
        self.matches_resource_with(resource, resource_id, &patterns)
    }

    fn matches_resource_with(&self, resource: &str, resource_id: Option<&str>, patterns: &[Regex]) -> bool {
        let r = &self.resources;

        let type_match = r.types.is_empty() || r.types.iter().any(|t| t == "*" || t == resource);
        if !type_match {
            return false;
        }

        if !r.ids.is_empty() {
            match resource_id {
                Some(id) if r.ids.iter().any(|i| i == id) => {}
                _ => return false,
            }
        }

        if !r.patterns.is_empty() {
            let qualified = resource_id.map(|id| format!("{}:{}", resource, id));
            let matched = patterns.iter().any(|re| {
                re.is_match(resource) || qualified.as_deref().map_or(false, |q| re.is_match(q))
            });
            if !matched {
                return false;
            }
        }

        true
    }

    /// Checks the action dimension.
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == "*" || a == action)
    }
}

/// Compiles a glob (`*` any run, `?` one character) into an anchored regex.
fn compile_glob(pattern: &str) -> AccessResult<Regex> {
    let regex_pattern = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");

    Regex::new(&format!("^{}$", regex_pattern))
        .map_err(|e| AccessError::InvalidPolicy(format!("resource pattern '{}': {}", pattern, e)))
}

/// Input for creating a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDraft {
    /// Policy name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Priority.
    #[serde(default)]
    pub priority: i32,
    /// Effect.
    pub effect: Effect,
    /// Principals.
    #[serde(default)]
    pub principals: Principals,
    /// Resources.
    #[serde(default)]
    pub resources: PolicyResources,
    /// Actions.
    pub actions: Vec<String>,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Whether the policy starts active.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl PolicyDraft {
    /// Creates an allow draft.
    pub fn allow(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: 0,
            effect: Effect::Allow,
            principals: Principals::default(),
            resources: PolicyResources::default(),
            actions: Vec::new(),
            conditions: Vec::new(),
            is_active: true,
        }
    }

    /// Creates a deny draft.
    pub fn deny(name: impl Into<String>) -> Self {
        let mut draft = Self::allow(name);
        draft.effect = Effect::Deny;
        draft
    }

    /// Sets priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Restricts to users.
    #[must_use]
    pub fn for_users(mut self, users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.principals.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts to roles.
    #[must_use]
    pub fn for_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.principals.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts to groups.
    #[must_use]
    pub fn for_groups(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.principals.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Sets resource types.
    #[must_use]
    pub fn on_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets resource IDs.
    #[must_use]
    pub fn on_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets resource patterns.
    #[must_use]
    pub fn on_patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets actions.
    #[must_use]
    pub fn for_actions(mut self, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Partial policy update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<i32>,
    /// New effect.
    pub effect: Option<Effect>,
    /// Replacement principals.
    pub principals: Option<Principals>,
    /// Replacement resources.
    pub resources: Option<PolicyResources>,
    /// Replacement actions.
    pub actions: Option<Vec<String>>,
    /// Replacement conditions.
    pub conditions: Option<Vec<Condition>>,
    /// Activation flag.
    pub is_active: Option<bool>,
}

/// A stored policy with its resource patterns compiled once.
struct StoredPolicy {
    policy: AccessPolicy,
    patterns: Vec<Regex>,
}

impl StoredPolicy {
    fn compile(policy: AccessPolicy) -> AccessResult<Self> {
        let patterns = policy
            .resources
            .patterns
            .iter()
            .map(|p| compile_glob(p))
            .collect::<AccessResult<Vec<_>>>()?;
        Ok(Self { policy, patterns })
    }
}

/// Policy store.
pub struct PolicyStore {
    policies: RwLock<HashMap<String, StoredPolicy>>,
}

impl PolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces all policies (startup load).
    pub fn replace_all(&self, loaded: Vec<AccessPolicy>) {
        let mut policies = self.policies.write();
        policies.clear();
        for policy in loaded {
            match StoredPolicy::compile(policy.clone()) {
                Ok(stored) => {
                    policies.insert(policy.id, stored);
                }
                Err(e) => {
                    // Unusable patterns never match.
                    tracing::warn!(policy_id = %policy.id, error = %e, "Stored policy has invalid patterns");
                    policies.insert(
                        policy.id.clone(),
                        StoredPolicy {
                            policy,
                            patterns: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    /// Creates a policy.
    pub fn create(&self, draft: PolicyDraft) -> AccessResult<AccessPolicy> {
        let now = Utc::now();
        let policy = AccessPolicy {
            id: uuid::Uuid::new_v4().to_string(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            priority: draft.priority,
            effect: draft.effect,
            principals: draft.principals,
            resources: draft.resources,
            actions: draft.actions,
            conditions: draft.conditions,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        };
        validate(&policy)?;
        let stored = StoredPolicy::compile(policy.clone())?;

        self.policies.write().insert(policy.id.clone(), stored);
        Ok(policy)
    }

    /// Updates a policy.
    pub fn update(&self, id: &str, patch: PolicyPatch) -> AccessResult<AccessPolicy> {
        let mut policies = self.policies.write();
        let mut updated = policies
            .get(id)
            .map(|stored| stored.policy.clone())
            .ok_or_else(|| AccessError::PolicyNotFound(id.to_string()))?;

        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        if let Some(effect) = patch.effect {
            updated.effect = effect;
        }
        if let Some(principals) = patch.principals {
            updated.principals = principals;
        }
        if let Some(resources) = patch.resources {
            updated.resources = resources;
        }
        if let Some(actions) = patch.actions {
            updated.actions = actions;
        }
        if let Some(conditions) = patch.conditions {
            updated.conditions = conditions;
        }
        if let Some(is_active) = patch.is_active {
            updated.is_active = is_active;
        }
        updated.updated_at = Utc::now();
        validate(&updated)?;
        let stored = StoredPolicy::compile(updated.clone())?;

        policies.insert(updated.id.clone(), stored);
        Ok(updated)
    }

    /// Deletes a policy.
    pub fn delete(&self, id: &str) -> AccessResult<AccessPolicy> {
        self.policies
            .write()
            .remove(id)
            .map(|stored| stored.policy)
            .ok_or_else(|| AccessError::PolicyNotFound(id.to_string()))
    }

    /// Gets a policy.
    pub fn get(&self, id: &str) -> Option<AccessPolicy> {
        self.policies.read().get(id).map(|stored| stored.policy.clone())
    }

    /// Lists policies in evaluation order.
    pub fn list(&self) -> Vec<AccessPolicy> {
        let mut policies: Vec<AccessPolicy> = self
            .policies
            .read()
            .values()
            .map(|stored| stored.policy.clone())
            .collect();
        policies.sort_by(evaluation_order);
        policies
    }

    /// Returns the first active policy, in evaluation order, that `accept`
    /// takes. `accept` runs under the read lock and receives the compiled
    /// resource patterns.
    fn find_active(
        &self,
        mut accept: impl FnMut(&AccessPolicy, &[Regex]) -> AccessResult<bool>,
    ) -> AccessResult<Option<AccessPolicy>> {
        let policies = self.policies.read();
        let mut ordered: Vec<&StoredPolicy> = policies.values().filter(|s| s.policy.is_active).collect();
        ordered.sort_by(|a, b| evaluation_order(&a.policy, &b.policy));

        for stored in ordered {
            if accept(&stored.policy, &stored.patterns)? {
                return Ok(Some(stored.policy.clone()));
            }
        }
        Ok(None)
    }

    /// Returns the number of policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Returns true if there are no policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// Returns the number of active policies.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.policies.read().values().filter(|s| s.policy.is_active).count()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Descending priority, deny before allow at equal priority, then id.
fn evaluation_order(a: &AccessPolicy, b: &AccessPolicy) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| effect_rank(a.effect).cmp(&effect_rank(b.effect)))
        .then_with(|| a.id.cmp(&b.id))
}

fn effect_rank(effect: Effect) -> u8 {
    match effect {
        Effect::Deny => 0,
        Effect::Allow => 1,
    }
}

fn validate(policy: &AccessPolicy) -> AccessResult<()> {
    if policy.name.is_empty() {
        return Err(AccessError::InvalidPolicy("name must not be empty".to_string()));
    }
    if policy.actions.is_empty() {
        return Err(AccessError::InvalidPolicy(
            "at least one action is required".to_string(),
        ));
    }
    for condition in &policy.conditions {
        if condition.operator == ConditionOperator::In && !condition.value.is_array() {
            return Err(AccessError::InvalidPolicy(format!(
                "condition on '{}' uses 'in' without an array value",
                condition.field
            )));
        }
    }
    Ok(())
}

/// The requesting principal as seen by policies.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    /// User ID.
    pub user_id: String,
    /// IDs and names of the user's effective roles.
    pub roles: Vec<String>,
    /// Group names.
    pub groups: Vec<String>,
}

impl Principal {
    /// Creates a principal with no roles or groups.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets role identifiers.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Sets groups.
    #[must_use]
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Effect of the matching policy, `None` when nothing matched.
    pub effect: Option<Effect>,
    /// Matching policy ID.
    pub policy_id: Option<String>,
    /// Matching policy name.
    pub policy_name: Option<String>,
}

impl PolicyDecision {
    /// No policy matched.
    pub fn none() -> Self {
        Self {
            effect: None,
            policy_id: None,
            policy_name: None,
        }
    }

    /// A policy matched.
    pub fn matched(policy: &AccessPolicy) -> Self {
        Self {
            effect: Some(policy.effect),
            policy_id: Some(policy.id.clone()),
            policy_name: Some(policy.name.clone()),
        }
    }

    /// Returns true for an explicit deny.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.effect == Some(Effect::Deny)
    }

    /// Returns true for an explicit allow.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.effect == Some(Effect::Allow)
    }
}

/// Policy engine.
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
}

impl PolicyEngine {
    /// Creates an engine over a policy store.
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Returns the first active policy, by descending priority, matching
    /// principal, resource, action and conditions.
    pub fn evaluate(
        &self,
        principal: &Principal,
        check: &AccessCheck,
        bindings: &Bindings,
    ) -> AccessResult<PolicyDecision> {
        let context = condition_context(&principal.user_id, &check.context);

        let matched = self.store.find_active(|policy, patterns| {
            if !policy.matches_principal(principal)
                || !policy.matches_resource_with(&check.resource, check.resource_id.as_deref(), patterns)
                || !policy.matches_action(&check.action)
            {
                return Ok(false);
            }
            ConditionEvaluator::evaluate(&policy.conditions, &context, bindings)
        })?;

        match matched {
            Some(policy) => {
                tracing::debug!(
                    policy_id = %policy.id,
                    effect = %policy.effect,
                    "Policy matched"
                );
                Ok(PolicyDecision::matched(&policy))
            }
            None => Ok(PolicyDecision::none()),
        }
    }
}

/// Builds `{userId, ...context}` for condition evaluation.
pub(crate) fn condition_context(user_id: &str, context: &Context) -> Context {
    let mut merged = Context::new();
    merged.insert("userId".to_string(), Value::String(user_id.to_string()));
    for (key, value) in context {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
