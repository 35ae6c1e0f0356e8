//! Role assignments and effective role resolution.

use crate::rbac::{Role, RoleStore};
use crate::{AccessError, AccessResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Where an assignment applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentScope {
    /// Everywhere.
    #[default]
    Global,
    /// A single workspace.
    Workspace,
    /// A single resource.
    Resource,
}

/// Binding of a role to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Assignment ID.
    pub id: String,
    /// User ID.
    pub user_id: String,
    /// Role ID.
    pub role_id: String,
    /// Scope.
    pub scope: AssignmentScope,
    /// Workspace or resource ID for non-global scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    /// Who granted the role.
    pub assigned_by: String,
    /// Grant time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub assigned_at: DateTime<Utc>,
    /// Expiry time.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Returns true if the assignment still applies at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Options for [`AssignmentManager::assign_role`].
#[derive(Debug, Clone, Default)]
pub struct AssignOptions {
    /// Scope.
    pub scope: AssignmentScope,
    /// Scope target.
    pub scope_id: Option<String>,
    /// Lifetime of the grant.
    pub expires_in: Option<Duration>,
    /// Granting principal.
    pub assigned_by: Option<String>,
}

impl AssignOptions {
    /// Global, non-expiring grant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lifetime.
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Scopes the grant to a workspace.
    #[must_use]
    pub fn in_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.scope = AssignmentScope::Workspace;
        self.scope_id = Some(workspace_id.into());
        self
    }

    /// Scopes the grant to a resource.
    #[must_use]
    pub fn on_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.scope = AssignmentScope::Resource;
        self.scope_id = Some(resource_id.into());
        self
    }

    /// Records the granting principal.
    #[must_use]
    pub fn assigned_by(mut self, principal: impl Into<String>) -> Self {
        self.assigned_by = Some(principal.into());
        self
    }
}

/// Assignment manager.
pub struct AssignmentManager {
    roles: Arc<RoleStore>,
    assignments: RwLock<HashMap<String, RoleAssignment>>,
}

impl AssignmentManager {
    /// Creates a manager over a role store.
    pub fn new(roles: Arc<RoleStore>) -> Self {
        Self {
            roles,
            assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces all assignments (startup load).
    pub fn replace_all(&self, loaded: Vec<RoleAssignment>) {
        let mut assignments = self.assignments.write();
        assignments.clear();
        for assignment in loaded {
            assignments.insert(assignment.id.clone(), assignment);
        }
    }

    /// Grants a role to a user.
    pub fn assign_role(&self, user_id: &str, role_id: &str, options: AssignOptions) -> AccessResult<RoleAssignment> {
        if user_id.trim().is_empty() {
            return Err(AccessError::InvalidAssignment("user id must not be empty".to_string()));
        }
        if options.scope != AssignmentScope::Global && options.scope_id.is_none() {
            return Err(AccessError::InvalidAssignment(
                "scoped assignments require a scope id".to_string(),
            ));
        }

        let role = self
            .roles
            .get(role_id)
            .ok_or_else(|| AccessError::RoleNotFound(role_id.to_string()))?;
        if !role.is_active {
            return Err(AccessError::InactiveRole(role_id.to_string()));
        }

        let now = Utc::now();
        let expires_at = match options.expires_in {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl)
                    .map_err(|e| AccessError::InvalidAssignment(e.to_string()))?,
            ),
            None => None,
        };

        let assignment = RoleAssignment {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role_id: role.id,
            scope: options.scope,
            scope_id: options.scope_id,
            assigned_by: options.assigned_by.unwrap_or_else(|| "system".to_string()),
            assigned_at: now,
            expires_at,
        };

        self.assignments
            .write()
            .insert(assignment.id.clone(), assignment.clone());

        Ok(assignment)
    }

    /// Revokes an assignment, returning the removed record.
    pub fn revoke_role(&self, assignment_id: &str) -> AccessResult<RoleAssignment> {
        self.assignments
            .write()
            .remove(assignment_id)
            .ok_or_else(|| AccessError::AssignmentNotFound(assignment_id.to_string()))
    }

    /// Resolves the user's effective roles now.
    pub fn get_user_roles(&self, user_id: &str) -> Vec<Role> {
        self.get_user_roles_at(user_id, Utc::now())
    }

    /// Resolves the user's effective roles at `now`: live assignments of
    /// active roles, expanded through inheritance.
    pub fn get_user_roles_at(&self, user_id: &str, now: DateTime<Utc>) -> Vec<Role> {
        let direct: Vec<String> = {
            let assignments = self.assignments.read();
            let mut live: Vec<&RoleAssignment> = assignments
                .values()
                .filter(|a| a.user_id == user_id && a.is_live_at(now))
                .collect();
            live.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));
            live.into_iter().map(|a| a.role_id.clone()).collect()
        };

        self.roles.with_roles(|roles| {
            expand(roles, direct, true)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Returns raw assignment records for a user, expired ones included.
    pub fn get_user_assignments(&self, user_id: &str) -> Vec<RoleAssignment> {
        let mut records: Vec<RoleAssignment> = self
            .assignments
            .read()
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));
        records
    }

    /// Gets an assignment by ID.
    pub fn get(&self, assignment_id: &str) -> Option<RoleAssignment> {
        self.assignments.read().get(assignment_id).cloned()
    }

    /// Users that reach `role_id` directly or through inheritance.
    pub fn users_holding(&self, role_id: &str) -> Vec<String> {
        let by_user: HashMap<String, Vec<String>> = {
            let assignments = self.assignments.read();
            let mut by_user: HashMap<String, Vec<String>> = HashMap::new();
            for assignment in assignments.values() {
                by_user
                    .entry(assignment.user_id.clone())
                    .or_default()
                    .push(assignment.role_id.clone());
            }
            by_user
        };

        self.roles.with_roles(|roles| {
            let mut users: Vec<String> = by_user
                .into_iter()
                .filter(|(_, direct)| {
                    direct.iter().any(|id| id == role_id)
                        || expand(roles, direct.clone(), false)
                            .iter()
                            .any(|r| r.id == role_id)
                })
                .map(|(user, _)| user)
                .collect();
            users.sort();
            users
        })
    }

    /// Earliest future expiry among the user's assignments.
    pub fn next_expiry(&self, user_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.assignments
            .read()
            .values()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| a.expires_at)
            .filter(|expires| *expires > now)
            .min()
    }

    /// Returns all assignments flattened across users.
    pub fn all(&self) -> Vec<RoleAssignment> {
        let mut all: Vec<RoleAssignment> = self.assignments.read().values().cloned().collect();
        all.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));
        all
    }

    /// Returns the number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.read().len()
    }

    /// Returns true if there are no assignments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.read().is_empty()
    }
}

/// Breadth-first expansion through `inherits_from`, guarded by a visited set
/// so inheritance cycles terminate. With `active_only`, inactive roles are
/// skipped and not expanded further.
fn expand<'a>(
    roles: &'a HashMap<String, Role>,
    start: impl IntoIterator<Item = String>,
    active_only: bool,
) -> Vec<&'a Role> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<String> = start.into_iter().collect();

    while let Some(role_id) = queue.pop_front() {
        if !visited.insert(role_id.clone()) {
            continue;
        }

        let Some(role) = roles.get(&role_id) else {
            continue;
        };
        if active_only && !role.is_active {
            continue;
        }

        result.push(role);
        for parent in &role.inherits_from {
            if !visited.contains(parent) {
                queue.push_back(parent.clone());
            }
        }
    }

    result
}
