//! Role definitions and the role store.

use crate::condition::Condition;
use crate::{AccessError, AccessResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Breadth of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    /// Resources the user owns or created.
    Own,
    /// Resources of a workspace/team the user belongs to.
    Team,
    /// Resources of an organization the user belongs to.
    Organization,
    /// Every resource.
    All,
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Own => write!(f, "own"),
            Self::Team => write!(f, "team"),
            Self::Organization => write!(f, "organization"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Permission granted by a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Resource type (`*` matches all).
    pub resource: String,
    /// Action (`*` matches all).
    pub action: String,
    /// Scope.
    pub scope: PermissionScope,
    /// Additional conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Permission {
    /// Creates a new permission.
    pub fn new(resource: impl Into<String>, action: impl Into<String>, scope: PermissionScope) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            scope,
            conditions: Vec::new(),
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Checks if this permission applies to the resource type.
    pub fn applies_to(&self, resource: &str) -> bool {
        self.resource == "*" || self.resource == resource
    }

    /// Checks if this permission allows the given action.
    pub fn allows_action(&self, action: &str) -> bool {
        self.action == "*" || self.action == action
    }

    fn validate(&self) -> AccessResult<()> {
        if self.resource.trim().is_empty() || self.action.trim().is_empty() {
            return Err(AccessError::InvalidRole(
                "permission resource and action must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.resource, self.action, self.scope)
    }
}

/// Role definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Role ID.
    pub id: String,
    /// Role name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Privilege level 0-100, used for ordering only.
    pub level: u8,
    /// Granted permissions.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Roles whose permissions this role also carries.
    #[serde(default)]
    pub inherits_from: Vec<String>,
    /// Built-in role with immutable structure.
    #[serde(default)]
    pub is_system: bool,
    /// Whether the role currently grants anything.
    pub is_active: bool,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last update time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Creates a new active custom role.
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: u8) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: name.clone(),
            name,
            description: None,
            level,
            permissions: Vec::new(),
            inherits_from: Vec::new(),
            is_system: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a system role.
    pub fn system(id: impl Into<String>, display_name: impl Into<String>, level: u8) -> Self {
        let id = id.into();
        let mut role = Self::new(id.clone(), id, level);
        role.display_name = display_name.into();
        role.is_system = true;
        role
    }

    /// Adds a permission.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Adds a parent role.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.inherits_from.push(parent_id.into());
        self
    }

    /// Sets description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Input for creating a custom role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDraft {
    /// Role name.
    pub name: String,
    /// Display name (defaults to the name).
    #[serde(default)]
    pub display_name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Privilege level 0-100.
    #[serde(default)]
    pub level: u8,
    /// Granted permissions.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Parent role IDs.
    #[serde(default)]
    pub inherits_from: Vec<String>,
}

impl RoleDraft {
    /// Creates a draft.
    pub fn new(name: impl Into<String>, level: u8) -> Self {
        Self {
            name: name.into(),
            level,
            ..Self::default()
        }
    }

    /// Adds a permission.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Adds a parent role.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.inherits_from.push(parent_id.into());
        self
    }
}

/// Partial role update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePatch {
    /// New name.
    pub name: Option<String>,
    /// New display name.
    pub display_name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New level.
    pub level: Option<u8>,
    /// Replacement permission list.
    pub permissions: Option<Vec<Permission>>,
    /// Replacement parent list.
    pub inherits_from: Option<Vec<String>>,
    /// Activation flag.
    pub is_active: Option<bool>,
}

impl RolePatch {
    /// Patch that only toggles activation.
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    /// Patch that renames the role.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Returns true if the patch changes anything besides activation.
    #[must_use]
    pub fn touches_structure(&self) -> bool {
        self.name.is_some()
            || self.display_name.is_some()
            || self.description.is_some()
            || self.level.is_some()
            || self.permissions.is_some()
            || self.inherits_from.is_some()
    }
}

/// Role listing filter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleFilter {
    /// Only roles with this activation state.
    pub is_active: Option<bool>,
    /// Only system (or only custom) roles.
    pub is_system: Option<bool>,
}

impl RoleFilter {
    fn matches(&self, role: &Role) -> bool {
        self.is_active.map_or(true, |v| role.is_active == v)
            && self.is_system.map_or(true, |v| role.is_system == v)
    }
}

/// Built-in roles seeded at startup.
pub fn system_roles() -> Vec<Role> {
    use PermissionScope::{All, Organization, Own, Team};

    vec![
        Role::system("owner", "Owner", 100)
            .with_permission(Permission::new("*", "*", All))
            .with_description("Full access to every resource"),
        Role::system("admin", "Administrator", 80)
            .with_permission(Permission::new("user", "*", Organization))
            .with_permission(Permission::new("workspace", "*", Organization))
            .with_permission(Permission::new("conversation", "*", Organization))
            .with_permission(Permission::new("message", "*", Organization))
            .with_permission(Permission::new("role", "read", All))
            .with_permission(Permission::new("audit", "read", Organization))
            .with_parent("member")
            .with_description("Organization administration"),
        Role::system("member", "Member", 50)
            .with_permission(Permission::new("conversation", "create", Own))
            .with_permission(Permission::new("conversation", "update", Own))
            .with_permission(Permission::new("conversation", "delete", Own))
            .with_permission(Permission::new("message", "create", Own))
            .with_permission(Permission::new("message", "update", Own))
            .with_parent("viewer")
            .with_description("Create and manage own conversations"),
        Role::system("viewer", "Viewer", 20)
            .with_permission(Permission::new("conversation", "read", Team))
            .with_permission(Permission::new("message", "read", Team))
            .with_description("Read team conversations"),
    ]
}

/// Role store.
pub struct RoleStore {
    roles: RwLock<HashMap<String, Role>>,
}

impl RoleStore {
    /// Creates an empty role store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roles: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts built-in roles that are not present yet. Returns the number added.
    pub fn seed_system_roles(&self) -> usize {
        let mut roles = self.roles.write();
        let mut added = 0;
        for role in system_roles() {
            if !roles.contains_key(&role.id) {
                roles.insert(role.id.clone(), role);
                added += 1;
            }
        }
        added
    }

    /// Replaces the whole role set (startup load).
    pub fn replace_all(&self, loaded: Vec<Role>) {
        let mut roles = self.roles.write();
        roles.clear();
        for role in loaded {
            roles.insert(role.id.clone(), role);
        }
    }

    /// Creates a custom role.
    pub fn create(&self, draft: RoleDraft) -> AccessResult<Role> {
        let mut roles = self.roles.write();

        let id = uuid::Uuid::new_v4().to_string();
        let mut role = Role::new(id, draft.name.trim(), draft.level);
        role.display_name = draft
            .display_name
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| role.name.clone());
        role.description = draft.description;
        role.permissions = draft.permissions;
        role.inherits_from = draft.inherits_from;

        Self::validate(&roles, &role, true)?;

        roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    /// Updates a role.
    pub fn update(&self, id: &str, patch: RolePatch) -> AccessResult<Role> {
        let mut roles = self.roles.write();

        let existing = roles
            .get(id)
            .ok_or_else(|| AccessError::RoleNotFound(id.to_string()))?;

        if existing.is_system && patch.touches_structure() {
            return Err(AccessError::ImmutableSystemRole(id.to_string()));
        }

        let parents_changed = patch.inherits_from.is_some();
        let mut updated = existing.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(display_name) = patch.display_name {
            updated.display_name = display_name;
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(level) = patch.level {
            updated.level = level;
        }
        if let Some(permissions) = patch.permissions {
            updated.permissions = permissions;
        }
        if let Some(parents) = patch.inherits_from {
            updated.inherits_from = parents;
        }
        if let Some(is_active) = patch.is_active {
            updated.is_active = is_active;
        }
        updated.updated_at = Utc::now();

        Self::validate(&roles, &updated, parents_changed)?;

        roles.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    /// Deletes a role and drops it from every `inherits_from` list.
    pub fn delete(&self, id: &str) -> AccessResult<Role> {
        let mut roles = self.roles.write();
        let is_system = roles
            .get(id)
            .map(|role| role.is_system)
            .ok_or_else(|| AccessError::RoleNotFound(id.to_string()))?;
        if is_system {
            return Err(AccessError::ImmutableSystemRole(id.to_string()));
        }
        let removed = roles
            .remove(id)
            .ok_or_else(|| AccessError::RoleNotFound(id.to_string()))?;

        let now = Utc::now();
        for child in roles.values_mut() {
            let before = child.inherits_from.len();
            child.inherits_from.retain(|parent| parent != id);
            if child.inherits_from.len() != before {
                child.updated_at = now;
                tracing::debug!(role_id = %child.id, parent_id = %id, "Dropped deleted parent role");
            }
        }
        Ok(removed)
    }

    /// Gets a role by ID.
    pub fn get(&self, id: &str) -> Option<Role> {
        self.roles.read().get(id).cloned()
    }

    /// Lists roles sorted by level, highest first.
    pub fn list(&self, filter: RoleFilter) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .roles
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        roles.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
        roles
    }

    /// Runs a closure against a consistent view of all roles.
    pub fn with_roles<R>(&self, f: impl FnOnce(&HashMap<String, Role>) -> R) -> R {
        f(&self.roles.read())
    }

    /// Returns the number of roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.read().len()
    }

    /// Returns true if there are no roles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.read().is_empty()
    }

    fn validate(roles: &HashMap<String, Role>, role: &Role, check_parents: bool) -> AccessResult<()> {
        if role.name.is_empty() {
            return Err(AccessError::InvalidRole("name must not be empty".to_string()));
        }
        if role.level > 100 {
            return Err(AccessError::InvalidRole(format!(
                "level {} is outside 0-100",
                role.level
            )));
        }
        if roles
            .values()
            .any(|other| other.id != role.id && other.name.eq_ignore_ascii_case(&role.name))
        {
            return Err(AccessError::InvalidRole(format!(
                "role name '{}' is already taken",
                role.name
            )));
        }
        for parent in role.inherits_from.iter().filter(|_| check_parents) {
            if parent == &role.id {
                return Err(AccessError::InvalidRole("role cannot inherit from itself".to_string()));
            }
            if !roles.contains_key(parent) {
                return Err(AccessError::RoleNotFound(parent.clone()));
            }
        }
        for permission in &role.permissions {
            permission.validate()?;
        }
        Ok(())
    }
}

impl Default for RoleStore {
    fn default() -> Self {
        Self::new()
    }
}
