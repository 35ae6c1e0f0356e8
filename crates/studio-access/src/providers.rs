//! Collaborator interfaces supplied by the surrounding application.
//!
//! The engine never reaches into the application's auth or workspace
//! modules; it only sees these traits, injected at construction.

use crate::AccessResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Account status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Active account.
    #[default]
    Active,
    /// Temporarily suspended account.
    Suspended,
    /// Deactivated account.
    Disabled,
}

/// The signed-in user as reported by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Organization ID.
    pub organization_id: Option<String>,
    /// Account status.
    #[serde(default)]
    pub status: UserStatus,
}

impl Identity {
    /// Creates an active identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organization_id: None,
            status: UserStatus::Active,
        }
    }

    /// Sets the organization.
    #[must_use]
    pub fn in_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

/// Source of the current identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in user, if any.
    async fn current_user(&self) -> Option<Identity>;
}

/// Team and organization membership lookups.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Returns true if the user belongs to the workspace/team.
    async fn is_team_member(&self, workspace_id: &str, user_id: &str) -> AccessResult<bool>;

    /// Returns true if the user belongs to the organization.
    async fn is_org_member(&self, organization_id: &str, user_id: &str) -> AccessResult<bool>;
}

/// Identity provider with no signed-in user.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

#[async_trait]
impl IdentityProvider for NoIdentity {
    async fn current_user(&self) -> Option<Identity> {
        None
    }
}

/// Identity provider returning a fixed, replaceable identity.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    current: RwLock<Option<Identity>>,
}

impl StaticIdentity {
    /// Creates a provider for an identity.
    pub fn new(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    /// Replaces the current identity.
    pub fn set(&self, identity: Option<Identity>) {
        *self.current.write() = identity;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<Identity> {
        self.current.read().clone()
    }
}

/// Resident in-process membership table.
#[derive(Debug, Default)]
pub struct StaticMembership {
    teams: RwLock<HashMap<String, HashSet<String>>>,
    organizations: RwLock<HashMap<String, HashSet<String>>>,
}

impl StaticMembership {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `group -> members` maps.
    pub fn from_maps(
        teams: HashMap<String, Vec<String>>,
        organizations: HashMap<String, Vec<String>>,
    ) -> Self {
        let membership = Self::new();
        for (team, members) in teams {
            for member in members {
                membership.add_team_member(&team, member);
            }
        }
        for (org, members) in organizations {
            for member in members {
                membership.add_org_member(&org, member);
            }
        }
        membership
    }

    /// Adds a user to a workspace/team.
    pub fn add_team_member(&self, workspace_id: &str, user_id: impl Into<String>) {
        self.teams
            .write()
            .entry(workspace_id.to_string())
            .or_default()
            .insert(user_id.into());
    }

    /// Removes a user from a workspace/team.
    pub fn remove_team_member(&self, workspace_id: &str, user_id: &str) {
        if let Some(members) = self.teams.write().get_mut(workspace_id) {
            members.remove(user_id);
        }
    }

    /// Adds a user to an organization.
    pub fn add_org_member(&self, organization_id: &str, user_id: impl Into<String>) {
        self.organizations
            .write()
            .entry(organization_id.to_string())
            .or_default()
            .insert(user_id.into());
    }
}

#[async_trait]
impl MembershipProvider for StaticMembership {
    async fn is_team_member(&self, workspace_id: &str, user_id: &str) -> AccessResult<bool> {
        Ok(self
            .teams
            .read()
            .get(workspace_id)
            .map_or(false, |members| members.contains(user_id)))
    }

    async fn is_org_member(&self, organization_id: &str, user_id: &str) -> AccessResult<bool> {
        Ok(self
            .organizations
            .read()
            .get(organization_id)
            .map_or(false, |members| members.contains(user_id)))
    }
}
