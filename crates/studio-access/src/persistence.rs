//! Durable storage seam for engine collections.

use crate::assignment::RoleAssignment;
use crate::audit::AuditLogEntry;
use crate::policy::AccessPolicy;
use crate::rbac::Role;
use crate::AccessResult;
use async_trait::async_trait;

/// Loads and saves whole collections.
///
/// The engine keeps its collections in memory and writes the full
/// collection after each mutation; stores are read only at startup.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Loads roles.
    async fn load_roles(&self) -> AccessResult<Vec<Role>>;

    /// Saves roles.
    async fn save_roles(&self, roles: &[Role]) -> AccessResult<()>;

    /// Loads assignments.
    async fn load_assignments(&self) -> AccessResult<Vec<RoleAssignment>>;

    /// Saves assignments.
    async fn save_assignments(&self, assignments: &[RoleAssignment]) -> AccessResult<()>;

    /// Loads policies.
    async fn load_policies(&self) -> AccessResult<Vec<AccessPolicy>>;

    /// Saves policies.
    async fn save_policies(&self, policies: &[AccessPolicy]) -> AccessResult<()>;

    /// Loads audit entries.
    async fn load_audit_logs(&self) -> AccessResult<Vec<AuditLogEntry>>;

    /// Saves audit entries.
    async fn save_audit_logs(&self, entries: &[AuditLogEntry]) -> AccessResult<()>;
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl PersistenceStore for NoopPersistence {
    async fn load_roles(&self) -> AccessResult<Vec<Role>> {
        Ok(Vec::new())
    }

    async fn save_roles(&self, _roles: &[Role]) -> AccessResult<()> {
        Ok(())
    }

    async fn load_assignments(&self) -> AccessResult<Vec<RoleAssignment>> {
        Ok(Vec::new())
    }

    async fn save_assignments(&self, _assignments: &[RoleAssignment]) -> AccessResult<()> {
        Ok(())
    }

    async fn load_policies(&self) -> AccessResult<Vec<AccessPolicy>> {
        Ok(Vec::new())
    }

    async fn save_policies(&self, _policies: &[AccessPolicy]) -> AccessResult<()> {
        Ok(())
    }

    async fn load_audit_logs(&self) -> AccessResult<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }

    async fn save_audit_logs(&self, _entries: &[AuditLogEntry]) -> AccessResult<()> {
        Ok(())
    }
}
