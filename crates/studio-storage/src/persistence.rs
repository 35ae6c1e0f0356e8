//! JSON persistence of engine collections over a storage backend.

use crate::{StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use studio_access::{
    AccessPolicy, AccessResult, AuditLogEntry, PersistenceStore, Role, RoleAssignment,
};

/// Object key for roles.
pub const ROLES_KEY: &str = "roles.json";
/// Object key for assignments.
pub const ASSIGNMENTS_KEY: &str = "assignments.json";
/// Object key for policies.
pub const POLICIES_KEY: &str = "policies.json";
/// Object key for audit entries.
pub const AUDIT_LOGS_KEY: &str = "audit_logs.json";

/// Stores each collection as one flat JSON array.
pub struct JsonPersistence<B> {
    backend: B,
    pretty: bool,
}

impl<B: StorageBackend> JsonPersistence<B> {
    /// Creates a persistence layer over a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pretty: false,
        }
    }

    /// Writes indented JSON.
    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Vec<T>> {
        match self.backend.get(key).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn save<T: Serialize + Sync>(&self, key: &str, items: &[T]) -> StorageResult<()> {
        let data = if self.pretty {
            serde_json::to_vec_pretty(items)?
        } else {
            serde_json::to_vec(items)?
        };

        tracing::debug!(
            backend = self.backend.name(),
            key = %key,
            items = items.len(),
            "Saving collection"
        );
        self.backend.put(key, Bytes::from(data)).await
    }
}

#[async_trait]
impl<B: StorageBackend> PersistenceStore for JsonPersistence<B> {
    async fn load_roles(&self) -> AccessResult<Vec<Role>> {
        Ok(self.load(ROLES_KEY).await?)
    }

    async fn save_roles(&self, roles: &[Role]) -> AccessResult<()> {
        Ok(self.save(ROLES_KEY, roles).await?)
    }

    async fn load_assignments(&self) -> AccessResult<Vec<RoleAssignment>> {
        Ok(self.load(ASSIGNMENTS_KEY).await?)
    }

    async fn save_assignments(&self, assignments: &[RoleAssignment]) -> AccessResult<()> {
        Ok(self.save(ASSIGNMENTS_KEY, assignments).await?)
    }

    async fn load_policies(&self) -> AccessResult<Vec<AccessPolicy>> {
        Ok(self.load(POLICIES_KEY).await?)
    }

    async fn save_policies(&self, policies: &[AccessPolicy]) -> AccessResult<()> {
        Ok(self.save(POLICIES_KEY, policies).await?)
    }

    async fn load_audit_logs(&self) -> AccessResult<Vec<AuditLogEntry>> {
        Ok(self.load(AUDIT_LOGS_KEY).await?)
    }

    async fn save_audit_logs(&self, entries: &[AuditLogEntry]) -> AccessResult<()> {
        Ok(self.save(AUDIT_LOGS_KEY, entries).await?)
    }
}
