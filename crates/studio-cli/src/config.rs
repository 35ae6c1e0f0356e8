//! CLI configuration.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use studio_access::{
    AccessConfig, AccessDecisionService, Identity, IdentityProvider, NoIdentity, NoopPersistence,
    PersistenceStore, StaticIdentity, StaticMembership,
};
use studio_storage::{FilesystemBackend, InMemoryBackend, JsonPersistence};

/// CLI configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    /// Engine settings.
    #[serde(default)]
    pub access: AccessConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Resident membership table.
    #[serde(default)]
    pub memberships: MembershipConfig,
    /// Signed-in identity, if any.
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage backend type (memory, filesystem, none).
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Filesystem storage path.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Write indented JSON.
    #[serde(default)]
    pub pretty: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
            pretty: false,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json, pretty).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Team and organization membership, `group -> [user ids]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MembershipConfig {
    /// Workspace/team members.
    #[serde(default)]
    pub teams: HashMap<String, Vec<String>>,
    /// Organization members.
    #[serde(default)]
    pub organizations: HashMap<String, Vec<String>>,
}

/// Signed-in identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// User ID.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Organization ID.
    #[serde(default)]
    pub organization_id: Option<String>,
}

fn default_storage_backend() -> String {
    "filesystem".to_string()
}

fn default_storage_path() -> String {
    ".studio-access".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl CliConfig {
    /// Loads configuration from files and environment.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("STUDIO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let cli_config: CliConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        cli_config.validate()?;

        Ok(cli_config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.access.validate()?;

        match self.storage.backend.as_str() {
            "memory" | "none" => {}
            "filesystem" => {
                if self.storage.path.trim().is_empty() {
                    anyhow::bail!("storage.path is required for the filesystem backend");
                }
            }
            other => anyhow::bail!("Unknown storage backend: {}", other),
        }

        Ok(())
    }

    /// Builds the persistence store for the configured backend.
    pub async fn persistence(&self) -> Result<Arc<dyn PersistenceStore>> {
        let store: Arc<dyn PersistenceStore> = match self.storage.backend.as_str() {
            "filesystem" => {
                let backend = FilesystemBackend::new(&self.storage.path)
                    .await
                    .with_context(|| format!("Cannot open storage at {}", self.storage.path))?;
                Arc::new(JsonPersistence::new(backend).pretty(self.storage.pretty))
            }
            "memory" => Arc::new(JsonPersistence::new(InMemoryBackend::new())),
            _ => Arc::new(NoopPersistence),
        };
        Ok(store)
    }

    /// Builds the identity provider.
    pub fn identity_provider(&self) -> Arc<dyn IdentityProvider> {
        match &self.identity {
            Some(cfg) => {
                let mut identity = Identity::new(
                    cfg.id.clone(),
                    cfg.name.clone().unwrap_or_else(|| cfg.id.clone()),
                );
                if let Some(org) = &cfg.organization_id {
                    identity = identity.in_organization(org.clone());
                }
                Arc::new(StaticIdentity::new(identity))
            }
            None => Arc::new(NoIdentity),
        }
    }

    /// Builds and initializes the decision service.
    pub async fn build_service(&self) -> Result<Arc<AccessDecisionService>> {
        let membership = StaticMembership::from_maps(
            self.memberships.teams.clone(),
            self.memberships.organizations.clone(),
        );

        let service = AccessDecisionService::new(
            self.access.clone(),
            self.persistence().await?,
            self.identity_provider(),
            Arc::new(membership),
        )?;
        service
            .initialize()
            .await
            .context("Failed to load access control state")?;

        Ok(Arc::new(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_access::{AccessCheck, AssignOptions};
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();

        assert_eq!(config.storage.backend, "filesystem");
        assert_eq!(config.storage.path, ".studio-access");
        assert_eq!(config.telemetry.log_format, "pretty");
        assert_eq!(config.access.cache_ttl_secs, 300);
        assert!(config.identity.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("studio.json");
        std::fs::write(
            &path,
            json!({
                "access": {"cache_ttl_secs": 30},
                "storage": {"backend": "memory"},
                "memberships": {"teams": {"ws-1": ["u1", "u2"]}},
                "identity": {"id": "u1", "organization_id": "org-1"}
            })
            .to_string(),
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();

        assert_eq!(config.access.cache_ttl_secs, 30);
        assert_eq!(config.access.audit_capacity, 1000);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.memberships.teams["ws-1"].len(), 2);
        assert_eq!(
            config.identity.as_ref().and_then(|i| i.organization_id.as_deref()),
            Some("org-1")
        );
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = CliConfig::default();
        config.storage.backend = "s3".to_string();

        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_service_uses_memberships() {
        let mut config = CliConfig::default();
        config.storage.backend = "memory".to_string();
        config
            .memberships
            .teams
            .insert("ws-1".to_string(), vec!["u1".to_string()]);

        let service = config.build_service().await.unwrap();
        service.assign_role("u1", "viewer", AssignOptions::new()).await.unwrap();

        let check = AccessCheck::new("conversation", "read").with_context("workspaceId", json!("ws-1"));
        assert!(service.check_access("u1", &check).await.allowed);
    }
}
