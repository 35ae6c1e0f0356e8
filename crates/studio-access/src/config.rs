//! Engine configuration.

use crate::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Access engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Lifetime of a cached decision in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached decisions.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Maximum number of retained audit entries.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Time budget for a single membership lookup in milliseconds.
    #[serde(default = "default_membership_timeout")]
    pub membership_timeout_ms: u64,

    /// Seed the built-in system roles on initialization.
    #[serde(default = "default_true")]
    pub seed_system_roles: bool,

    /// Interval of the background cache sweep and audit flush in seconds.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_audit_capacity() -> usize {
    1000
}

fn default_membership_timeout() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_maintenance_interval() -> u64 {
    60
}

impl AccessConfig {
    /// Returns the decision cache TTL.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Returns the membership lookup budget.
    #[must_use]
    pub fn membership_timeout(&self) -> Duration {
        Duration::from_millis(self.membership_timeout_ms)
    }

    /// Returns the maintenance interval.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AccessResult<()> {
        if self.cache_ttl_secs == 0 {
            return Err(AccessError::Configuration(
                "cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(AccessError::Configuration(
                "cache_max_entries must be greater than zero".to_string(),
            ));
        }
        if self.audit_capacity == 0 {
            return Err(AccessError::Configuration(
                "audit_capacity must be greater than zero".to_string(),
            ));
        }
        if self.membership_timeout_ms == 0 {
            return Err(AccessError::Configuration(
                "membership_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(AccessError::Configuration(
                "maintenance_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            audit_capacity: default_audit_capacity(),
            membership_timeout_ms: default_membership_timeout(),
            seed_system_roles: true,
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}
