//! Access control error types.

use thiserror::Error;

/// Access control result type.
pub type AccessResult<T> = Result<T, AccessError>;

/// Access control errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Role not found.
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Assignment not found.
    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),

    /// Policy not found.
    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    /// Structural change or deletion attempted on a system role.
    #[error("System role is immutable: {0}")]
    ImmutableSystemRole(String),

    /// Assignment attempted against a disabled role.
    #[error("Role is inactive: {0}")]
    InactiveRole(String),

    /// Scope resolution needed a context field that was absent.
    #[error("Insufficient context: missing {0}")]
    InsufficientContext(String),

    /// Invalid role definition.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Invalid assignment request.
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    /// Invalid policy definition.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Malformed condition.
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Membership provider failure.
    #[error("Membership lookup failed: {0}")]
    Membership(String),

    /// Collaborator call exceeded its time budget.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccessError {
    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::AssignmentNotFound(_) => "ASSIGNMENT_NOT_FOUND",
            Self::PolicyNotFound(_) => "POLICY_NOT_FOUND",
            Self::ImmutableSystemRole(_) => "IMMUTABLE_SYSTEM_ROLE",
            Self::InactiveRole(_) => "INACTIVE_ROLE",
            Self::InsufficientContext(_) => "INSUFFICIENT_CONTEXT",
            Self::InvalidRole(_) => "INVALID_ROLE",
            Self::InvalidAssignment(_) => "INVALID_ASSIGNMENT",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::InvalidCondition(_) => "INVALID_CONDITION",
            Self::Membership(_) => "MEMBERSHIP_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true for lookup misses on a mutating call.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RoleNotFound(_) | Self::AssignmentNotFound(_) | Self::PolicyNotFound(_)
        )
    }
}
