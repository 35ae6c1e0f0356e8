//! Access control decision engine for AI Chat Studio.
//!
//! This crate answers "may user U perform action A on resource R?" by
//! combining:
//! - Role-based permissions with inheritance and ownership/team/organization scopes
//! - Explicit allow/deny policies evaluated by priority (deny wins)
//! - Conditional predicates over the request context
//! - A TTL-bounded decision cache and a bounded audit trail
//!
//! Evaluation fails closed: any internal fault produces a denial.

pub mod error;
pub mod config;
pub mod condition;
pub mod rbac;
pub mod assignment;
pub mod policy;
pub mod permission;
pub mod providers;
pub mod cache;
pub mod audit;
pub mod persistence;
pub mod authorizer;

pub use error::{AccessError, AccessResult};
pub use config::AccessConfig;
pub use condition::{Bindings, Condition, ConditionEvaluator, ConditionOperator, Context};
pub use rbac::{Permission, PermissionScope, Role, RoleDraft, RoleFilter, RolePatch, RoleStore};
pub use assignment::{AssignOptions, AssignmentManager, AssignmentScope, RoleAssignment};
pub use policy::{
    AccessPolicy, Effect, PolicyDecision, PolicyDraft, PolicyEngine, PolicyPatch, PolicyResources,
    PolicyStore, Principal, Principals,
};
pub use permission::PermissionEvaluator;
pub use providers::{
    Identity, IdentityProvider, MembershipProvider, NoIdentity, StaticIdentity, StaticMembership,
    UserStatus,
};
pub use cache::{CacheKey, CacheStats, DecisionCache};
pub use audit::{AuditLog, AuditLogEntry, AuditOutcome, AuditQuery};
pub use persistence::{NoopPersistence, PersistenceStore};
pub use authorizer::{AccessCheck, AccessDecision, AccessDecisionService, AccessStats, DecisionSource};
