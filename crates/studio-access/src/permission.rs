//! Role-derived permission evaluation with scope resolution.

use crate::authorizer::AccessCheck;
use crate::condition::{Bindings, ConditionEvaluator, Context};
use crate::policy::condition_context;
use crate::providers::{IdentityProvider, MembershipProvider, UserStatus};
use crate::rbac::{Permission, PermissionScope};
use crate::{AccessError, AccessResult};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Permission evaluator.
pub struct PermissionEvaluator {
    identity: Arc<dyn IdentityProvider>,
    membership: Arc<dyn MembershipProvider>,
    lookup_timeout: Duration,
}

impl PermissionEvaluator {
    /// Creates an evaluator.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        membership: Arc<dyn MembershipProvider>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            membership,
            lookup_timeout,
        }
    }

    /// Returns true if any permission grants the request.
    pub async fn evaluate(
        &self,
        permissions: &[Permission],
        check: &AccessCheck,
        user_id: &str,
        bindings: &Bindings,
    ) -> AccessResult<bool> {
        Ok(self.find_match(permissions, check, user_id, bindings).await?.is_some())
    }

    /// Returns the first permission whose resource, action, scope and
    /// conditions all pass.
    pub async fn find_match<'p>(
        &self,
        permissions: &'p [Permission],
        check: &AccessCheck,
        user_id: &str,
        bindings: &Bindings,
    ) -> AccessResult<Option<&'p Permission>> {
        let condition_ctx = condition_context(user_id, &check.context);

        for permission in permissions {
            if !permission.applies_to(&check.resource) || !permission.allows_action(&check.action) {
                continue;
            }

            match self.check_scope(permission.scope, user_id, &check.context).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(AccessError::InsufficientContext(field)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        scope = %permission.scope,
                        missing = %field,
                        "Scope check lacks context"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        scope = %permission.scope,
                        error = %e,
                        "Scope check failed, treating as no match"
                    );
                    continue;
                }
            }

            if ConditionEvaluator::evaluate(&permission.conditions, &condition_ctx, bindings)? {
                return Ok(Some(permission));
            }
        }

        Ok(None)
    }

    /// Resolves whether `scope` covers the request for `user_id`.
    pub async fn check_scope(
        &self,
        scope: PermissionScope,
        user_id: &str,
        context: &Context,
    ) -> AccessResult<bool> {
        match scope {
            PermissionScope::All => Ok(true),
            PermissionScope::Own => {
                let owner = context_id(context, "ownerId");
                let creator = context_id(context, "createdBy");
                if owner.is_none() && creator.is_none() {
                    return Err(AccessError::InsufficientContext("ownerId".to_string()));
                }
                Ok(owner.as_deref() == Some(user_id) || creator.as_deref() == Some(user_id))
            }
            PermissionScope::Team => {
                let workspace_id = context_id(context, "workspaceId")
                    .or_else(|| context_id(context, "teamId"))
                    .ok_or_else(|| AccessError::InsufficientContext("workspaceId".to_string()))?;

                self.bounded(
                    format!("team membership of {}", workspace_id),
                    self.membership.is_team_member(&workspace_id, user_id),
                )
                .await
            }
            PermissionScope::Organization => {
                let organization_id = context_id(context, "organizationId")
                    .ok_or_else(|| AccessError::InsufficientContext("organizationId".to_string()))?;

                let identity = tokio::time::timeout(self.lookup_timeout, self.identity.current_user())
                    .await
                    .ok()
                    .flatten();
                if let Some(identity) = identity {
                    if identity.id == user_id
                        && identity.status == UserStatus::Active
                        && identity.organization_id.as_deref() == Some(organization_id.as_str())
                    {
                        return Ok(true);
                    }
                }

                self.bounded(
                    format!("organization membership of {}", organization_id),
                    self.membership.is_org_member(&organization_id, user_id),
                )
                .await
            }
        }
    }

    async fn bounded<F>(&self, what: String, lookup: F) -> AccessResult<bool>
    where
        F: Future<Output = AccessResult<bool>>,
    {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(AccessError::Timeout(what)),
        }
    }
}

/// Reads an identifier from the top level of the context.
fn context_id(context: &Context, key: &str) -> Option<String> {
    match context.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
