//! Role assignment commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use studio_access::{AccessDecisionService, AssignOptions};

use crate::output::{self, success, AssignmentRow, OutputFormat, RoleRow};

use super::parse_duration;

/// Grant a role to a user.
#[derive(Args)]
pub struct AssignCommand {
    /// User ID
    pub user: String,

    /// Role ID
    pub role: String,

    /// Restrict the assignment to a workspace
    #[arg(long, short, conflicts_with = "resource")]
    pub workspace: Option<String>,

    /// Restrict the assignment to a single resource
    #[arg(long, short)]
    pub resource: Option<String>,

    /// Lifetime such as 90s, 15m, 2h or 7d
    #[arg(long, short, value_parser = parse_duration)]
    pub expires_in: Option<Duration>,

    /// Principal recorded as the grantor
    #[arg(long = "by")]
    pub assigned_by: Option<String>,
}

impl AssignCommand {
    /// Runs the assignment.
    pub async fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let mut options = AssignOptions::new();
        if let Some(workspace) = self.workspace {
            options = options.in_workspace(workspace);
        }
        if let Some(resource) = self.resource {
            options = options.on_resource(resource);
        }
        if let Some(ttl) = self.expires_in {
            options = options.expires_in(ttl);
        }
        if let Some(by) = self.assigned_by {
            options = options.assigned_by(by);
        }

        let assignment = service.assign_role(&self.user, &self.role, options).await?;

        success(&format!(
            "Assigned {} to {} ({})",
            assignment.role_id, assignment.user_id, assignment.id
        ));
        output::print_item::<_, AssignmentRow>(&assignment, format)
    }
}

/// Revoke a role assignment.
#[derive(Args)]
pub struct RevokeCommand {
    /// Assignment ID
    pub assignment_id: String,
}

impl RevokeCommand {
    /// Runs the revocation.
    pub async fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let assignment = service.revoke_role(&self.assignment_id).await?;

        if format == OutputFormat::Json {
            return output::print_json(&assignment);
        }
        success(&format!(
            "Revoked {} from {}",
            assignment.role_id, assignment.user_id
        ));
        Ok(())
    }
}

/// List a user's assignment records, expired ones included.
#[derive(Args)]
pub struct AssignmentsCommand {
    /// User ID
    pub user: String,

    /// Hide expired assignments
    #[arg(long)]
    pub live: bool,
}

impl AssignmentsCommand {
    /// Runs the listing.
    pub fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let mut assignments = service.get_user_assignments(&self.user);
        if self.live {
            let now = Utc::now();
            assignments.retain(|a| a.is_live_at(now));
        }
        output::print_list::<_, AssignmentRow>(&assignments, format)
    }
}

/// Show a user's effective roles, inheritance included.
#[derive(Args)]
pub struct UserRolesCommand {
    /// User ID
    pub user: String,
}

impl UserRolesCommand {
    /// Runs the lookup.
    pub fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let roles = service.get_user_roles(&self.user);
        output::print_list::<_, RoleRow>(&roles, format)
    }
}
