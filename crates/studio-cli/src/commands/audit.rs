//! Audit trail query command.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use studio_access::{AccessDecisionService, AuditOutcome, AuditQuery};

use crate::output::{self, AuditRow, OutputFormat};

/// Query the audit trail, newest first.
#[derive(Args)]
pub struct AuditCommand {
    /// Filter by user ID
    #[arg(long, short)]
    pub user: Option<String>,

    /// Filter by resource type
    #[arg(long, short)]
    pub resource: Option<String>,

    /// Filter by action
    #[arg(long, short)]
    pub action: Option<String>,

    /// Filter by result (allowed, denied)
    #[arg(long)]
    pub result: Option<AuditOutcome>,

    /// Only entries at or after this RFC 3339 time
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Only entries at or before this RFC 3339 time
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Maximum number of entries
    #[arg(long, short, default_value = "50")]
    pub limit: usize,
}

impl AuditCommand {
    /// Runs the query.
    pub fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let entries = service.get_audit_logs(&self.query());
        output::print_list::<_, AuditRow>(&entries, format)
    }

    fn query(&self) -> AuditQuery {
        let mut query = AuditQuery::new().limit(self.limit);
        if let Some(ref user) = self.user {
            query = query.for_user(user.clone());
        }
        if let Some(ref resource) = self.resource {
            query = query.on_resource(resource.clone());
        }
        if let Some(ref action) = self.action {
            query = query.for_action(action.clone());
        }
        if let Some(result) = self.result {
            query = query.with_result(result);
        }
        query.start_date = self.since;
        query.end_date = self.until;
        query
    }
}
