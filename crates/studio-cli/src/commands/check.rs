//! Access check command.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use studio_access::{AccessCheck, AccessDecisionService};

use crate::output::{self, OutputFormat};

use super::parse_key_value;

/// Decide whether a user may perform an action.
#[derive(Args)]
pub struct CheckCommand {
    /// User ID
    pub user: String,

    /// Resource type (e.g. conversation)
    pub resource: String,

    /// Action (e.g. read)
    pub action: String,

    /// Specific resource ID
    #[arg(long = "id")]
    pub resource_id: Option<String>,

    /// Context entry as key=value (repeatable, value may be JSON)
    #[arg(long = "context", short = 'x', value_parser = parse_key_value)]
    pub context: Vec<(String, Value)>,

    /// Exit with a non-zero status when access is denied
    #[arg(long)]
    pub strict: bool,
}

impl CheckCommand {
    /// Runs the check.
    pub async fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        let mut check = AccessCheck::new(self.resource, self.action);
        if let Some(id) = self.resource_id {
            check = check.with_resource_id(id);
        }
        for (key, value) in self.context {
            check = check.with_context(key, value);
        }

        let decision = service.check_access(&self.user, &check).await;
        output::print_decision(&decision, format)?;

        if self.strict && !decision.allowed {
            anyhow::bail!("Access denied: {}", decision.reason);
        }
        Ok(())
    }
}
