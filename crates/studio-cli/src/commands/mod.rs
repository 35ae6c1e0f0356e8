//! CLI command definitions and implementations.

mod assignments;
mod audit;
mod check;
mod policies;
mod roles;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use studio_access::{AccessDecisionService, Condition, ConditionOperator, Permission, PermissionScope};

use crate::config::CliConfig;
use crate::output::{self, OutputFormat};

pub use assignments::{AssignCommand, AssignmentsCommand, RevokeCommand, UserRolesCommand};
pub use audit::AuditCommand;
pub use check::CheckCommand;
pub use policies::PoliciesCommands;
pub use roles::RolesCommands;

/// AI Chat Studio access control CLI
///
/// Manages roles, assignments and policies, and answers access checks.
#[derive(Parser)]
#[command(name = "studio-access")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Additional configuration file
    #[arg(long, short, env = "STUDIO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Decide whether a user may perform an action
    Check(CheckCommand),

    /// Manage roles
    #[command(alias = "role")]
    Roles(RolesCommands),

    /// Grant a role to a user
    Assign(AssignCommand),

    /// Revoke a role assignment
    Revoke(RevokeCommand),

    /// Show a user's effective roles
    UserRoles(UserRolesCommand),

    /// List a user's role assignments
    Assignments(AssignmentsCommand),

    /// Manage access policies
    #[command(alias = "policy")]
    Policies(PoliciesCommands),

    /// Query the audit trail
    #[command(alias = "audit-log")]
    Audit(AuditCommand),

    /// Show role, policy, audit and cache counters
    Stats,
}

impl Cli {
    /// Runs the CLI command.
    pub async fn run(self, config: CliConfig) -> Result<()> {
        if self.no_color {
            colored::control::set_override(false);
        }

        let service = config.build_service().await?;
        let format = self.format;

        let outcome = match self.command {
            Commands::Check(cmd) => cmd.run(&service, format).await,
            Commands::Roles(cmd) => cmd.run(&service, format).await,
            Commands::Assign(cmd) => cmd.run(&service, format).await,
            Commands::Revoke(cmd) => cmd.run(&service, format).await,
            Commands::UserRoles(cmd) => cmd.run(&service, format),
            Commands::Assignments(cmd) => cmd.run(&service, format),
            Commands::Policies(cmd) => cmd.run(&service, format).await,
            Commands::Audit(cmd) => cmd.run(&service, format),
            Commands::Stats => stats(&service, format),
        };

        service.flush().await.context("Failed to save audit log")?;
        outcome
    }
}

fn stats(service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
    output::print_stats(&service.get_stats(), format)?;

    if format == OutputFormat::Table {
        let cache = service.cache_stats();
        println!(
            "{:<18} {:.1}% ({} hits, {} misses)",
            "Cache hit rate:",
            cache.hit_rate() * 100.0,
            cache.hits,
            cache.misses
        );
    }
    Ok(())
}

/// Parses `resource:action[:scope]`. Scope defaults to `all`.
pub fn parse_permission(s: &str) -> Result<Permission, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let (resource, action, scope) = match parts.as_slice() {
        [resource, action] => (*resource, *action, PermissionScope::All),
        [resource, action, scope] => (*resource, *action, parse_scope(scope)?),
        _ => return Err(format!("expected resource:action[:scope], got '{}'", s)),
    };

    if resource.is_empty() || action.is_empty() {
        return Err(format!("empty resource or action in '{}'", s));
    }
    Ok(Permission::new(resource, action, scope))
}

fn parse_scope(s: &str) -> Result<PermissionScope, String> {
    match s.to_ascii_lowercase().as_str() {
        "own" => Ok(PermissionScope::Own),
        "team" => Ok(PermissionScope::Team),
        "organization" | "org" => Ok(PermissionScope::Organization),
        "all" => Ok(PermissionScope::All),
        other => Err(format!("unknown scope '{}' (own, team, organization, all)", other)),
    }
}

/// Parses durations such as `90s`, `15m`, `2h` or `7d`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{}' (s, m, h, d)", other)),
    };

    if amount == 0 {
        return Err("duration must be positive".to_string());
    }
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Parses `key=value`. The value is read as JSON when it parses, otherwise as a string.
pub fn parse_key_value(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), parse_value(raw)))
}

/// Parses `field op value`, e.g. `metadata.tier == "gold"` or `ownerId == {{userId}}`.
pub fn parse_condition(s: &str) -> Result<Condition, String> {
    let mut parts = s.trim().splitn(3, char::is_whitespace);
    let (Some(field), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected 'field op value', got '{}'", s));
    };

    let operator = match op {
        "==" => ConditionOperator::Eq,
        "!=" => ConditionOperator::Ne,
        ">" => ConditionOperator::Gt,
        "<" => ConditionOperator::Lt,
        "contains" => ConditionOperator::Contains,
        "in" => ConditionOperator::In,
        other => return Err(format!("unknown operator '{}'", other)),
    };
    Ok(Condition::new(field, operator, parse_value(raw.trim())))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_permission() {
        let p = parse_permission("conversation:read:team").unwrap();
        assert_eq!(p.resource, "conversation");
        assert_eq!(p.action, "read");
        assert_eq!(p.scope, PermissionScope::Team);

        assert_eq!(parse_permission("*:*").unwrap().scope, PermissionScope::All);
        assert!(parse_permission("conversation").is_err());
        assert!(parse_permission("conversation:read:galaxy").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("3w").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("workspaceId=ws-1").unwrap(),
            ("workspaceId".to_string(), json!("ws-1"))
        );
        assert_eq!(
            parse_key_value("groups=[\"eng\",\"ops\"]").unwrap().1,
            json!(["eng", "ops"])
        );
        assert_eq!(parse_key_value("size=42").unwrap().1, json!(42));
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_parse_condition() {
        let c = parse_condition("ownerId == {{userId}}").unwrap();
        assert_eq!(c.field, "ownerId");
        assert_eq!(c.operator, ConditionOperator::Eq);
        assert_eq!(c.value, json!("{{userId}}"));

        let c = parse_condition("metadata.tier in [\"gold\", \"silver\"]").unwrap();
        assert_eq!(c.operator, ConditionOperator::In);
        assert_eq!(c.value, json!(["gold", "silver"]));

        assert!(parse_condition("ownerId ~= x").is_err());
        assert!(parse_condition("ownerId").is_err());
    }
}
