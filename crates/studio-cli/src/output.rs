//! Output formatting and display utilities.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use studio_access::{
    AccessDecision, AccessPolicy, AccessStats, AuditLogEntry, AuditOutcome, Effect, Role,
    RoleAssignment,
};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

/// Prints a success message.
pub fn success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

/// Prints an info message.
pub fn info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Prints an error with its cause chain.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "✗".red().bold(), err);
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }
}

/// Prints a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Prints rows as a table, or the source items as JSON.
pub fn print_list<T, R>(items: &[T], format: OutputFormat) -> Result<()>
where
    T: Serialize,
    R: Tabled + for<'a> From<&'a T>,
{
    match format {
        OutputFormat::Json => print_json(items),
        OutputFormat::Table => {
            if items.is_empty() {
                info("No results");
                return Ok(());
            }
            let mut table = Table::new(items.iter().map(R::from));
            table.with(Style::rounded());
            println!("{table}");
            Ok(())
        }
    }
}

/// Prints a single item.
pub fn print_item<T, R>(item: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize,
    R: Tabled + for<'a> From<&'a T>,
{
    match format {
        OutputFormat::Json => print_json(item),
        OutputFormat::Table => print_list::<T, R>(std::slice::from_ref(item), format),
    }
}

/// Prints an access decision.
pub fn print_decision(decision: &AccessDecision, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(decision);
    }

    let verdict = if decision.allowed {
        "ALLOWED".green().bold()
    } else {
        "DENIED".red().bold()
    };
    println!("{} {}", verdict, decision.reason);
    println!("  {} {}", "source:".dimmed(), decision.source);
    if !decision.matched_policies.is_empty() {
        println!("  {} {}", "policies:".dimmed(), decision.matched_policies.join(", "));
    }
    if !decision.effective_permissions.is_empty() {
        let permissions: Vec<String> = decision
            .effective_permissions
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  {} {}", "permissions:".dimmed(), permissions.join(", "));
    }
    Ok(())
}

/// Prints collection counters.
pub fn print_stats(stats: &AccessStats, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(stats);
    }

    let rows = vec![
        ("Roles", format!("{} ({} active)", stats.total_roles, stats.active_roles)),
        ("Assignments", stats.total_assignments.to_string()),
        ("Policies", format!("{} ({} active)", stats.total_policies, stats.active_policies)),
        ("Audit entries", stats.audit_log_count.to_string()),
        ("Cached decisions", stats.cache_size.to_string()),
    ];
    for (label, value) in rows {
        println!("{:<18} {}", format!("{}:", label).bold(), value);
    }
    Ok(())
}

/// Role table row.
#[derive(Tabled)]
pub struct RoleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Level")]
    level: u8,
    #[tabled(rename = "Permissions")]
    permissions: String,
    #[tabled(rename = "Inherits")]
    inherits: String,
    #[tabled(rename = "System")]
    system: String,
    #[tabled(rename = "Active")]
    active: String,
}

impl From<&Role> for RoleRow {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id.clone(),
            name: role.display_name.clone(),
            level: role.level,
            permissions: role
                .permissions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            inherits: role.inherits_from.join(", "),
            system: yes_no(role.is_system),
            active: yes_no(role.is_active),
        }
    }
}

/// Assignment table row.
#[derive(Tabled)]
pub struct AssignmentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Assigned")]
    assigned: String,
    #[tabled(rename = "Expires")]
    expires: String,
}

impl From<&RoleAssignment> for AssignmentRow {
    fn from(a: &RoleAssignment) -> Self {
        let scope = match &a.scope_id {
            Some(id) => format!("{:?}:{}", a.scope, id).to_lowercase(),
            None => format!("{:?}", a.scope).to_lowercase(),
        };
        let expires = match a.expires_at {
            Some(at) if at <= chrono::Utc::now() => format!("{} (expired)", at.format("%Y-%m-%d %H:%M:%S")),
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "never".to_string(),
        };

        Self {
            id: a.id.clone(),
            user: a.user_id.clone(),
            role: a.role_id.clone(),
            scope,
            assigned: a.assigned_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            expires,
        }
    }
}

/// Policy table row.
#[derive(Tabled)]
pub struct PolicyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Effect")]
    effect: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Actions")]
    actions: String,
    #[tabled(rename = "Conditions")]
    conditions: usize,
    #[tabled(rename = "Active")]
    active: String,
}

impl From<&AccessPolicy> for PolicyRow {
    fn from(p: &AccessPolicy) -> Self {
        let effect = match p.effect {
            Effect::Allow => "allow".green().to_string(),
            Effect::Deny => "deny".red().to_string(),
        };

        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            effect,
            priority: p.priority,
            actions: p.actions.join(", "),
            conditions: p.conditions.len(),
            active: yes_no(p.is_active),
        }
    }
}

/// Audit table row.
#[derive(Tabled)]
pub struct AuditRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&AuditLogEntry> for AuditRow {
    fn from(e: &AuditLogEntry) -> Self {
        let resource = match &e.resource_id {
            Some(id) => format!("{}:{}", e.resource, id),
            None => e.resource.clone(),
        };
        let result = match e.result {
            AuditOutcome::Allowed => "allowed".green().to_string(),
            AuditOutcome::Denied => "denied".red().to_string(),
        };

        Self {
            time: e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            user: e.user_name.clone(),
            action: e.action.clone(),
            resource,
            result,
            reason: e.reason.clone(),
        }
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}
