//! Policy management commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use studio_access::{
    AccessDecisionService, Condition, Effect, PolicyDraft, PolicyPatch, PolicyResources, Principals,
};

use crate::output::{self, success, OutputFormat, PolicyRow};

use super::parse_condition;

/// Policy management commands.
#[derive(Args)]
pub struct PoliciesCommands {
    #[command(subcommand)]
    pub command: PoliciesSubcommand,
}

/// Who and what a policy targets.
#[derive(Args)]
pub struct PolicyTargets {
    /// User ID principal (repeatable)
    #[arg(long = "user", short = 'u')]
    pub users: Vec<String>,

    /// Role ID or name principal (repeatable)
    #[arg(long = "role", short = 'r')]
    pub roles: Vec<String>,

    /// Group principal (repeatable)
    #[arg(long = "group", short = 'g')]
    pub groups: Vec<String>,

    /// Resource type, `*` for all (repeatable)
    #[arg(long = "type", short = 't')]
    pub types: Vec<String>,

    /// Specific resource ID (repeatable)
    #[arg(long = "resource-id")]
    pub ids: Vec<String>,

    /// Glob over `type` or `type:id` (repeatable)
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,

    /// Action, `*` for all (repeatable)
    #[arg(long = "action", short = 'a')]
    pub actions: Vec<String>,

    /// Condition as 'field op value' (repeatable)
    #[arg(long = "condition", value_parser = parse_condition)]
    pub conditions: Vec<Condition>,
}

impl PolicyTargets {
    fn has_principals(&self) -> bool {
        !(self.users.is_empty() && self.roles.is_empty() && self.groups.is_empty())
    }

    fn has_resources(&self) -> bool {
        !(self.types.is_empty() && self.ids.is_empty() && self.patterns.is_empty())
    }

    fn principals(&self) -> Principals {
        Principals {
            users: self.users.clone(),
            roles: self.roles.clone(),
            groups: self.groups.clone(),
        }
    }

    fn resources(&self) -> PolicyResources {
        PolicyResources {
            types: self.types.clone(),
            ids: self.ids.clone(),
            patterns: self.patterns.clone(),
        }
    }
}

/// Policy subcommands.
#[derive(Subcommand)]
pub enum PoliciesSubcommand {
    /// List policies by descending priority
    #[command(alias = "ls")]
    List,

    /// Show a policy
    #[command(alias = "get")]
    Show {
        /// Policy ID
        id: String,
    },

    /// Create a policy from flags or a JSON file
    Create {
        /// Policy name
        #[arg(required_unless_present = "from_file")]
        name: Option<String>,

        /// Effect (allow, deny)
        #[arg(long, short, default_value = "allow", value_parser = parse_effect)]
        effect: Effect,

        /// Priority, higher is evaluated first
        #[arg(long, short, default_value = "0", allow_negative_numbers = true)]
        priority: i32,

        /// Description
        #[arg(long, short)]
        description: Option<String>,

        /// Create the policy inactive
        #[arg(long)]
        inactive: bool,

        #[command(flatten)]
        targets: PolicyTargets,

        /// Read the policy definition from a JSON file
        #[arg(long, conflicts_with = "name")]
        from_file: Option<PathBuf>,
    },

    /// Update a policy. Target lists given on the command line replace the stored ones.
    Update {
        /// Policy ID
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New effect (allow, deny)
        #[arg(long, short, value_parser = parse_effect)]
        effect: Option<Effect>,

        /// New priority
        #[arg(long, short, allow_negative_numbers = true)]
        priority: Option<i32>,

        /// New description
        #[arg(long, short)]
        description: Option<String>,

        /// Activate or deactivate the policy
        #[arg(long)]
        active: Option<bool>,

        /// Remove all conditions
        #[arg(long, conflicts_with = "conditions")]
        clear_conditions: bool,

        #[command(flatten)]
        targets: PolicyTargets,

        /// Read a JSON patch from a file
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// Delete a policy
    #[command(alias = "rm")]
    Delete {
        /// Policy ID
        id: String,
    },
}

impl PoliciesCommands {
    /// Runs the policy command.
    pub async fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        match self.command {
            PoliciesSubcommand::List => {
                let policies = service.list_policies();
                output::print_list::<_, PolicyRow>(&policies, format)
            }

            PoliciesSubcommand::Show { id } => {
                let policy = service
                    .get_policy(&id)
                    .with_context(|| format!("Policy not found: {}", id))?;
                output::print_json(&policy)
            }

            PoliciesSubcommand::Create {
                name,
                effect,
                priority,
                description,
                inactive,
                targets,
                from_file,
            } => {
                let draft = match (from_file, name) {
                    (Some(path), _) => read_json::<PolicyDraft>(&path)?,
                    (None, Some(name)) => PolicyDraft {
                        description,
                        priority,
                        effect,
                        principals: targets.principals(),
                        resources: targets.resources(),
                        actions: targets.actions,
                        conditions: targets.conditions,
                        is_active: !inactive,
                        ..PolicyDraft::allow(name)
                    },
                    (None, None) => anyhow::bail!("A policy name or --from-file is required"),
                };
                let policy = service.create_policy(draft).await?;

                success(&format!("Created policy {}", policy.id));
                output::print_item::<_, PolicyRow>(&policy, format)
            }

            PoliciesSubcommand::Update {
                id,
                name,
                effect,
                priority,
                description,
                active,
                clear_conditions,
                targets,
                from_file,
            } => {
                let mut patch = match from_file {
                    Some(path) => read_json::<PolicyPatch>(&path)?,
                    None => PolicyPatch::default(),
                };
                patch.name = name.or(patch.name);
                patch.effect = effect.or(patch.effect);
                patch.priority = priority.or(patch.priority);
                patch.description = description.or(patch.description);
                patch.is_active = active.or(patch.is_active);

                if targets.has_principals() {
                    patch.principals = Some(targets.principals());
                }
                if targets.has_resources() {
                    patch.resources = Some(targets.resources());
                }
                if !targets.actions.is_empty() {
                    patch.actions = Some(targets.actions);
                }
                if clear_conditions {
                    patch.conditions = Some(Vec::new());
                } else if !targets.conditions.is_empty() {
                    patch.conditions = Some(targets.conditions);
                }

                let policy = service.update_policy(&id, patch).await?;

                success(&format!("Updated policy {}", policy.id));
                output::print_item::<_, PolicyRow>(&policy, format)
            }

            PoliciesSubcommand::Delete { id } => {
                let policy = service.delete_policy(&id).await?;
                success(&format!("Deleted policy {} ({})", policy.id, policy.name));
                Ok(())
            }
        }
    }
}

fn parse_effect(s: &str) -> Result<Effect, String> {
    match s.to_ascii_lowercase().as_str() {
        "allow" => Ok(Effect::Allow),
        "deny" => Ok(Effect::Deny),
        other => Err(format!("unknown effect '{}' (allow, deny)", other)),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_policy_draft_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            json!({
                "name": "freeze-archive",
                "effect": "deny",
                "priority": 100,
                "principals": {"roles": ["member"]},
                "resources": {"types": ["conversation"], "patterns": ["conversation:archive-*"]},
                "actions": ["update", "delete"]
            })
            .to_string(),
        )
        .unwrap();

        let draft: PolicyDraft = read_json(&path).unwrap();

        assert_eq!(draft.effect, Effect::Deny);
        assert_eq!(draft.priority, 100);
        assert_eq!(draft.resources.patterns, vec!["conversation:archive-*"]);
        assert!(draft.is_active);
    }

    #[test]
    fn test_parse_effect() {
        assert_eq!(parse_effect("DENY").unwrap(), Effect::Deny);
        assert!(parse_effect("maybe").is_err());
    }
}
