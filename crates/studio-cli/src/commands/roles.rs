//! Role management commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use studio_access::{AccessDecisionService, Permission, RoleDraft, RoleFilter, RolePatch};

use crate::output::{self, success, OutputFormat, RoleRow};

use super::parse_permission;

/// Role management commands.
#[derive(Args)]
pub struct RolesCommands {
    #[command(subcommand)]
    pub command: RolesSubcommand,
}

/// Role subcommands.
#[derive(Subcommand)]
pub enum RolesSubcommand {
    /// List roles, highest level first
    #[command(alias = "ls")]
    List {
        /// Only active roles
        #[arg(long, conflicts_with = "inactive")]
        active: bool,

        /// Only inactive roles
        #[arg(long)]
        inactive: bool,

        /// Only system roles
        #[arg(long, conflicts_with = "custom")]
        system: bool,

        /// Only custom roles
        #[arg(long)]
        custom: bool,
    },

    /// Show a role
    #[command(alias = "get")]
    Show {
        /// Role ID
        id: String,
    },

    /// Create a custom role
    Create {
        /// Role name
        name: String,

        /// Privilege level (0-100)
        #[arg(long, short, default_value = "10")]
        level: u8,

        /// Display name
        #[arg(long)]
        display_name: Option<String>,

        /// Description
        #[arg(long, short)]
        description: Option<String>,

        /// Permission as resource:action[:scope] (repeatable)
        #[arg(long = "permission", short, value_parser = parse_permission)]
        permissions: Vec<Permission>,

        /// Parent role ID (repeatable)
        #[arg(long = "inherits", short)]
        inherits: Vec<String>,
    },

    /// Update a custom role
    Update {
        /// Role ID
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New display name
        #[arg(long)]
        display_name: Option<String>,

        /// New description
        #[arg(long, short)]
        description: Option<String>,

        /// New privilege level
        #[arg(long, short)]
        level: Option<u8>,

        /// Replacement permissions (pass with no value to clear)
        #[arg(long = "permission", short, value_parser = parse_permission, num_args = 0..)]
        permissions: Option<Vec<Permission>>,

        /// Replacement parent roles (pass with no value to clear)
        #[arg(long = "inherits", short, num_args = 0..)]
        inherits: Option<Vec<String>>,

        /// Activate or deactivate the role
        #[arg(long)]
        active: Option<bool>,
    },

    /// Delete a custom role
    #[command(alias = "rm")]
    Delete {
        /// Role ID
        id: String,
    },
}

impl RolesCommands {
    /// Runs the role command.
    pub async fn run(self, service: &Arc<AccessDecisionService>, format: OutputFormat) -> Result<()> {
        match self.command {
            RolesSubcommand::List {
                active,
                inactive,
                system,
                custom,
            } => {
                let filter = RoleFilter {
                    is_active: flag_filter(active, inactive),
                    is_system: flag_filter(system, custom),
                };
                let roles = service.list_roles(filter);
                output::print_list::<_, RoleRow>(&roles, format)
            }

            RolesSubcommand::Show { id } => {
                let role = service
                    .get_role(&id)
                    .with_context(|| format!("Role not found: {}", id))?;
                output::print_item::<_, RoleRow>(&role, format)
            }

            RolesSubcommand::Create {
                name,
                level,
                display_name,
                description,
                permissions,
                inherits,
            } => {
                let draft = RoleDraft {
                    display_name,
                    description,
                    permissions,
                    inherits_from: inherits,
                    ..RoleDraft::new(name, level)
                };
                let role = service.create_role(draft).await?;

                success(&format!("Created role {}", role.id));
                output::print_item::<_, RoleRow>(&role, format)
            }

            RolesSubcommand::Update {
                id,
                name,
                display_name,
                description,
                level,
                permissions,
                inherits,
                active,
            } => {
                let patch = RolePatch {
                    name,
                    display_name,
                    description,
                    level,
                    permissions,
                    inherits_from: inherits,
                    is_active: active,
                };
                let role = service.update_role(&id, patch).await?;

                success(&format!("Updated role {}", role.id));
                output::print_item::<_, RoleRow>(&role, format)
            }

            RolesSubcommand::Delete { id } => {
                let role = service.delete_role(&id).await?;
                success(&format!("Deleted role {}", role.id));
                Ok(())
            }
        }
    }
}

fn flag_filter(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
