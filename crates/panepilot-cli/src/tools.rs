//! `panepilot tools`: edit the tools manifest from the shell.
//!
//! The same manifest reflection maintains. Hidden from `--help` because
//! it is a maintenance tool, not part of the chat workflow.

use std::path::Path;

use clap::Subcommand;
use panepilot::reflection::manifest::{ToolChange, add_tool, list_tools, remove_tool};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ToolsAction {
    /// Add or update a tool entry.
    Add {
        name: String,
        /// Section heading to place the tool under.
        #[arg(long)]
        section: String,
        /// Optional description for the tool.
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a tool entry.
    Remove {
        name: String,
        /// Section heading to remove the tool from.
        #[arg(long)]
        section: String,
    },
    /// Print the current tools manifest.
    List,
}

/// Apply `action` to the manifest at `manifest_path` and return what to
/// print.
pub fn run(action: &ToolsAction, manifest_path: &str) -> Result<String, String> {
    if manifest_path.is_empty() {
        return Err("tools manifest path is not configured".to_string());
    }
    let path = Path::new(manifest_path);

    match action {
        ToolsAction::Add {
            name,
            section,
            description,
        } => {
            let change = add_tool(path, section, name, description)?;
            if change.modified() {
                info!(tool = %name, section = %section, change = change.as_str(), "Tool manifest edited");
                Ok(format!("Tool {name} {} in section {section}", change.as_str()))
            } else {
                Ok(format!("Tool {name} already up to date in section {section}"))
            }
        }
        ToolsAction::Remove { name, section } => match remove_tool(path, section, name)? {
            ToolChange::Removed => {
                info!(tool = %name, section = %section, "Tool removed from manifest");
                Ok(format!("Tool {name} removed from section {section}"))
            }
            _ => Ok(format!("Tool {name} not found in section {section}")),
        },
        ToolsAction::List => Ok(list_tools(path)?.trim_end().to_string()),
    }
}
