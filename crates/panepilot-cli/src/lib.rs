//! Front end for the `panepilot` binary.
//!
//! - [`commands`]: slash commands and line dispatch.
//! - [`console`]: event rendering and the input prompt.
//! - [`launch`]: bootstrapping a tmux session when started outside one.
//! - [`tools`]: the hidden `tools` subcommand.

pub mod commands;
pub mod console;
pub mod launch;
pub mod tools;
