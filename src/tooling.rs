//! Tooling
//!
//! Command-line front end over the library: path algebra, browsing a record
//! file through the full loading stack, and configuration inspection.

pub mod cli;

pub use cli::{Cli, CliContext, Commands, PathCommands};
