//! # vigil-cli
//!
//! Vigil command-line interface.
//!
//! Provides commands for:
//! - Ingesting raw pipeline and deployment records
//! - Watching spool directories and running escalation on a schedule
//! - Querying, resolving and annotating issues
//! - Health reporting and retention sweeps
//!
//! Issue state lives in a JSON snapshot under the state directory, so
//! separate invocations share one view of every issue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Commands, Format};
pub use commands::App;
pub use output::OutputFormat;
