//! # agora-cli
//!
//! Command-line front end for the Agora market simulation.
//!
//! Provides commands for:
//! - Running a simulation and reporting its outcome
//! - Printing the effective configuration
//! - Listing the variety table

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, ConfigArgs, Format, ModeArg, RunArgs};
pub use error::CliError;
pub use output::{OutputFormat, TableDisplay};
