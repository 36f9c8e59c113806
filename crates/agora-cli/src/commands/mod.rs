//! CLI command implementations.
//!
//! - [`run`]: build, run and report a simulation
//! - [`config`]: print the effective configuration
//! - [`varieties`]: list the variety table

pub mod config;
pub mod run;
pub mod varieties;

pub use config::{ConfigCommand, load_config};
pub use run::RunCommand;
pub use varieties::VarietiesCommand;
