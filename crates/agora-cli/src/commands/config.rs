//! Configuration loading and the `config` command.

use std::io::Write;

use agora_core::MarketConfig;
use tracing::debug;

use crate::cli::ConfigArgs;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Loads the file named by `args` (or defaults), applies overrides, validates.
pub fn load_config(args: &ConfigArgs) -> Result<MarketConfig, CliError> {
    let base = match &args.config {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            MarketConfig::from_json_file(path)?
        }
        None => MarketConfig::default(),
    };
    let config = args.apply(base);
    config.validate()?;
    Ok(config)
}

/// Config command executor.
#[derive(Debug, Default)]
pub struct ConfigCommand;

impl ConfigCommand {
    /// Prints the effective configuration.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, args: &ConfigArgs) -> Result<(), CliError> {
        let config = load_config(args)?;
        format.write(writer, &config)
    }
}
