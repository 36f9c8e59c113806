//! The `run` command: build a market, run it, report.

use std::io::Write;
use std::time::Duration;

use agora_agent::{Simulation, SimulationReport};
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::config::load_config;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Run command executor.
#[derive(Debug, Default)]
pub struct RunCommand;

impl RunCommand {
    /// Runs one simulation and writes its report.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, args: &RunArgs) -> Result<(), CliError> {
        let report = self.simulate(args).await?;
        format.write(writer, &report)
    }

    /// Runs one simulation and returns its report.
    ///
    /// Belief snapshots are dropped unless requested.
    pub async fn simulate(&self, args: &RunArgs) -> Result<SimulationReport, CliError> {
        let config = load_config(&args.config)?;
        info!(
            buyers = config.num_buyers,
            sellers = config.num_sellers,
            adaptive = config.num_adaptive_sellers,
            "starting simulation"
        );
        let mut simulation = Simulation::build(config)?;
        let mut report = simulation.run(Duration::from_secs(args.timeout_secs)).await?;
        if !args.snapshots {
            report.agents.clear();
        }
        Ok(report)
    }
}
