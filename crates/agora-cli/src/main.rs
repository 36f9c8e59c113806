//! Agora CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use agora_cli::cli::{Cli, Commands};
use agora_cli::commands::{ConfigCommand, RunCommand, VarietiesCommand};
use agora_cli::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Run(args) => RunCommand
            .execute(&mut stdout, &format, &args)
            .await
            .context("simulation run failed")?,
        Commands::Config(args) => ConfigCommand
            .execute(&mut stdout, &format, &args)
            .context("cannot show configuration")?,
        Commands::Varieties => VarietiesCommand.execute(&mut stdout, &format)?,
    }
    Ok(())
}
