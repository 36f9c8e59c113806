//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use agora_core::{GossipMode, MarketConfig};

/// Agora - a BDI market simulation.
#[derive(Parser, Debug, Clone)]
#[command(name = "agora")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, env = "AGORA_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a simulation until every buyer finishes or the timeout expires.
    Run(RunArgs),

    /// Print the effective configuration.
    Config(ConfigArgs),

    /// List products, their variants and ethics values.
    Varieties,
}

/// Gossip mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Imitate the best-selling peer.
    Attraction,
    /// Follow what sells nearby.
    Reevaluation,
}

impl From<ModeArg> for GossipMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Attraction => Self::Attraction,
            ModeArg::Reevaluation => Self::Reevaluation,
        }
    }
}

/// Options that shape the market configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file; missing fields take defaults.
    #[arg(short, long, env = "AGORA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Multiply every timing by this factor.
    #[arg(short = 's', long)]
    pub time_scale: Option<f64>,

    /// Seed for a reproducible market.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of buyers.
    #[arg(long)]
    pub buyers: Option<usize>,

    /// Number of standard sellers.
    #[arg(long)]
    pub sellers: Option<usize>,

    /// Number of adaptive sellers.
    #[arg(long)]
    pub adaptive: Option<usize>,

    /// Purchase ceiling per buyer.
    #[arg(long)]
    pub max_purchases: Option<u32>,

    /// Adaptive seller gossip mode.
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,
}

impl ConfigArgs {
    /// Applies the overrides on top of `config`.
    #[must_use]
    pub fn apply(&self, mut config: MarketConfig) -> MarketConfig {
        if let Some(n) = self.buyers {
            config.num_buyers = n;
        }
        if let Some(n) = self.sellers {
            config.num_sellers = n;
        }
        if let Some(n) = self.adaptive {
            config.num_adaptive_sellers = n;
        }
        if let Some(n) = self.max_purchases {
            config.max_purchases = n;
        }
        if let Some(mode) = self.mode {
            config = config.with_gossip_mode(mode.into());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(factor) = self.time_scale {
            config = config.with_time_scale(factor);
        }
        config
    }
}

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration overrides.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Give up after this many seconds.
    #[arg(short, long, default_value_t = 600)]
    pub timeout_secs: u64,

    /// Include every agent's beliefs in JSON output.
    #[arg(long)]
    pub snapshots: bool,
}
