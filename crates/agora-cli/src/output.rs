//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use agora_agent::SimulationReport;
use agora_core::{EthicsVector, MarketConfig, VarietyTable};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write a value in the selected format.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }

    /// Write a value to a string.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

/// Types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

impl TableDisplay for SimulationReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Simulation Report")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Completed:        {}", if self.completed { "yes" } else { "no" })?;
        writeln!(writer, "Elapsed:          {} ms", self.elapsed_ms)?;
        writeln!(writer, "Buyers finished:  {}/{}", self.finished_buyers, self.buyers)?;
        writeln!(writer, "Decisions:        {}", self.decisions)?;
        writeln!(
            writer,
            "Datagrams:        {} delivered, {} lost, {} failed",
            self.network.delivered, self.network.lost, self.network.failed
        )?;

        writeln!(writer)?;
        writeln!(writer, "{:<24}  {:>8}", "ACTION", "COUNT")?;
        writeln!(writer, "{}", "─".repeat(34))?;
        for (action, count) in &self.actions {
            writeln!(writer, "{:<24}  {:>8}", action.as_str(), count)?;
        }

        writeln!(writer)?;
        if self.purchases_per_seller.is_empty() {
            writeln!(writer, "No purchases")?;
            return Ok(());
        }
        writeln!(writer, "{:<24}  {:>8}", "SELLER", "SALES")?;
        writeln!(writer, "{}", "─".repeat(34))?;
        for (seller, count) in &self.purchases_per_seller {
            writeln!(writer, "{:<24}  {:>8}", seller.as_str(), count)?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} purchase(s)", self.total_purchases())?;
        Ok(())
    }
}

impl TableDisplay for MarketConfig {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let t = &self.timings;
        writeln!(writer, "Market Configuration")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Population")?;
        writeln!(writer, "  Buyers:           {}", self.num_buyers)?;
        writeln!(writer, "  Sellers:          {}", self.num_sellers)?;
        writeln!(writer, "  Adaptive sellers: {}", self.num_adaptive_sellers)?;
        writeln!(writer)?;
        writeln!(writer, "Buyers")?;
        writeln!(writer, "  Max purchases:    {}", self.max_purchases)?;
        writeln!(
            writer,
            "  Weights:          ethical {} / distance {}",
            self.weights.ethical, self.weights.distance
        )?;
        writeln!(writer, "  Location aware:   {}", self.location_aware)?;
        writeln!(writer)?;
        writeln!(writer, "Sellers")?;
        writeln!(writer, "  Gossip mode:      {:?}", self.gossip_mode)?;
        writeln!(writer, "  Variety change:   {}", self.variety_change_enabled)?;
        writeln!(writer, "  Radius:           {}", self.proximity_radius)?;
        writeln!(writer)?;
        writeln!(writer, "Timings (ms)")?;
        writeln!(writer, "  Buyer cycle:      {}", t.buyer_cycle_ms)?;
        writeln!(writer, "  Seller cycle:     {}", t.seller_cycle_ms)?;
        writeln!(writer, "  Adaptive cycle:   {}", t.adaptive_cycle_ms)?;
        writeln!(writer, "  Offer TTL:        {}", t.offer_ttl_ms)?;
        match self.seed {
            Some(seed) => writeln!(writer, "\nSeed:               {seed}")?,
            None => writeln!(writer, "\nSeed:               random")?,
        }
        Ok(())
    }
}

/// One variant row.
#[derive(Debug, Clone, Serialize)]
pub struct VarietyRow {
    /// Product line.
    pub product: String,
    /// Variant identifier.
    pub variant: String,
    /// Ethics values of the variant.
    pub ethics: EthicsVector,
}

/// Every variant of every product.
#[derive(Debug, Clone, Serialize)]
pub struct VarietyList {
    /// Rows in product then variant order.
    pub varieties: Vec<VarietyRow>,
}

impl From<&VarietyTable> for VarietyList {
    fn from(table: &VarietyTable) -> Self {
        let varieties = table
            .products()
            .flat_map(|product| {
                table.variants_of(product).iter().map(move |variant| VarietyRow {
                    product: product.clone(),
                    variant: variant.clone(),
                    ethics: table.ethics_of(variant).cloned().unwrap_or_default(),
                })
            })
            .collect();
        Self { varieties }
    }
}

impl TableDisplay for VarietyList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let criteria: Vec<&String> = self
            .varieties
            .first()
            .map(|row| row.ethics.keys().collect())
            .unwrap_or_default();

        write!(writer, "{:<12}", "VARIANT")?;
        for criterion in &criteria {
            write!(writer, "  {:>8}", truncate(criterion, 8))?;
        }
        writeln!(writer)?;
        writeln!(writer, "{}", "─".repeat(12 + criteria.len() * 10))?;
        for row in &self.varieties {
            write!(writer, "{:<12}", row.variant)?;
            for criterion in &criteria {
                write!(writer, "  {:>8.2}", row.ethics.get(*criterion).copied().unwrap_or(0.0))?;
            }
            writeln!(writer)?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} variant(s)", self.varieties.len())?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(i, _)| &s[..i])
}
