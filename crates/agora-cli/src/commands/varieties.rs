//! The `varieties` command.

use std::io::Write;

use agora_core::VarietyTable;

use crate::error::CliError;
use crate::output::{OutputFormat, VarietyList};

/// Varieties command executor.
#[derive(Debug, Default)]
pub struct VarietiesCommand;

impl VarietiesCommand {
    /// Lists the standard variety table.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        format.write(writer, &VarietyList::from(&VarietyTable::standard()))
    }
}
