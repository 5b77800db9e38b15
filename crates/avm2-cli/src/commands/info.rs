//! Info command - print table sizes and classes of a unit.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::read_unit;

#[derive(Args)]
pub struct InfoCommand {
    /// ABC file to inspect
    pub input: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl InfoCommand {
    pub fn run(&self) -> Result<()> {
        let (_, abc) = read_unit(&self.input)?;
        let summary = abc.summary();
        if self.json {
            println!("{}", summary.to_json()?);
        } else {
            print!("{summary}");
        }
        Ok(())
    }
}
