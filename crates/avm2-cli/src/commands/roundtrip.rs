//! Roundtrip command - decode a unit and encode it again.

use anyhow::{Context, Result};
use avm2_abc::AbcFile;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use super::read_unit;
use crate::config::Config;

#[derive(Args)]
pub struct RoundtripCommand {
    /// ABC file to rebuild
    pub input: PathBuf,

    /// Where to write the encoded unit
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Rebuild every table even if nothing changed
    #[arg(long)]
    pub rebuild: bool,

    /// Add debugfile/debugline markers to methods without any
    #[arg(long)]
    pub debug: bool,

    /// Dotted name of the class to register last
    #[arg(long, value_name = "CLASS")]
    pub main_class: Option<String>,
}

impl RoundtripCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let (input, mut abc) = read_unit(&self.input)?;

        let options = config
            .encode
            .options(self.debug, self.main_class.as_deref());
        if self.rebuild || options.debug_instrumentation || options.main_class.is_some() {
            abc.mark_tampered()?;
        }

        let output = abc.encode(&options)?;
        AbcFile::decode(&output).context("encoded unit does not decode")?;
        std::fs::write(&self.output, &output)
            .with_context(|| format!("failed to write {}", self.output.display()))?;

        info!(
            input = input.len(),
            output = output.len(),
            "wrote {}",
            self.output.display()
        );
        if output == input {
            println!("{}: identical ({} bytes)", self.output.display(), output.len());
        } else {
            println!(
                "{}: {} -> {} bytes",
                self.output.display(),
                input.len(),
                output.len()
            );
        }
        Ok(())
    }
}
