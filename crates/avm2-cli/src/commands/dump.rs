//! Dump command - list methods of a unit.

use anyhow::{Result, bail};
use avm2_abc::MethodId;
use clap::Args;
use std::path::PathBuf;

use super::read_unit;
use crate::config::Config;

#[derive(Args)]
pub struct DumpCommand {
    /// ABC file to list
    pub input: PathBuf,

    /// Only list methods with this name
    #[arg(long, short = 'm')]
    pub method: Option<String>,

    /// Print signatures only
    #[arg(long)]
    pub signatures: bool,
}

impl DumpCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let (_, mut abc) = read_unit(&self.input)?;

        let ids: Vec<MethodId> = abc
            .methods()
            .filter(|(_, m)| match &self.method {
                Some(name) => m.name.as_deref() == Some(name.as_str()),
                None => true,
            })
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            if let Some(name) = &self.method {
                bail!("no method named {name}");
            }
        }

        let bodies = config.dump.bodies && !self.signatures;
        for id in ids {
            if bodies {
                println!("{}", abc.listing(id)?);
            } else if let Some(method) = abc.method(id) {
                let params: Vec<String> =
                    method.param_types.iter().map(ToString::to_string).collect();
                println!(
                    "method {}({}): {}",
                    method.display_name(),
                    params.join(", "),
                    method.return_type
                );
            }
        }
        Ok(())
    }
}
