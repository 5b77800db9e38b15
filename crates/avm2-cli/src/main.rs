use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{dump::DumpCommand, info::InfoCommand, roundtrip::RoundtripCommand};

#[derive(Parser)]
#[command(name = "abc", version, about = "Inspect and rebuild AVM2 ABC units")]
struct Cli {
    /// Config file (defaults to abc.toml in the current or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log codec activity
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print table sizes and classes
    Info(InfoCommand),
    /// List methods as assembly
    Dump(DumpCommand),
    /// Decode and encode again
    Roundtrip(RoundtripCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info(cmd) => cmd.run()?,
        Commands::Dump(cmd) => cmd.run(&config)?,
        Commands::Roundtrip(cmd) => cmd.run(&config)?,
    }

    Ok(())
}
