#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for the homicide and house price analysis.
//!
//! Loads the homicide and residential sales extracts, matches sales to
//! nearby homicides in space and time, and writes spacetime-flagged
//! sales, the price-versus-distance profile, parallel-trends series and a
//! regression design matrix.
//!
//! Uses `indicatif-log-bridge` (via [`gun_violence_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod config;
mod output;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::PipelineConfig;
use crate::pipeline::Stage;

#[derive(Parser)]
#[command(
    name = "gun_violence",
    about = "Homicide proximity analysis of residential sale prices"
)]
struct Cli {
    /// Pipeline configuration (TOML). Defaults are built in.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for outputs; overrides `[output] dir`.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flag sales by proximity to homicides before and after they occur
    Flags,
    /// Median price per square foot by distance to the nearest homicide
    Distance,
    /// Binned prices over time around homicides, by distance band
    Trends,
    /// Engineer features and assemble the regression design matrix
    Design,
    /// Flags and design matrix rebuilt from randomized homicides
    Placebo,
    /// Run every analysis
    All,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = gun_violence_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }

    let stages: &[Stage] = match cli.command {
        Commands::Flags => &[Stage::Flags],
        Commands::Distance => &[Stage::Distance],
        Commands::Trends => &[Stage::Trends],
        Commands::Design => &[Stage::Design],
        Commands::Placebo => &[Stage::Placebo],
        Commands::All => Stage::ALL,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
    };

    pipeline::run(&config, stages, &config.output.dir, &multi)?;

    Ok(())
}
