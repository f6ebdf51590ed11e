use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use db3sync::cli::{Cli, Commands};
use db3sync::{extract, inspect_db3, pipeline, validate};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { db3 } => inspect_db3(&db3),
        Commands::Sync {
            db3,
            out,
            common,
            anchor,
            tolerance_ns,
            min_interval,
            no_combined,
        } => {
            let mut config = common.run_config(db3, out)?;
            if anchor.is_some() {
                config.anchor = anchor;
            }
            if let Some(v) = tolerance_ns {
                config.tolerance_ns = v;
            }
            if let Some(v) = min_interval {
                config.min_output_interval_s = v;
            }
            if no_combined {
                config.combined_pointcloud = false;
            }
            pipeline::run_sync(&config).map(|_| ())
        }
        Commands::Extract {
            db3,
            out,
            common,
            workers,
        } => {
            let mut config = common.run_config(db3, out)?;
            if workers.is_some() {
                config.workers = workers;
            }
            extract::extract_streams(&config).map(|_| ())
        }
        Commands::Validate { dir } => validate::validate_output(&dir),
    }
}
