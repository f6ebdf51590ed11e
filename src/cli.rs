use anyhow::{Result, anyhow};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{FieldOrder, RunConfig, SensorSpec};

#[derive(Parser, Debug)]
#[command(
    name = "db3sync",
    about = "Synchronize lidar and camera streams of ROS2 .db3 logs into PCD/PNG frame sets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List topics, types, message counts and time span of a log
    Inspect {
        /// Path to the .db3 file
        db3: String,
    },

    /// Write one directory of time-aligned frames per accepted anchor timestamp
    Sync {
        /// Path to the .db3 file (overrides the config file)
        db3: Option<PathBuf>,
        /// Output directory (overrides the config file)
        out: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
        /// Sensor whose timestamps drive the synchronization
        #[arg(long = "anchor")]
        anchor: Option<String>,
        /// Maximum distance between anchor and matched timestamps, in nanoseconds
        #[arg(long = "tolerance-ns")]
        tolerance_ns: Option<u64>,
        /// Minimum spacing between emitted anchors, in seconds
        #[arg(long = "min-interval")]
        min_interval: Option<f64>,
        /// Do not write the concatenated point cloud of each bundle
        #[arg(long = "no-combined")]
        no_combined: bool,
    },

    /// Dump every record of each sensor into a per-sensor directory
    Extract {
        /// Path to the .db3 file (overrides the config file)
        db3: Option<PathBuf>,
        /// Output directory (overrides the config file)
        out: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
        /// Worker threads (default: one per sensor, capped by available cores)
        #[arg(long = "workers")]
        workers: Option<usize>,
    },

    /// Check the .pcd/.png artifacts below an output directory
    Validate { dir: String },
}

/// Options shared by `sync` and `extract`.
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// JSON run configuration; command-line flags override its fields
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Sensor topic, optionally suffixed with `:lidar` or `:camera` (can be repeated).
    /// Without a suffix the topic's message type decides; for other types a
    /// name containing `image` or `camera` is a camera, anything else a lidar
    #[arg(long = "sensor", action = ArgAction::Append)]
    pub sensors: Vec<SensorSpec>,
    /// Bytes skipped at the start of each point-cloud payload
    #[arg(long = "header-size")]
    pub header_size: Option<usize>,
    /// Bytes per point (>= 16)
    #[arg(long = "point-step")]
    pub point_step: Option<usize>,
    /// On-wire float order of a point: ixyz or xyzi
    #[arg(long = "field-order")]
    pub field_order: Option<FieldOrder>,
    /// Records fetched per log query
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,
    /// Dry-run: read and match, but do not write any files
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Hide the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

impl CommonArgs {
    /// Load the config file if given, then apply the command-line overrides.
    pub fn run_config(&self, db3: Option<PathBuf>, out: Option<PathBuf>) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => {
                let db3 = db3
                    .clone()
                    .ok_or_else(|| anyhow!("a .db3 path is required without --config"))?;
                let out = out
                    .clone()
                    .ok_or_else(|| anyhow!("an output directory is required without --config"))?;
                RunConfig::new(db3, out)
            }
        };
        if let Some(db3) = db3 {
            cfg.log_path = db3;
        }
        if let Some(out) = out {
            cfg.output_dir = out;
        }
        if !self.sensors.is_empty() {
            cfg.sensors = self.sensors.clone();
        }
        if let Some(v) = self.header_size {
            cfg.layout.header_size = v;
        }
        if let Some(v) = self.point_step {
            cfg.layout.point_step = v;
        }
        if let Some(v) = self.field_order {
            cfg.layout.field_order = v;
        }
        if let Some(v) = self.page_size {
            cfg.page_size = v;
        }
        cfg.dry_run |= self.dry_run;
        if self.no_progress {
            cfg.show_progress = false;
        }
        Ok(cfg)
    }
}
