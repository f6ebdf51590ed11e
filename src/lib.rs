//! db3sync - Time-aligned lidar and camera frame extraction from ROS2 .db3 logs
//!
//! This library reads the SQLite recordings written by rosbag2, decodes
//! point-cloud and JPEG-carrying messages, and pairs the records of several
//! independently clocked sensors around the timestamps of an anchor sensor.
//! Every accepted anchor yields one directory of ASCII `.pcd` and `.png`
//! files, ready for lidar-camera calibration tooling.
//!
//! # Features
//!
//! - **Point clouds**: fixed-offset decoding with configurable header size,
//!   point stride and float order
//! - **Images**: JPEG frames located inside arbitrary message envelopes
//! - **Synchronization**: nearest-record matching within a tolerance,
//!   all-or-nothing per anchor, throttled to a minimum output interval
//! - **Extraction**: per-sensor dumps on a bounded worker pool
//! - **Validation**: structural checks of a written output tree
//!
//! # Example
//!
//! ```rust,no_run
//! use db3sync::{RunConfig, run_sync};
//!
//! let mut config = RunConfig::new("004/004_0.db3", "calib_lidar2img/004");
//! config.sensors = vec![
//!     "/rslidar_points_top".parse().unwrap(),
//!     "/image0".parse().unwrap(),
//! ];
//! config.anchor = Some("/rslidar_points_top".to_string());
//! config.tolerance_ns = 30_000_000;
//!
//! run_sync(&config)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod db3;
pub mod decode;
pub mod error;
pub mod extract;
pub mod frame;
pub mod index;
pub mod pipeline;
pub mod sync;
pub mod validate;
pub mod writer;

// Re-export main types for convenience
pub use config::{FieldOrder, Modality, PointCloudLayout, RunConfig, SensorSpec, Stream, SyncConfig};
pub use db3::{Db3Reader, inspect_db3};
pub use error::{DecodeError, SyncError};
pub use extract::{ExtractSummary, StreamExtractReport, extract_streams};
pub use frame::{Frame, ImageFrame, Point, PointCloudFrame, SyncedFrameBundle};
pub use index::TimestampIndex;
pub use pipeline::{SyncSummary, run_sync};
pub use sync::{SyncMatch, SyncStats, Synchronizer};
pub use writer::FrameWriter;
