//! Run configuration and the resolved, immutable per-run sync configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SyncError};

pub const DEFAULT_HEADER_SIZE: usize = 56;
pub const DEFAULT_POINT_STEP: usize = 16;
pub const DEFAULT_TOLERANCE_NS: u64 = 30_000_000;
pub const DEFAULT_MIN_OUTPUT_INTERVAL_S: f64 = 0.33;
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Bytes consumed per point: four f32 fields
pub const POINT_FIELDS_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Lidar,
    Camera,
}

impl Modality {
    /// Modality implied by a ROS message type, when it names one.
    pub fn from_topic_type(msg_type: &str) -> Option<Self> {
        let ty = msg_type.rsplit('/').next().unwrap_or(msg_type);
        match ty {
            "PointCloud2" | "PointCloud" => Some(Modality::Lidar),
            "Image" | "CompressedImage" => Some(Modality::Camera),
            _ => None,
        }
    }

    /// Topic names mentioning `image` or `camera` are cameras, the rest lidars.
    pub fn infer_from_name(name: &str) -> Self {
        let lc = name.to_ascii_lowercase();
        if lc.contains("image") || lc.contains("camera") {
            Modality::Camera
        } else {
            Modality::Lidar
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lidar" | "pointcloud" => Ok(Modality::Lidar),
            "camera" | "image" => Ok(Modality::Camera),
            other => Err(format!(
                "unknown modality '{}', expected 'lidar' or 'camera'",
                other
            )),
        }
    }
}

/// On-wire order of the four floats of a point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrder {
    /// intensity, x, y, z
    #[default]
    Ixyz,
    /// x, y, z, intensity
    Xyzi,
}

impl FromStr for FieldOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ixyz" => Ok(FieldOrder::Ixyz),
            "xyzi" => Ok(FieldOrder::Xyzi),
            other => Err(format!(
                "invalid field order '{}', expected 'ixyz' or 'xyzi'",
                other
            )),
        }
    }
}

/// Fixed-offset layout of a point-cloud payload.
///
/// `header_size` is an empirically chosen skip offset rather than a parsed
/// message header, so it is a per-recording calibration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudLayout {
    pub header_size: usize,
    pub point_step: usize,
    pub field_order: FieldOrder,
}

impl Default for PointCloudLayout {
    fn default() -> Self {
        Self {
            header_size: DEFAULT_HEADER_SIZE,
            point_step: DEFAULT_POINT_STEP,
            field_order: FieldOrder::default(),
        }
    }
}

impl PointCloudLayout {
    pub fn validate(&self) -> Result<()> {
        if self.point_step < POINT_FIELDS_BYTES {
            return Err(SyncError::config(format!(
                "point-step must be >= {} (got {})",
                POINT_FIELDS_BYTES, self.point_step
            )));
        }
        Ok(())
    }
}

/// A sensor as named in the run configuration, before topic resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
}

impl SensorSpec {
    pub fn modality(&self) -> Modality {
        self.modality
            .unwrap_or_else(|| Modality::infer_from_name(&self.name))
    }

    /// Explicit modality first, then the topic's message type, then the name.
    pub fn resolve_modality(&self, msg_type: &str) -> Modality {
        self.modality
            .or_else(|| Modality::from_topic_type(msg_type))
            .unwrap_or_else(|| Modality::infer_from_name(&self.name))
    }
}

impl FromStr for SensorSpec {
    type Err = String;

    /// `NAME` or `NAME:lidar` / `NAME:camera`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (name, modality) = match s.rsplit_once(':') {
            Some((name, m)) => (name, Some(m.parse::<Modality>()?)),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("empty sensor name in '{}'", s));
        }
        Ok(Self {
            name: name.to_string(),
            modality,
        })
    }
}

/// A resolved stream of the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stream {
    pub name: String,
    pub id: i64,
    pub modality: Modality,
}

impl Stream {
    /// Last path segment of the topic name, used in artifact names.
    pub fn label(&self) -> &str {
        topic_label(&self.name)
    }
}

pub fn topic_label(topic: &str) -> &str {
    topic.rsplit('/').find(|s| !s.is_empty()).unwrap_or(topic)
}

fn default_tolerance_ns() -> u64 {
    DEFAULT_TOLERANCE_NS
}

fn default_min_output_interval_s() -> f64 {
    DEFAULT_MIN_OUTPUT_INTERVAL_S
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_true() -> bool {
    true
}

/// Externally supplied configuration of one run.
///
/// Loadable from JSON; the CLI overrides individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub log_path: PathBuf,
    pub output_dir: PathBuf,
    pub sensors: Vec<SensorSpec>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default = "default_tolerance_ns")]
    pub tolerance_ns: u64,
    #[serde(default = "default_min_output_interval_s")]
    pub min_output_interval_s: f64,
    #[serde(default)]
    pub layout: PointCloudLayout,
    #[serde(default = "default_true")]
    pub combined_pointcloud: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl RunConfig {
    pub fn new(log_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            output_dir: output_dir.into(),
            sensors: Vec::new(),
            anchor: None,
            tolerance_ns: DEFAULT_TOLERANCE_NS,
            min_output_interval_s: DEFAULT_MIN_OUTPUT_INTERVAL_S,
            layout: PointCloudLayout::default(),
            combined_pointcloud: true,
            page_size: DEFAULT_PAGE_SIZE,
            workers: None,
            dry_run: false,
            show_progress: true,
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_nanos(self.tolerance_ns)
    }

    pub fn min_output_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.min_output_interval_s).map_err(|_| {
            SyncError::config(format!(
                "min-interval must be a finite number of seconds >= 0 (got {})",
                self.min_output_interval_s
            ))
        })
    }

    /// Checks shared by every run mode.
    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            return Err(SyncError::config("at least one sensor is required"));
        }
        let mut seen = HashSet::new();
        for s in &self.sensors {
            if !seen.insert(s.name.as_str()) {
                return Err(SyncError::config(format!("sensor listed twice: {}", s.name)));
            }
        }
        if self.page_size == 0 {
            return Err(SyncError::config("page-size must be > 0"));
        }
        if self.workers == Some(0) {
            return Err(SyncError::config("workers must be >= 1"));
        }
        self.layout.validate()
    }

    /// Validates the sync-specific fields and returns the anchor name.
    pub fn validate_for_sync(&self) -> Result<&str> {
        self.validate()?;
        self.min_output_interval()?;
        let anchor = self
            .anchor
            .as_deref()
            .ok_or_else(|| SyncError::config("an anchor sensor is required"))?;
        if !self.sensors.iter().any(|s| s.name == anchor) {
            return Err(SyncError::config(format!(
                "anchor {} is not one of the configured sensors",
                anchor
            )));
        }
        Ok(anchor)
    }
}

/// Immutable configuration consumed by the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub required_streams: Vec<Stream>,
    anchor: usize,
    pub tolerance: Duration,
    pub min_output_interval: Duration,
    pub layout: PointCloudLayout,
}

impl SyncConfig {
    pub fn new(
        required_streams: Vec<Stream>,
        anchor: &str,
        tolerance: Duration,
        min_output_interval: Duration,
        layout: PointCloudLayout,
    ) -> Result<Self> {
        layout.validate()?;
        let anchor = required_streams
            .iter()
            .position(|s| s.name == anchor)
            .ok_or_else(|| {
                SyncError::config(format!("anchor {} is not a required stream", anchor))
            })?;
        Ok(Self {
            required_streams,
            anchor,
            tolerance,
            min_output_interval,
            layout,
        })
    }

    pub fn anchor_index(&self) -> usize {
        self.anchor
    }

    pub fn anchor_stream(&self) -> &Stream {
        &self.required_streams[self.anchor]
    }
}
