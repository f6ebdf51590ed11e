//! Decoded frames and synchronized bundles.

use crate::config::{Modality, Stream};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudFrame {
    pub points: Vec<Point>,
}

impl PointCloudFrame {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// RGB8 raster, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    PointCloud(PointCloudFrame),
    Image(ImageFrame),
}

impl Frame {
    pub fn modality(&self) -> Modality {
        match self {
            Frame::PointCloud(_) => Modality::Lidar,
            Frame::Image(_) => Modality::Camera,
        }
    }
}

/// One required stream's member of a bundle.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub stream: Stream,
    pub matched_timestamp: i64,
    pub record_id: i64,
    /// `None` when the matched record failed to decode
    pub frame: Option<Frame>,
}

/// A complete set of matched records for one anchor timestamp.
///
/// Holds exactly one entry per required stream, in configured order.
#[derive(Debug, Clone)]
pub struct SyncedFrameBundle {
    pub anchor_timestamp: i64,
    pub entries: Vec<BundleEntry>,
}

impl SyncedFrameBundle {
    pub fn entry(&self, stream_name: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.stream.name == stream_name)
    }

    pub fn point_clouds(&self) -> impl Iterator<Item = (&BundleEntry, &PointCloudFrame)> {
        self.entries.iter().filter_map(|e| match &e.frame {
            Some(Frame::PointCloud(pc)) => Some((e, pc)),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = (&BundleEntry, &ImageFrame)> {
        self.entries.iter().filter_map(|e| match &e.frame {
            Some(Frame::Image(img)) => Some((e, img)),
            _ => None,
        })
    }

    /// All decoded lidar points concatenated in stream order.
    pub fn combined_points(&self) -> PointCloudFrame {
        let total = self.point_clouds().map(|(_, pc)| pc.point_count()).sum();
        let mut points = Vec::with_capacity(total);
        for (_, pc) in self.point_clouds() {
            points.extend_from_slice(&pc.points);
        }
        PointCloudFrame { points }
    }
}
