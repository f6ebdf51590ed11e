//! Persist synchronized bundles as `.pcd` and `.png` artifacts.

use image::{ExtendedColorType, ImageFormat};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::frame::{ImageFrame, PointCloudFrame, SyncedFrameBundle};

/// Header lines preceding `WIDTH`.
pub const PCD_PREAMBLE: [&str; 6] = [
    "# .PCD v0.7 - Point Cloud Data file format",
    "VERSION 0.7",
    "FIELDS x y z intensity",
    "SIZE 4 4 4 4",
    "TYPE F F F F",
    "COUNT 1 1 1 1",
];

pub fn write_pcd(path: &Path, frame: &PointCloudFrame) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_pcd_to(&mut out, frame)?;
    out.flush()
}

/// ASCII PCD v0.7 with one `x y z intensity` line per point.
pub fn write_pcd_to<W: Write>(out: &mut W, frame: &PointCloudFrame) -> std::io::Result<()> {
    let n = frame.point_count();
    for line in PCD_PREAMBLE {
        writeln!(out, "{}", line)?;
    }
    writeln!(out, "WIDTH {}", n)?;
    writeln!(out, "HEIGHT 1")?;
    writeln!(out, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(out, "POINTS {}", n)?;
    writeln!(out, "DATA ascii")?;
    for p in &frame.points {
        writeln!(out, "{} {} {} {}", p.x, p.y, p.z, p.intensity)?;
    }
    Ok(())
}

pub fn write_png(path: &Path, frame: &ImageFrame) -> std::io::Result<()> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.rgb.len() != expected {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "rgb buffer holds {} bytes, {}x{} needs {}",
                frame.rgb.len(),
                frame.width,
                frame.height,
                expected
            ),
        ));
    }
    image::save_buffer_with_format(
        path,
        &frame.rgb,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
        ImageFormat::Png,
    )
    .map_err(std::io::Error::other)
}

pub fn pcd_file_name(label: &str, timestamp: i64) -> String {
    format!("{}_{}.pcd", label, timestamp)
}

pub fn png_file_name(label: &str, timestamp: i64) -> String {
    format!("{}_{}.png", label, timestamp)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: u64,
    pub failed: u64,
}

impl WriteReport {
    fn record(&mut self, path: &Path, res: std::io::Result<()>) {
        match res {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "wrote artifact");
                self.written += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write artifact; skipping");
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: WriteReport) {
        self.written += other.written;
        self.failed += other.failed;
    }
}

/// Writes one directory per bundle under `root`, named by the anchor timestamp.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    root: PathBuf,
    combined_pointcloud: bool,
}

impl FrameWriter {
    pub fn new(root: impl Into<PathBuf>, combined_pointcloud: bool) -> Self {
        Self {
            root: root.into(),
            combined_pointcloud,
        }
    }

    pub fn bundle_dir(&self, anchor_timestamp: i64) -> PathBuf {
        self.root.join(anchor_timestamp.to_string())
    }

    /// Directory creation failure aborts; artifact failures are logged,
    /// counted, and the remaining artifacts are still attempted.
    pub fn write_bundle(&self, bundle: &SyncedFrameBundle) -> Result<WriteReport> {
        let dir = self.bundle_dir(bundle.anchor_timestamp);
        fs::create_dir_all(&dir).map_err(|e| SyncError::create_dir(&dir, e))?;

        let mut report = WriteReport::default();
        for (entry, pc) in bundle.point_clouds() {
            let path = dir.join(pcd_file_name(entry.stream.label(), entry.matched_timestamp));
            report.record(&path, write_pcd(&path, pc));
        }
        for (entry, img) in bundle.images() {
            let path = dir.join(png_file_name(entry.stream.label(), entry.matched_timestamp));
            report.record(&path, write_png(&path, img));
        }

        if self.combined_pointcloud && bundle.point_clouds().next().is_some() {
            let combined = bundle.combined_points();
            let path = dir.join(format!("combined_pointclouds_{}.pcd", bundle.anchor_timestamp));
            report.record(&path, write_pcd(&path, &combined));
        }

        Ok(report)
    }
}
