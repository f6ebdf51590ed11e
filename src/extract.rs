//! Unsynchronized per-stream extraction on a worker pool.
//!
//! One job per stream goes on a flume queue; each worker opens its own
//! [`Db3Reader`], pages through the stream and writes every decodable record
//! to `<out>/<label>/`. Filenames are unique per `(stream, timestamp)`, so the
//! workers never contend on output paths.

use anyhow::{Context, Result, anyhow};
use flume::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::{PointCloudLayout, RunConfig, Stream};
use crate::db3::{Cursor, Db3Reader};
use crate::decode::decode_payload;
use crate::error::SyncError;
use crate::frame::Frame;
use crate::writer::{pcd_file_name, png_file_name, write_pcd, write_png};

/// Counters of one stream's extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamExtractReport {
    pub stream: String,
    pub records: u64,
    pub written: u64,
    /// Point clouds with no complete point; no file is written for them
    pub empty: u64,
    pub decode_failures: u64,
    pub write_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// In configured sensor order
    pub streams: Vec<StreamExtractReport>,
}

impl ExtractSummary {
    pub fn written(&self) -> u64 {
        self.streams.iter().map(|s| s.written).sum()
    }

    pub fn failures(&self) -> u64 {
        self.streams
            .iter()
            .map(|s| s.decode_failures + s.write_failures)
            .sum()
    }
}

struct StreamJob {
    position: usize,
    stream: Stream,
}

/// Settings shared by every worker.
#[derive(Debug, Clone)]
struct WorkerContext {
    log_path: PathBuf,
    output_dir: PathBuf,
    layout: PointCloudLayout,
    page_size: usize,
    dry_run: bool,
}

/// `Ok(None)`: the job was abandoned after another stream failed.
type JobResult = (usize, std::result::Result<Option<StreamExtractReport>, SyncError>);

/// Extract every configured stream concurrently, one task per stream.
///
/// Structural failures (unknown stream, unreadable log, output directory)
/// fail the run: workers stop taking jobs and abandon their current stream
/// at the next page, and the first failure is returned once all workers
/// have been joined.
pub fn extract_streams(config: &RunConfig) -> Result<ExtractSummary> {
    config.validate()?;
    let streams = {
        let reader = Db3Reader::open(&config.log_path)
            .with_context(|| format!("failed to open log: {}", config.log_path.display()))?;
        reader.resolve_streams(&config.sensors)?
    };

    let n_workers = worker_count(config.workers, streams.len());
    tracing::info!(streams = streams.len(), workers = n_workers, "starting extraction");
    let ctx = WorkerContext {
        log_path: config.log_path.clone(),
        output_dir: config.output_dir.clone(),
        layout: config.layout,
        page_size: config.page_size,
        dry_run: config.dry_run,
    };

    let (job_tx, job_rx): (Sender<StreamJob>, Receiver<StreamJob>) = flume::unbounded();
    let (result_tx, result_rx): (Sender<JobResult>, Receiver<JobResult>) = flume::unbounded();
    let cancel = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..n_workers)
        .map(|i| {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let ctx = ctx.clone();
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || extract_worker(i, rx, tx, ctx, cancel))
        })
        .collect();
    drop(result_tx);
    drop(job_rx);

    let total_jobs = streams.len();
    let mut queued = true;
    for (position, stream) in streams.into_iter().enumerate() {
        if job_tx.send(StreamJob { position, stream }).is_err() {
            queued = false;
            break;
        }
    }
    // closing the queue lets idle workers exit
    drop(job_tx);
    if !queued {
        cancel.store(true, Ordering::Relaxed);
        join_workers(workers);
        return Err(anyhow!("extraction workers exited early"));
    }

    let pb = if config.show_progress {
        let pb = ProgressBar::new(total_jobs as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner} {pos}/{len} streams {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(pb)
    } else {
        None
    };

    let started = Instant::now();
    let mut reports: Vec<Option<StreamExtractReport>> = vec![None; total_jobs];
    let mut first_error: Option<SyncError> = None;
    let mut abandoned = 0;
    for (position, res) in result_rx.iter() {
        match res {
            Ok(None) => abandoned += 1,
            Ok(Some(report)) => {
                tracing::info!(
                    stream = %report.stream,
                    records = report.records,
                    written = report.written,
                    empty = report.empty,
                    decode_failures = report.decode_failures,
                    write_failures = report.write_failures,
                    "stream extracted"
                );
                if let Some(pb) = &pb {
                    pb.set_message(report.stream.clone());
                }
                reports[position] = Some(report);
            }
            Err(e) => {
                tracing::error!(error = %e, "stream extraction failed");
                cancel.store(true, Ordering::Relaxed);
                first_error.get_or_insert(e);
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let panicked = join_workers(workers);
    if let Some(e) = first_error {
        if abandoned > 0 {
            tracing::warn!(abandoned, "streams abandoned after failure");
        }
        return Err(e.into());
    }
    if panicked > 0 {
        return Err(anyhow!("{} extraction worker(s) panicked", panicked));
    }

    let summary = ExtractSummary {
        streams: reports.into_iter().flatten().collect(),
    };
    tracing::info!(
        written = summary.written(),
        failures = summary.failures(),
        elapsed = ?started.elapsed(),
        "extraction finished"
    );
    println!(
        "Extracted {} streams: {} files written, {} failures -> output: {}{}",
        summary.streams.len(),
        summary.written(),
        summary.failures(),
        config.output_dir.display(),
        if config.dry_run { " (dry-run)" } else { "" }
    );
    Ok(summary)
}

/// Configured worker count, else one per stream up to the available cores.
fn worker_count(configured: Option<usize>, streams: usize) -> usize {
    let cap = configured.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    cap.min(streams).max(1)
}

/// Number of workers that panicked.
fn join_workers(workers: Vec<std::thread::JoinHandle<()>>) -> usize {
    workers
        .into_iter()
        .map(|w| w.join())
        .filter(|r| r.is_err())
        .count()
}

fn extract_worker(
    id: usize,
    rx: Receiver<StreamJob>,
    tx: Sender<JobResult>,
    ctx: WorkerContext,
    cancel: Arc<AtomicBool>,
) {
    while !cancel.load(Ordering::Relaxed) {
        let Ok(job) = rx.recv() else {
            break;
        };
        tracing::debug!(worker = id, stream = %job.stream.name, "picked up stream");
        let res = extract_stream(&ctx, &job.stream, &cancel);
        if res.is_err() {
            // stop every worker before the orchestrator sees the failure
            cancel.store(true, Ordering::Relaxed);
        }
        let _ = tx.send((job.position, res));
    }
}

fn extract_stream(
    ctx: &WorkerContext,
    stream: &Stream,
    cancel: &AtomicBool,
) -> std::result::Result<Option<StreamExtractReport>, SyncError> {
    if cancel.load(Ordering::Relaxed) {
        return Ok(None);
    }
    let reader = Db3Reader::open(&ctx.log_path)?;
    let dir = ctx.output_dir.join(stream.label());
    if !ctx.dry_run {
        std::fs::create_dir_all(&dir).map_err(|e| SyncError::create_dir(&dir, e))?;
    }

    let mut report = StreamExtractReport {
        stream: stream.name.clone(),
        ..Default::default()
    };
    let mut after = None;
    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!(stream = %stream.name, records = report.records, "extraction abandoned");
            return Ok(None);
        }
        let page = reader.record_page(stream.id, after, ctx.page_size)?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(Cursor {
            timestamp: last.timestamp,
            record_id: last.record_id,
        });
        let full = page.len() == ctx.page_size;

        for record in &page {
            report.records += 1;
            let frame = match decode_payload(stream.modality, &record.payload, &ctx.layout) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(
                        stream = %stream.name,
                        record_id = record.record_id,
                        timestamp = record.timestamp,
                        error = %e,
                        "failed to decode record; skipping"
                    );
                    report.decode_failures += 1;
                    continue;
                }
            };
            if matches!(&frame, Frame::PointCloud(pc) if pc.is_empty()) {
                report.empty += 1;
                continue;
            }
            if ctx.dry_run {
                continue;
            }
            match write_frame(&dir, stream.label(), record.timestamp, &frame) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!(stream = %stream.name, timestamp = record.timestamp, error = %e, "failed to write artifact; skipping");
                    report.write_failures += 1;
                }
            }
        }
        if !full {
            break;
        }
    }
    Ok(Some(report))
}

fn write_frame(dir: &Path, label: &str, timestamp: i64, frame: &Frame) -> std::io::Result<()> {
    match frame {
        Frame::PointCloud(pc) => write_pcd(&dir.join(pcd_file_name(label, timestamp)), pc),
        Frame::Image(img) => write_png(&dir.join(png_file_name(label, timestamp)), img),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db3::testutil::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn lidar_payload(n: usize) -> Vec<u8> {
        let mut data = vec![0u8; 56];
        for i in 0..n {
            for v in [i as f32, 1.0, 2.0, 3.0] {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        data
    }

    fn jpeg_payload() -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        let mut data = vec![7u8; 9];
        data.extend_from_slice(&buf.into_inner());
        data
    }

    fn build_log(path: &Path) {
        let conn = create_db3(path);
        add_topic(&conn, 1, "/rslidar_points_top", "sensor_msgs/msg/PointCloud2");
        add_topic(&conn, 2, "/rslidar_points_left", "sensor_msgs/msg/PointCloud2");
        add_topic(&conn, 3, "/image0", "sensor_msgs/msg/CompressedImage");
        for t in 0..7 {
            add_message(&conn, 1, 100 + t, &lidar_payload(3));
        }
        // header only: decodes to zero points
        add_message(&conn, 2, 200, &lidar_payload(0));
        add_message(&conn, 2, 210, &lidar_payload(1));
        add_message(&conn, 3, 300, &jpeg_payload());
        add_message(&conn, 3, 310, b"no markers here");
    }

    fn config(log: &Path, out: &Path) -> RunConfig {
        let mut cfg = RunConfig::new(log, out);
        cfg.sensors = vec![
            "/rslidar_points_top".parse().unwrap(),
            "/rslidar_points_left".parse().unwrap(),
            "/image0".parse().unwrap(),
        ];
        cfg.page_size = 3;
        cfg.workers = Some(2);
        cfg.show_progress = false;
        cfg
    }

    #[test]
    fn test_extract_streams_writes_per_stream_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.db3");
        let out = dir.path().join("out");
        build_log(&log);

        let summary = extract_streams(&config(&log, &out)).unwrap();
        let names: Vec<&str> = summary.streams.iter().map(|s| s.stream.as_str()).collect();
        assert_eq!(names, vec!["/rslidar_points_top", "/rslidar_points_left", "/image0"]);

        assert_eq!(summary.streams[0].records, 7);
        assert_eq!(summary.streams[0].written, 7);
        assert_eq!(summary.streams[1].empty, 1);
        assert_eq!(summary.streams[1].written, 1);
        assert_eq!(summary.streams[2].decode_failures, 1);
        assert_eq!(summary.written(), 9);
        assert_eq!(summary.failures(), 1);

        let top = out.join("rslidar_points_top");
        assert_eq!(std::fs::read_dir(&top).unwrap().count(), 7);
        assert!(top.join("rslidar_points_top_106.pcd").is_file());
        assert!(!out.join("rslidar_points_left").join("rslidar_points_left_200.pcd").exists());
        assert!(out.join("rslidar_points_left").join("rslidar_points_left_210.pcd").is_file());
        assert!(out.join("image0").join("image0_300.png").is_file());
    }

    #[test]
    fn test_output_dir_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.db3");
        build_log(&log);
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"file").unwrap();

        let err = extract_streams(&config(&log, &blocker)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_fatal_error_stops_remaining_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.db3");
        let out = dir.path().join("out");
        build_log(&log);
        fs::create_dir_all(&out).unwrap();
        // the first stream's directory cannot be created
        fs::write(out.join("rslidar_points_top"), b"file").unwrap();

        let mut cfg = config(&log, &out);
        cfg.workers = Some(1);
        let err = extract_streams(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::CreateDir { .. })
        ));
        assert!(!out.join("rslidar_points_left").exists());
        assert!(!out.join("image0").exists());
    }

    #[test]
    fn test_cancelled_stream_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.db3");
        build_log(&log);
        let ctx = WorkerContext {
            log_path: log,
            output_dir: dir.path().join("out"),
            layout: PointCloudLayout::default(),
            page_size: 3,
            dry_run: false,
        };
        let stream = Stream {
            name: "/rslidar_points_top".to_string(),
            id: 1,
            modality: crate::config::Modality::Lidar,
        };
        let cancel = AtomicBool::new(true);
        assert_eq!(extract_stream(&ctx, &stream, &cancel).unwrap(), None);
        assert!(!ctx.output_dir.join("rslidar_points_top").exists());

        let report = extract_stream(&ctx, &stream, &AtomicBool::new(false))
            .unwrap()
            .unwrap();
        assert_eq!(report.written, 7);
    }

    #[test]
    fn test_dry_run_extracts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.db3");
        let out = dir.path().join("out");
        build_log(&log);

        let mut cfg = config(&log, &out);
        cfg.dry_run = true;
        let summary = extract_streams(&cfg).unwrap();
        assert_eq!(summary.streams[0].records, 7);
        assert_eq!(summary.written(), 0);
        assert!(!out.exists());
    }

    #[test]
    fn test_join_workers_counts_panics() {
        let workers = vec![
            std::thread::spawn(|| {}),
            std::thread::spawn(|| panic!("worker died")),
        ];
        assert_eq!(join_workers(workers), 1);
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(Some(8), 3), 3);
        assert_eq!(worker_count(Some(2), 3), 2);
        assert_eq!(worker_count(None, 1), 1);
        assert_eq!(worker_count(Some(4), 0), 1);
    }
}
