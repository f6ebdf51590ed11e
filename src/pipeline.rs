use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::time::Instant;

use crate::config::{RunConfig, SyncConfig};
use crate::db3::{Db3Reader, RawRecord};
use crate::decode::decode_payload;
use crate::error::SyncError;
use crate::frame::{BundleEntry, SyncedFrameBundle};
use crate::index::TimestampIndex;
use crate::sync::{SyncMatch, Synchronizer};
use crate::writer::{FrameWriter, WriteReport};

/// Outcome of a synchronized extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub candidates: u64,
    pub throttled: u64,
    pub unmatched: u64,
    pub bundles: u64,
    pub decode_failures: u64,
    pub artifacts_written: u64,
    pub artifacts_failed: u64,
}

/// Synchronize the configured sensors of a `.db3` log and write one
/// directory of artifacts per accepted anchor timestamp.
///
/// # Example
///
/// ```rust,no_run
/// use db3sync::{run_sync, RunConfig};
///
/// let mut config = RunConfig::new("004/004_0.db3", "calib_lidar2img/004");
/// config.sensors = vec![
///     "/rslidar_points_top".parse().unwrap(),
///     "/rslidar_points_left".parse().unwrap(),
///     "/image0".parse().unwrap(),
/// ];
/// config.anchor = Some("/rslidar_points_top".to_string());
///
/// let summary = run_sync(&config)?;
/// println!("{} bundles", summary.bundles);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn run_sync(config: &RunConfig) -> Result<SyncSummary> {
    let anchor = config.validate_for_sync()?;
    let reader = Db3Reader::open(&config.log_path)
        .with_context(|| format!("failed to open log: {}", config.log_path.display()))?;

    let streams = reader.resolve_streams(&config.sensors)?;
    let t0 = Instant::now();
    let indices = streams
        .iter()
        .map(|s| TimestampIndex::build(&reader, s, config.page_size))
        .collect::<Result<Vec<_>, SyncError>>()?;
    for idx in &indices {
        tracing::info!(stream = %idx.stream().name, records = idx.len(), "indexed stream");
    }
    tracing::debug!(elapsed = ?t0.elapsed(), "indices built");

    let sync_config = SyncConfig::new(
        streams,
        anchor,
        config.tolerance(),
        config.min_output_interval()?,
        config.layout,
    )?;
    let writer = FrameWriter::new(&config.output_dir, config.combined_pointcloud);

    let pb = if config.show_progress {
        let pb = ProgressBar::new(indices[sync_config.anchor_index()].len() as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner} {pos}/{len} anchors {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(pb)
    } else {
        None
    };
    let log_every = std::env::var("DB3SYNC_LOG_EVERY")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|v| *v > 0);

    let mut summary = SyncSummary::default();
    let mut writes = WriteReport::default();
    let started = Instant::now();

    let mut sync = Synchronizer::new(&sync_config, &indices)?;
    while let Some(m) = sync.next() {
        if let Some(pb) = &pb {
            pb.set_position((indices[sync_config.anchor_index()].len() - sync.remaining()) as u64);
        }
        summary.bundles += 1;
        if config.dry_run {
            tracing::debug!(anchor = m.anchor_timestamp, "dry-run: bundle matched");
            continue;
        }

        let (bundle, failures) = assemble_bundle(&reader, &sync_config, m)?;
        summary.decode_failures += failures;
        writes.merge(writer.write_bundle(&bundle)?);
        tracing::debug!(anchor = bundle.anchor_timestamp, entries = bundle.entries.len(), "bundle written");

        if let Some(pb) = &pb {
            pb.set_message(format!("{} bundles", summary.bundles));
        }
        if log_every.is_some_and(|n| summary.bundles % n == 0) {
            tracing::info!(
                bundles = summary.bundles,
                decode_failures = summary.decode_failures,
                artifacts = writes.written,
                elapsed = ?started.elapsed(),
                "progress"
            );
        }
    }
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let stats = sync.stats();
    summary.candidates = stats.candidates;
    summary.throttled = stats.throttled;
    summary.unmatched = stats.unmatched;
    summary.artifacts_written = writes.written;
    summary.artifacts_failed = writes.failed;

    tracing::info!(
        candidates = summary.candidates,
        throttled = summary.throttled,
        unmatched = summary.unmatched,
        bundles = summary.bundles,
        decode_failures = summary.decode_failures,
        artifacts_written = summary.artifacts_written,
        artifacts_failed = summary.artifacts_failed,
        elapsed = ?started.elapsed(),
        "sync finished"
    );
    println!(
        "Plan: {} anchor candidates, {} bundles ({} throttled, {} unmatched) -> output: {}{}",
        summary.candidates,
        summary.bundles,
        summary.throttled,
        summary.unmatched,
        config.output_dir.display(),
        if config.dry_run { " (dry-run)" } else { "" }
    );

    Ok(summary)
}

/// Fetch the matched records and decode them into a bundle.
///
/// Records are read sequentially on the run's single handle, then decoded in
/// parallel. Returns the bundle and the number of entries that failed to decode.
pub fn assemble_bundle(
    reader: &Db3Reader,
    config: &SyncConfig,
    m: SyncMatch,
) -> Result<(SyncedFrameBundle, u64), SyncError> {
    let raws = m
        .matches
        .iter()
        .map(|sm| {
            reader
                .record(sm.record_id)?
                .ok_or_else(|| SyncError::MissingRecord {
                    stream: sm.stream.name.clone(),
                    record_id: sm.record_id,
                })
        })
        .collect::<Result<Vec<RawRecord>, SyncError>>()?;

    let layout = config.layout;
    let entries: Vec<BundleEntry> = m
        .matches
        .into_par_iter()
        .zip(raws.into_par_iter())
        .map(|(sm, raw)| {
            let frame = match decode_payload(sm.stream.modality, &raw.payload, &layout) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::warn!(
                        stream = %sm.stream.name,
                        record_id = raw.record_id,
                        timestamp = raw.timestamp,
                        error = %e,
                        "failed to decode record; skipping"
                    );
                    None
                }
            };
            BundleEntry {
                stream: sm.stream,
                matched_timestamp: sm.timestamp,
                record_id: sm.record_id,
                frame,
            }
        })
        .collect();

    let failures = entries.iter().filter(|e| e.frame.is_none()).count() as u64;
    Ok((
        SyncedFrameBundle {
            anchor_timestamp: m.anchor_timestamp,
            entries,
        },
        failures,
    ))
}
