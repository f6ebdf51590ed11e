//! Anchor-driven, tolerance-bounded, throttled synchronization.
//!
//! The [`Synchronizer`] walks the anchor stream's index in ascending order.
//! For each anchor timestamp it looks up the nearest record of every other
//! required stream and yields a [`SyncMatch`] only when all of them fall
//! within the tolerance. Emitted anchors are strictly increasing and at
//! least `min_output_interval` apart.
//!
//! The throttle state is local to one iterator, so a fresh `Synchronizer`
//! over the same indices replays the same sequence.

use rayon::prelude::*;

use crate::config::{Stream, SyncConfig};
use crate::db3::Cursor;
use crate::error::{Result, SyncError};
use crate::index::TimestampIndex;

/// Below this many streams the per-anchor search stays on the calling thread.
const PARALLEL_SEARCH_MIN_STREAMS: usize = 4;

/// Matched record of one required stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMatch {
    pub stream: Stream,
    pub timestamp: i64,
    pub record_id: i64,
}

/// Record selection for one accepted anchor timestamp, one entry per
/// required stream in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMatch {
    pub anchor_timestamp: i64,
    pub matches: Vec<StreamMatch>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub candidates: u64,
    pub throttled: u64,
    pub unmatched: u64,
    pub emitted: u64,
}

pub struct Synchronizer<'a> {
    config: &'a SyncConfig,
    indices: &'a [TimestampIndex],
    anchor: &'a TimestampIndex,
    position: usize,
    last_emitted: Option<i64>,
    tolerance_ns: u64,
    interval_ns: u64,
    stats: SyncStats,
}

impl<'a> Synchronizer<'a> {
    /// `indices` must hold one index per required stream, in the same order
    /// as `config.required_streams`.
    pub fn new(config: &'a SyncConfig, indices: &'a [TimestampIndex]) -> Result<Self> {
        if config.required_streams.len() != indices.len() {
            return Err(SyncError::config(format!(
                "{} required streams but {} timestamp indices",
                config.required_streams.len(),
                indices.len()
            )));
        }
        if let Some((s, idx)) = config
            .required_streams
            .iter()
            .zip(indices)
            .find(|(s, idx)| idx.stream().name != s.name)
        {
            return Err(SyncError::config(format!(
                "index for {} found where {} was expected",
                idx.stream().name,
                s.name
            )));
        }
        let anchor = indices.get(config.anchor_index()).ok_or_else(|| {
            SyncError::config(format!("anchor index {} out of range", config.anchor_index()))
        })?;
        Ok(Self {
            config,
            indices,
            anchor,
            position: 0,
            last_emitted: None,
            tolerance_ns: duration_ns(config.tolerance),
            interval_ns: duration_ns(config.min_output_interval),
            stats: SyncStats::default(),
        })
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Anchor timestamps not yet visited.
    pub fn remaining(&self) -> usize {
        self.anchor.len() - self.position
    }

    fn throttled(&self, t: i64) -> bool {
        match self.last_emitted {
            None => false,
            Some(last) => t <= last || t.abs_diff(last) < self.interval_ns,
        }
    }

    fn match_stream(&self, idx: usize, anchor: Cursor) -> Option<StreamMatch> {
        let index = &self.indices[idx];
        let hit = if idx == self.config.anchor_index() {
            anchor
        } else {
            index
                .nearest(anchor.timestamp)
                .filter(|c| c.timestamp.abs_diff(anchor.timestamp) <= self.tolerance_ns)?
        };
        Some(StreamMatch {
            stream: index.stream().clone(),
            timestamp: hit.timestamp,
            record_id: hit.record_id,
        })
    }

    /// All-or-nothing match of every required stream against `anchor`.
    fn match_all(&self, anchor: Cursor) -> Option<Vec<StreamMatch>> {
        let n = self.indices.len();
        if n >= PARALLEL_SEARCH_MIN_STREAMS {
            (0..n)
                .into_par_iter()
                .map(|i| self.match_stream(i, anchor))
                .collect()
        } else {
            (0..n).map(|i| self.match_stream(i, anchor)).collect()
        }
    }
}

impl Iterator for Synchronizer<'_> {
    type Item = SyncMatch;

    fn next(&mut self) -> Option<SyncMatch> {
        while let Some(&anchor) = self.anchor.entries().get(self.position) {
            self.position += 1;
            self.stats.candidates += 1;

            if self.throttled(anchor.timestamp) {
                self.stats.throttled += 1;
                continue;
            }

            match self.match_all(anchor) {
                Some(matches) => {
                    self.last_emitted = Some(anchor.timestamp);
                    self.stats.emitted += 1;
                    return Some(SyncMatch {
                        anchor_timestamp: anchor.timestamp,
                        matches,
                    });
                }
                None => {
                    tracing::trace!(anchor = anchor.timestamp, "no match within tolerance");
                    self.stats.unmatched += 1;
                }
            }
        }
        None
    }
}

fn duration_ns(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
