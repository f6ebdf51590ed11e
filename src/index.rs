//! Per-stream sorted timestamp index.

use crate::config::Stream;
use crate::db3::{Cursor, Db3Reader};
use crate::error::Result;

/// Sorted `(timestamp, record_id)` pairs of one stream.
///
/// Built once by a paged read of the log and read-only afterwards.
/// Duplicate timestamps are kept, ordered by record id.
#[derive(Debug, Clone)]
pub struct TimestampIndex {
    stream: Stream,
    entries: Vec<Cursor>,
}

impl TimestampIndex {
    pub fn build(reader: &Db3Reader, stream: &Stream, page_size: usize) -> Result<Self> {
        let page_size = page_size.max(1);
        let mut entries = Vec::new();
        let mut after = None;
        loop {
            let page = reader.timestamp_page(stream.id, after, page_size)?;
            let Some(last) = page.last().copied() else {
                break;
            };
            let full = page.len() == page_size;
            entries.extend(page);
            if !full {
                break;
            }
            after = Some(last);
        }
        tracing::debug!(stream = %stream.name, entries = entries.len(), "built timestamp index");
        Ok(Self::from_entries(stream.clone(), entries))
    }

    pub fn from_entries(stream: Stream, mut entries: Vec<Cursor>) -> Self {
        entries.sort_unstable();
        Self { stream, entries }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn entries(&self) -> &[Cursor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry whose timestamp is closest to `t`.
    ///
    /// Equal distances resolve to the earlier timestamp, and among duplicate
    /// timestamps the first entry wins, exactly as a left-to-right scan with
    /// a strict less-than comparison would choose.
    pub fn nearest(&self, t: i64) -> Option<Cursor> {
        let i = self.entries.partition_point(|e| e.timestamp < t);
        // entries[i] is the first entry at or after t
        let after = self.entries.get(i).copied();
        // first entry holding the largest timestamp below t
        let before = i.checked_sub(1).map(|j| {
            let ts = self.entries[j].timestamp;
            self.entries[self.entries.partition_point(|e| e.timestamp < ts)]
        });

        match (before, after) {
            (Some(b), Some(a)) => {
                if t.abs_diff(a.timestamp) < t.abs_diff(b.timestamp) {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (b, a) => b.or(a),
        }
    }
}
