//! Read access to ROS2 `.db3` recordings (SQLite `topics` + `messages`).
//!
//! A [`Db3Reader`] owns one connection and is not shared between threads;
//! concurrent tasks each open their own.

use anyhow::Context;
use prettytable::{Table, row};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};

use crate::config::{Modality, SensorSpec, Stream};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub id: i64,
    pub name: String,
    pub msg_type: String,
}

#[derive(Debug, Clone)]
pub struct RawRecord {
    pub record_id: i64,
    pub stream_id: i64,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// Position of a record inside its stream's `(timestamp, id)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub timestamp: i64,
    pub record_id: i64,
}

pub struct Db3Reader {
    conn: Connection,
    path: PathBuf,
}

impl Db3Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| SyncError::Open {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "opened log");
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn topics(&self) -> Result<Vec<TopicInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, type FROM topics ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(TopicInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                msg_type: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Exact-name lookup of a topic's stream id.
    pub fn resolve(&self, name: &str) -> Result<i64> {
        self.resolve_topic(name).map(|t| t.id)
    }

    pub fn resolve_topic(&self, name: &str) -> Result<TopicInfo> {
        self.conn
            .query_row(
                "SELECT id, name, type FROM topics WHERE name = ?1",
                params![name],
                |row| {
                    Ok(TopicInfo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        msg_type: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| SyncError::StreamNotFound(name.to_string()))
    }

    /// Resolve every configured sensor; the first missing one fails the lot.
    ///
    /// Without an explicit modality the topic's message type decides, and
    /// the topic name only when the type names neither images nor clouds.
    pub fn resolve_streams(&self, specs: &[SensorSpec]) -> Result<Vec<Stream>> {
        specs
            .iter()
            .map(|sensor| {
                let topic = self.resolve_topic(&sensor.name)?;
                let modality = sensor.resolve_modality(&topic.msg_type);
                if Modality::from_topic_type(&topic.msg_type).is_some_and(|t| t != modality) {
                    tracing::warn!(
                        stream = %sensor.name,
                        msg_type = %topic.msg_type,
                        ?modality,
                        "configured modality disagrees with the topic type"
                    );
                }
                tracing::debug!(stream = %sensor.name, id = topic.id, ?modality, "resolved stream");
                Ok(Stream {
                    name: sensor.name.clone(),
                    id: topic.id,
                    modality,
                })
            })
            .collect()
    }

    /// Up to `limit` index entries of a stream strictly after `after`.
    pub fn timestamp_page(
        &self,
        stream_id: i64,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<Cursor>> {
        let (ts, id) = after_bounds(after);
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, id FROM messages \
             WHERE topic_id = ?1 AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3)) \
             ORDER BY timestamp, id LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![stream_id, ts, id, limit as i64], |row| {
            Ok(Cursor {
                timestamp: row.get(0)?,
                record_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Up to `limit` full records of a stream strictly after `after`.
    pub fn record_page(
        &self,
        stream_id: i64,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<RawRecord>> {
        let (ts, id) = after_bounds(after);
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, topic_id, timestamp, data FROM messages \
             WHERE topic_id = ?1 AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3)) \
             ORDER BY timestamp, id LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![stream_id, ts, id, limit as i64], raw_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn record(&self, record_id: i64) -> Result<Option<RawRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, topic_id, timestamp, data FROM messages WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![record_id], raw_record).optional()?)
    }

    /// Per-topic message count and first/last timestamp.
    pub fn topic_stats(&self) -> Result<Vec<(TopicInfo, TopicStats)>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.type, COUNT(m.id), MIN(m.timestamp), MAX(m.timestamp) \
             FROM topics t LEFT JOIN messages m ON m.topic_id = t.id \
             GROUP BY t.id ORDER BY t.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                TopicInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    msg_type: row.get(2)?,
                },
                TopicStats {
                    count: row.get::<_, i64>(3)? as u64,
                    first: row.get(4)?,
                    last: row.get(5)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicStats {
    pub count: u64,
    pub first: Option<i64>,
    pub last: Option<i64>,
}

fn after_bounds(after: Option<Cursor>) -> (i64, i64) {
    match after {
        Some(c) => (c.timestamp, c.record_id),
        None => (i64::MIN, i64::MIN),
    }
}

fn raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        record_id: row.get(0)?,
        stream_id: row.get(1)?,
        timestamp: row.get(2)?,
        payload: row.get(3)?,
    })
}

pub fn inspect_db3(path: &str) -> anyhow::Result<()> {
    let reader = Db3Reader::open(path).with_context(|| format!("failed to open log: {}", path))?;
    let stats = reader.topic_stats()?;

    let global_first = stats.iter().filter_map(|(_, s)| s.first).min();
    let global_last = stats.iter().filter_map(|(_, s)| s.last).max();
    let total: u64 = stats.iter().map(|(_, s)| s.count).sum();
    let origin = global_first.unwrap_or(0);
    let rel = |ts: Option<i64>| ts.map(|t| (t - origin) as f64 / 1e9).unwrap_or(0.0);

    println!("Log: {}", path);
    println!(
        "Start (ns): {}, End (ns): {}, Duration (s): {:.6}, Total messages: {}\n",
        global_first.unwrap_or(0),
        global_last.unwrap_or(0),
        rel(global_last),
        total
    );

    let mut table = Table::new();
    table.set_titles(row!["Id", "Topic", "Type", "Count", "Start(s)", "End(s)"]);
    for (topic, st) in &stats {
        table.add_row(row![
            topic.id,
            topic.name,
            topic.msg_type,
            st.count,
            format!("{:.6}", rel(st.first)),
            format!("{:.6}", rel(st.last)),
        ]);
    }
    table.printstd();

    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use rusqlite::{Connection, params};
    use std::path::Path;

    /// Minimal rosbag2 sqlite schema.
    pub fn create_db3(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL, \
                 serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
             CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL, \
                 timestamp INTEGER NOT NULL, data BLOB NOT NULL);",
        )
        .unwrap();
        conn
    }

    pub fn add_topic(conn: &Connection, id: i64, name: &str, ty: &str) {
        conn.execute(
            "INSERT INTO topics(id, name, type, serialization_format, offered_qos_profiles) \
             VALUES (?1, ?2, ?3, 'cdr', '')",
            params![id, name, ty],
        )
        .unwrap();
    }

    pub fn add_message(conn: &Connection, topic_id: i64, timestamp: i64, data: &[u8]) -> i64 {
        conn.execute(
            "INSERT INTO messages(topic_id, timestamp, data) VALUES (?1, ?2, ?3)",
            params![topic_id, timestamp, data],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_resolve_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db3");
        let conn = create_db3(&path);
        add_topic(&conn, 3, "/image0", "sensor_msgs/msg/CompressedImage");
        drop(conn);

        let reader = Db3Reader::open(&path).unwrap();
        assert_eq!(reader.resolve("/image0").unwrap(), 3);
        match reader.resolve("/image9") {
            Err(SyncError::StreamNotFound(name)) => assert_eq!(name, "/image9"),
            other => panic!("expected StreamNotFound, got {:?}", other),
        }
        let specs = vec!["/image0".parse().unwrap(), "/rslidar_points_top".parse().unwrap()];
        assert!(matches!(
            reader.resolve_streams(&specs),
            Err(SyncError::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_topic_type_decides_modality() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db3");
        let conn = create_db3(&path);
        add_topic(&conn, 1, "/cam_front/compressed", "sensor_msgs/msg/CompressedImage");
        add_topic(&conn, 2, "/points_raw", "sensor_msgs/msg/PointCloud2");
        drop(conn);

        let reader = Db3Reader::open(&path).unwrap();
        let specs = vec![
            "/cam_front/compressed".parse().unwrap(),
            "/points_raw".parse().unwrap(),
        ];
        let streams = reader.resolve_streams(&specs).unwrap();
        assert_eq!(streams[0].modality, Modality::Camera);
        assert_eq!(streams[1].modality, Modality::Lidar);
    }

    #[test]
    fn test_paging_is_ordered_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db3");
        let conn = create_db3(&path);
        add_topic(&conn, 1, "/lidar", "sensor_msgs/msg/PointCloud2");
        add_topic(&conn, 2, "/other", "std_msgs/msg/String");
        // out of order inserts, duplicate timestamps
        for ts in [50, 10, 30, 30, 20, 40, 10] {
            add_message(&conn, 1, ts, b"x");
            add_message(&conn, 2, ts + 1, b"y");
        }
        drop(conn);

        let reader = Db3Reader::open(&path).unwrap();
        let mut after = None;
        let mut all = Vec::new();
        loop {
            let page = reader.timestamp_page(1, after, 3).unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().copied();
            all.extend(page);
        }
        let ts: Vec<i64> = all.iter().map(|c| c.timestamp).collect();
        assert_eq!(ts, vec![10, 10, 20, 30, 30, 40, 50]);
        assert!(all.windows(2).all(|w| w[0] < w[1]));

        let records = reader.record_page(1, None, 100).unwrap();
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.stream_id == 1 && r.payload == b"x"));

        let one = reader.record(records[0].record_id).unwrap().unwrap();
        assert_eq!(one.timestamp, 10);
        assert!(reader.record(10_000).unwrap().is_none());
    }
}
