use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;

fn lidar_payload(points: usize) -> Vec<u8> {
    let mut data = vec![0u8; 56];
    for i in 0..points {
        for v in [100.0f32, i as f32, 0.5, -2.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }
    data
}

fn image_payload() -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 6, Rgb([30, 60, 220]));
    let mut jpeg = std::io::Cursor::new(Vec::new());
    img.write_to(&mut jpeg, image::ImageFormat::Jpeg).unwrap();
    let mut data = b"\x00\x01\x00\x00header-bytes".to_vec();
    data.extend_from_slice(&jpeg.into_inner());
    data.extend_from_slice(&[0, 0]);
    data
}

/// Lidar at 10 Hz, camera at ~7.5 Hz with jitter, 2 seconds of data.
fn write_log(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL, \
             serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
         CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL, \
             timestamp INTEGER NOT NULL, data BLOB NOT NULL);",
    )
    .unwrap();
    let topics = [
        (1, "/rslidar_points_top", "sensor_msgs/msg/PointCloud2"),
        (2, "/image0", "sensor_msgs/msg/CompressedImage"),
    ];
    for (id, name, ty) in topics {
        conn.execute(
            "INSERT INTO topics VALUES (?1, ?2, ?3, 'cdr', '')",
            params![id, name, ty],
        )
        .unwrap();
    }
    let base: i64 = 1_700_000_000_000_000_000;
    let insert = |topic: i64, ts: i64, data: &[u8]| {
        conn.execute(
            "INSERT INTO messages(topic_id, timestamp, data) VALUES (?1, ?2, ?3)",
            params![topic, ts, data],
        )
        .unwrap();
    };
    for i in 0..20i64 {
        insert(1, base + i * 100_000_000, &lidar_payload(4));
    }
    for i in 0..15i64 {
        insert(2, base + i * 133_333_333 + (i % 3) * 5_000_000, &image_payload());
    }
}

#[test]
fn test_inspect_command() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run_0.db3");
    write_log(&log);

    Command::cargo_bin("db3sync")
        .unwrap()
        .args(["inspect", log.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Topic"))
        .stdout(predicate::str::contains("/rslidar_points_top"))
        .stdout(predicate::str::contains("sensor_msgs/msg/CompressedImage"));
}

#[test]
fn test_sync_then_validate() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run_0.db3");
    let out = dir.path().join("frames");
    write_log(&log);

    Command::cargo_bin("db3sync")
        .unwrap()
        .args([
            "sync",
            log.to_str().unwrap(),
            out.to_str().unwrap(),
            "--sensor",
            "/rslidar_points_top",
            "--sensor",
            "/image0",
            "--anchor",
            "/rslidar_points_top",
            "--no-progress",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("bundles"));

    let mut bundles: Vec<i64> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().parse().unwrap())
        .collect();
    bundles.sort();
    assert!(!bundles.is_empty());
    for w in bundles.windows(2) {
        assert!(w[1] - w[0] >= 330_000_000);
    }
    for b in &bundles {
        let bdir = out.join(b.to_string());
        let names: Vec<String> = fs::read_dir(&bdir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&format!("rslidar_points_top_{}.pcd", b)));
        assert!(names.iter().any(|n| n.starts_with("image0_") && n.ends_with(".png")));
        assert!(names.contains(&format!("combined_pointclouds_{}.pcd", b)));
    }

    Command::cargo_bin("db3sync")
        .unwrap()
        .args(["validate", out.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASSED"));
}

#[test]
fn test_sync_unknown_sensor_fails() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run_0.db3");
    write_log(&log);

    Command::cargo_bin("db3sync")
        .unwrap()
        .args([
            "sync",
            log.to_str().unwrap(),
            dir.path().join("frames").to_str().unwrap(),
            "--sensor",
            "/rslidar_points_top",
            "--sensor",
            "/image7",
            "--anchor",
            "/rslidar_points_top",
            "--no-progress",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("/image7"));
}

#[test]
fn test_extract_with_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run_0.db3");
    let out = dir.path().join("dump");
    write_log(&log);
    let config = dir.path().join("run.json");
    fs::write(
        &config,
        serde_json::json!({
            "log_path": log,
            "output_dir": out,
            "sensors": [
                {"name": "/rslidar_points_top"},
                {"name": "/image0", "modality": "camera"}
            ],
            "page_size": 7,
            "show_progress": false
        })
        .to_string(),
    )
    .unwrap();

    Command::cargo_bin("db3sync")
        .unwrap()
        .args(["extract", "--config", config.to_str().unwrap(), "--workers", "2"])
        .assert()
        .success();

    assert_eq!(fs::read_dir(out.join("rslidar_points_top")).unwrap().count(), 20);
    assert_eq!(fs::read_dir(out.join("image0")).unwrap().count(), 15);

    let lib_summary = db3sync::extract_streams(&{
        let mut cfg = db3sync::RunConfig::from_json_file(&config).unwrap();
        cfg.dry_run = true;
        cfg
    })
    .unwrap();
    assert_eq!(lib_summary.streams[0].records, 20);
    assert_eq!(lib_summary.failures(), 0);
}
