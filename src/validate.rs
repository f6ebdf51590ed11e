//! Validate command - check an output tree of `.pcd` and `.png` artifacts

use anyhow::{Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use crate::writer::PCD_PREAMBLE;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub pcd_files: usize,
    pub png_files: usize,
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Validate every artifact below `dir`.
///
/// Performs the following checks:
/// - Every `.pcd` carries the exact v0.7 ASCII header
/// - `WIDTH` equals `POINTS` equals the number of data lines
/// - Every data line holds four floats
/// - Every `.png` decodes
pub fn validate_output(dir: &str) -> Result<()> {
    let root = Path::new(dir);
    if !root.is_dir() {
        println!("Validation of {}: FAILED", dir);
        println!("[ERROR] Not a directory");
        bail!("not a directory: {}", dir);
    }

    let report = check_output(root)?;
    if report.passed() {
        println!("Validation of {}: PASSED", dir);
        println!(
            "Checked {} point clouds and {} images",
            report.pcd_files, report.png_files
        );
        Ok(())
    } else {
        println!("Validation of {}: FAILED", dir);
        for p in &report.problems {
            println!("[ERROR] {}", p);
        }
        bail!("{} problem(s) found in {}", report.problems.len(), dir)
    }
}

pub fn check_output(root: &Path) -> std::io::Result<ValidationReport> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    let mut report = ValidationReport::default();
    for path in files {
        match path.extension().and_then(|e| e.to_str()) {
            Some("pcd") => {
                report.pcd_files += 1;
                let text = fs::read_to_string(&path)?;
                if let Err(msg) = check_pcd(&text) {
                    report.problems.push(format!("{}: {}", path.display(), msg));
                }
            }
            Some("png") => {
                report.png_files += 1;
                if let Err(e) = image::open(&path) {
                    report
                        .problems
                        .push(format!("{}: png does not decode: {}", path.display(), e));
                }
            }
            _ => {}
        }
    }
    Ok(report)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn header_value<'a>(line: Option<&'a str>, key: &str) -> Result<&'a str, String> {
    line.and_then(|l| l.strip_prefix(key))
        .and_then(|v| v.strip_prefix(' '))
        .ok_or_else(|| format!("missing {} line", key))
}

pub fn check_pcd(text: &str) -> Result<(), String> {
    let mut lines = text.lines();
    for expected in PCD_PREAMBLE {
        match lines.next() {
            Some(l) if l == expected => {}
            Some(l) => return Err(format!("expected '{}', found '{}'", expected, l)),
            None => return Err("truncated header".to_string()),
        }
    }
    let width: usize = header_value(lines.next(), "WIDTH")?
        .parse()
        .map_err(|_| "WIDTH is not a count".to_string())?;
    if header_value(lines.next(), "HEIGHT")? != "1" {
        return Err("HEIGHT must be 1".to_string());
    }
    if header_value(lines.next(), "VIEWPOINT")? != "0 0 0 1 0 0 0" {
        return Err("unexpected VIEWPOINT".to_string());
    }
    let points: usize = header_value(lines.next(), "POINTS")?
        .parse()
        .map_err(|_| "POINTS is not a count".to_string())?;
    if header_value(lines.next(), "DATA")? != "ascii" {
        return Err("DATA must be ascii".to_string());
    }
    if width != points {
        return Err(format!("WIDTH {} != POINTS {}", width, points));
    }

    let mut count = 0;
    for (i, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 4 || fields.iter().any(|f| f.parse::<f32>().is_err()) {
            return Err(format!("malformed point on data line {}", i + 1));
        }
        count += 1;
    }
    if count != points {
        return Err(format!("POINTS {} but {} data lines", points, count));
    }
    Ok(())
}
