//! Writing payloads and CSV twins to disk.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::models::report::CsvRecord;

pub fn to_json(value: &impl Serialize, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    Ok(())
}

pub fn write_json(path: &Path, value: &impl Serialize, pretty: bool) -> Result<()> {
    ensure_parent(path)?;
    let mut body = to_json(value, pretty)?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("Failed to write JSON output: {}", path.display()))
}

/// One header row from the row type's field names, then one record per row.
/// An empty row set yields the header alone.
pub fn write_csv<R: CsvRecord>(path: &Path, rows: &[R]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV output: {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record(R::HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        sha: &'static str,
        files: &'static str,
        lag_hours: Option<f64>,
    }

    impl CsvRecord for Row {
        const HEADER: &'static [&'static str] = &["sha", "files", "lag_hours"];
    }

    #[test]
    fn csv_has_header_and_empty_options() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out/rows.csv");
        let rows = [
            Row {
                sha: "abc123",
                files: "cli.py|util.py",
                lag_hours: Some(0.05),
            },
            Row {
                sha: "def456",
                files: "README.md",
                lag_hours: None,
            },
        ];
        write_csv(&path, &rows).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, ["sha,files,lag_hours", "abc123,cli.py|util.py,0.05", "def456,README.md,"]);
    }

    #[test]
    fn empty_csv_still_has_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        write_csv::<Row>(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "sha,files,lag_hours\n");
    }

    #[test]
    fn json_file_ends_with_newline() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        write_json(&path, &serde_json::json!({"a": 1}), false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
    }
}
