//! Snapshot output (JSON and CSV files consumed by the dashboard)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::cache::write_atomic;
use crate::constants;

/// Write `value` as pretty JSON, replacing any previous file atomically
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote snapshot");
    Ok(())
}

/// Write a CSV with the given header row followed by `rows`
pub fn write_csv<R: Serialize>(path: &Path, header: &[&str], rows: &[R]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV {}: {}", path.display(), e))?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), rows = rows.len(), "wrote CSV");
    Ok(())
}

/// `last_updated` value for snapshot files
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format(constants::TIMESTAMP_FORMAT).to_string()
}

/// Calendar date (UTC) of a unix timestamp
pub fn format_date(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.format(constants::DATE_FORMAT).to_string())
}

/// Calendar date of a lock end, empty for "no lock"
pub fn format_lock_end(ts: i64) -> String {
    if ts <= 0 {
        String::new()
    } else {
        format_date(ts).unwrap_or_default()
    }
}
