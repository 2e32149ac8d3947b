//! Run export: delimited rows and structured snapshots
//!
//! Both formats are pure functions of a [`RunSnapshot`] taken under the run's
//! read lock, so a live run exports a consistent point-in-time view.

use crate::error::{EngineError, Result};
use crate::metrics::LatencyPercentiles;
use crate::types::Run;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Structured export schema version
pub const FORMAT_VERSION: u32 = 1;

/// Fixed leading CSV columns; tag columns follow
pub const CSV_COLUMNS: [&str; 5] = ["timestamp", "kind", "outcome_status", "latency_millis", "detail"];

/// Prefix of the flattened tag columns
pub const TAG_COLUMN_PREFIX: &str = "tag.";

/// Supported export formats
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// One row per event
    Csv,
    /// Full run including config and aggregate
    Json,
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

/// Consistent point-in-time copy of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run: Run,
    pub latency: LatencyPercentiles,
}

/// Structured export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub run: Run,
    pub latency: LatencyPercentiles,
}

/// Serialize `snapshot` in `format`
pub fn export(snapshot: &RunSnapshot, format: ExportFormat, exported_at: DateTime<Utc>) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => write_csv(&snapshot.run),
        ExportFormat::Json => {
            let document = RunExport {
                format_version: FORMAT_VERSION,
                exported_at,
                run: snapshot.run.clone(),
                latency: snapshot.latency.clone(),
            };
            Ok(serde_json::to_vec_pretty(&document)?)
        }
    }
}

/// Parse a structured export back into its document
pub fn parse_structured(bytes: &[u8]) -> Result<RunExport> {
    let document: RunExport = serde_json::from_slice(bytes)?;
    if document.format_version > FORMAT_VERSION {
        return Err(EngineError::Serialization(format!(
            "export format version {} is newer than supported {}",
            document.format_version, FORMAT_VERSION
        )));
    }
    Ok(document)
}

fn write_csv(run: &Run) -> Result<Vec<u8>> {
    let tag_keys: BTreeSet<&str> = run
        .log
        .iter()
        .flat_map(|event| event.tags.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());

    let header = CSV_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(tag_keys.iter().map(|k| format!("{}{}", TAG_COLUMN_PREFIX, k)));
    writer.write_record(header)?;

    for event in &run.log {
        let mut row = vec![
            event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            event.kind.to_string(),
            event.outcome_status.clone(),
            event.latency_millis.map(|l| l.to_string()).unwrap_or_default(),
            event.detail.clone(),
        ];
        row.extend(
            tag_keys
                .iter()
                .map(|key| event.tags.get(*key).cloned().unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| EngineError::Serialization(e.to_string()))
}
