//! CSV sink for report records
//!
//! Appends one row per accepted report. The header is written only when the
//! file starts out empty, so restarting a run keeps appending to the same
//! file. A failed row is logged and skipped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tokio::sync::mpsc;
use tracing::{info, warn};

use surge_core::{ReportRecord, SurgeError, SurgeResult};

/// Column names, in order
pub const CSV_HEADER: [&str; 13] = [
    "timestamp",
    "label",
    "step",
    "node",
    "connected",
    "avg_startup",
    "avg_bitrate",
    "avg_buffers",
    "avg_buffer_time",
    "cpu",
    "mem",
    "clients",
    "failures",
];

/// Appending CSV writer
pub struct CsvSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl CsvSink {
    /// Open (or create) `path` for appending
    pub fn open(path: impl AsRef<Path>) -> SurgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(CSV_HEADER).map_err(csv_error)?;
            writer.flush()?;
        }

        Ok(CsvSink {
            writer,
            path,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written by this sink
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append and flush one row
    pub fn write(&mut self, record: &ReportRecord) -> SurgeResult<()> {
        let report = &record.report;
        let row = [
            record.timestamp.to_rfc3339(),
            record.label.clone(),
            optional(record.step),
            record.node_id.to_string(),
            optional(report.connected),
            report.avg_startup.to_string(),
            report.avg_bitrate.to_string(),
            report.avg_buffers.to_string(),
            report.avg_buffer_time.to_string(),
            optional(report.resources.cpu),
            optional(report.resources.mem),
            optional(report.resources.clients),
            optional(report.resources.failures),
        ];
        self.writer.write_record(&row).map_err(csv_error)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Drain `records` until every sender is gone. Returns rows written.
    pub async fn run(mut self, mut records: mpsc::UnboundedReceiver<ReportRecord>) -> u64 {
        info!(path = %self.path.display(), "recording reports");
        while let Some(record) = records.recv().await {
            if let Err(e) = self.write(&record) {
                warn!(node = %record.node_id, "dropping report row: {}", e);
            }
        }
        self.rows
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_error(e: csv::Error) -> SurgeError {
    SurgeError::Sink(e.to_string())
}
