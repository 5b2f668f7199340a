//! Run reports under `<reports_root>/<run_id>/`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BooleanArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use gcat_core::Cell;
use gcat_storage::content_digest;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::ComparisonTable;
use crate::locations::{LocationKind, PresenceRow};
use crate::writer::WriteOutcome;
use crate::RunSummary;

pub const COMPARE_CSV: &str = "metadata_compare.csv";
pub const COMPARE_JSON: &str = "metadata_compare.json";
pub const COMPARE_PARQUET: &str = "metadata_compare.parquet";
pub const MANIFEST_JSON: &str = "manifest.json";
pub const SUMMARY_MD: &str = "summary.md";
pub const WRITE_OUTCOMES_JSON: &str = "write_outcomes.json";

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ReportWriter {
    reports_root: PathBuf,
}

impl ReportWriter {
    pub fn new(reports_root: impl Into<PathBuf>) -> Self {
        Self {
            reports_root: reports_root.into(),
        }
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.reports_root.join(run_id.to_string())
    }

    fn ensure_run_dir(&self, run_id: Uuid) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }

    /// CSV, JSON and Parquet exports of the table plus their manifest.
    pub fn write_comparison(&self, run_id: Uuid, table: &ComparisonTable) -> Result<PathBuf> {
        let dir = self.ensure_run_dir(run_id)?;

        let csv_path = dir.join(COMPARE_CSV);
        write_csv(&csv_path, &table.header(), &table.rows())?;

        let json_path = dir.join(COMPARE_JSON);
        let json = serde_json::to_vec_pretty(&serde_json::json!({
            "run_id": run_id,
            "columns": table.header(),
            "records": table.records().collect::<Vec<_>>(),
        }))
        .context("serializing comparison records")?;
        fs::write(&json_path, json).with_context(|| format!("writing {}", json_path.display()))?;

        let parquet_path = dir.join(COMPARE_PARQUET);
        write_comparison_parquet(&parquet_path, table)?;

        let manifest = ReportManifest {
            schema_version: 1,
            run_id,
            files: vec![
                manifest_entry("metadata_compare_csv", &dir, &csv_path)?,
                manifest_entry("metadata_compare_json", &dir, &json_path)?,
                manifest_entry("metadata_compare_parquet", &dir, &parquet_path)?,
            ],
        };
        let manifest_path = dir.join(MANIFEST_JSON);
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
        fs::write(&manifest_path, bytes)
            .with_context(|| format!("writing {}", manifest_path.display()))?;

        info!(run_id = %run_id, rows = table.len(), dir = %dir.display(), "comparison reports written");
        Ok(dir)
    }

    pub fn write_presence(
        &self,
        run_id: Uuid,
        kind: LocationKind,
        rows: &[PresenceRow],
    ) -> Result<PathBuf> {
        let dir = self.ensure_run_dir(run_id)?;
        let path = dir.join(format!("storage_locations_{}.csv", kind.slug()));
        let header = PresenceRow::header(kind)
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let cells = rows.iter().map(|r| r.cells(kind)).collect::<Vec<_>>();
        write_csv(&path, &header, &cells)?;
        Ok(path)
    }

    pub fn write_outcomes(&self, run_id: Uuid, outcomes: &[WriteOutcome]) -> Result<PathBuf> {
        let dir = self.ensure_run_dir(run_id)?;
        let path = dir.join(WRITE_OUTCOMES_JSON);
        let bytes = serde_json::to_vec_pretty(outcomes).context("serializing write outcomes")?;
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn write_summary(
        &self,
        summary: &RunSummary,
        table: Option<&ComparisonTable>,
    ) -> Result<PathBuf> {
        let dir = self.ensure_run_dir(summary.run_id)?;
        let path = dir.join(SUMMARY_MD);
        fs::write(&path, summary_markdown(summary, table))
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

pub fn summary_markdown(summary: &RunSummary, table: Option<&ComparisonTable>) -> String {
    let mut lines = vec![
        format!("# gcat {}", summary.command),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Rows read: {}", summary.rows_read),
        format!("- Rows processed: {}", summary.rows_processed),
        format!("- Rows skipped: {}", summary.skipped.len()),
    ];
    if summary.write_failures > 0 {
        lines.push(format!("- Failed writes: {}", summary.write_failures));
    }

    if let Some(table) = table {
        lines.push(String::new());
        lines.push("## Field Matches".to_string());
        lines.push(String::new());
        lines.push("| Field | Match | Mismatch |".to_string());
        lines.push("|---|---|---|".to_string());
        for (field, matched, mismatched) in table.match_counts() {
            lines.push(format!("| {field} | {matched} | {mismatched} |"));
        }
    }

    if !summary.skipped.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped Rows".to_string());
        for skipped in &summary.skipped {
            lines.push(format!("- row {}: {}", skipped.index, skipped.error));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("writing header {}", path.display()))?;
    for row in rows {
        writer
            .write_record(row)
            .with_context(|| format!("writing record {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

fn is_boolean_column(name: &str) -> bool {
    name.ends_with(" - Exist") || name.ends_with(" - Match")
}

fn write_comparison_parquet(path: &Path, table: &ComparisonTable) -> Result<()> {
    let header = table.header();
    let schema = Arc::new(Schema::new(
        header
            .iter()
            .map(|name| {
                let data_type = if is_boolean_column(name) {
                    DataType::Boolean
                } else {
                    DataType::Utf8
                };
                ArrowField::new(name.as_str(), data_type, false)
            })
            .collect::<Vec<_>>(),
    ));

    let rows = table
        .records()
        .map(|record| {
            std::iter::once(Cell::Text(record.table_name.clone()))
                .chain(record.cells())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let columns = header
        .iter()
        .enumerate()
        .map(|(idx, name)| -> ArrayRef {
            if is_boolean_column(name) {
                Arc::new(BooleanArray::from(
                    rows.iter()
                        .map(|row| matches!(row.get(idx), Some(Cell::Bool(true))))
                        .collect::<Vec<_>>(),
                ))
            } else {
                Arc::new(StringArray::from(
                    rows.iter()
                        .map(|row| row.get(idx).map(ToString::to_string).unwrap_or_default())
                        .collect::<Vec<_>>(),
                ))
            }
        })
        .collect::<Vec<_>>();

    let batch = RecordBatch::try_new(schema, columns).context("building comparison record batch")?;
    write_parquet(path, batch)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: content_digest(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gcat_core::{
        ComparisonRecord, FieldComparison, FieldValue, LocatedValue, Location, LocationExistence,
        MetadataField,
    };
    use tempfile::tempdir;

    use crate::SkippedRow;

    fn table() -> ComparisonTable {
        let mut table = ComparisonTable::new(&[Location::Local, Location::Remote], &[MetadataField::Tags]);
        table.insert(ComparisonRecord {
            table_name: "Roads".into(),
            existence: vec![
                LocationExistence { location: Location::Local, exists: true },
                LocationExistence { location: Location::Remote, exists: false },
            ],
            fields: vec![FieldComparison {
                field: MetadataField::Tags,
                values: vec![
                    LocatedValue {
                        location: Location::Local,
                        value: FieldValue::Present("a,b".into()),
                    },
                    LocatedValue {
                        location: Location::Remote,
                        value: FieldValue::Absent,
                    },
                ],
                matched: true,
            }],
        });
        table
    }

    #[test]
    fn comparison_exports_and_manifest_are_written() {
        let dir = tempdir().expect("tempdir");
        let writer = ReportWriter::new(dir.path());
        let run_id = Uuid::new_v4();
        let run_dir = writer.write_comparison(run_id, &table()).unwrap();

        let csv = fs::read_to_string(run_dir.join(COMPARE_CSV)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Table Name,Local - Exist,Service - Exist,Local - tags,Service - tags,tags - Match")
        );
        assert_eq!(lines.next(), Some("Roads,TRUE,FALSE,\"a,b\",Dataset Doesn't Exist,TRUE"));

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(run_dir.join(MANIFEST_JSON)).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        let parquet_entry = files
            .iter()
            .find(|f| f["path"] == COMPARE_PARQUET)
            .expect("parquet entry");
        let parquet_bytes = fs::read(run_dir.join(COMPARE_PARQUET)).unwrap();
        assert_eq!(parquet_entry["sha256"], content_digest(&parquet_bytes));
    }

    #[test]
    fn summary_lists_match_counts_and_skipped_rows() {
        let now = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            command: "compare-metadata".into(),
            started_at: now,
            finished_at: now,
            rows_read: 2,
            rows_processed: 1,
            skipped: vec![SkippedRow {
                index: 3,
                error: "row 3: `Table Name` contains invalid characters (Flood:Zone)".into(),
            }],
            write_failures: 0,
            reports_dir: None,
            artifacts: vec![],
        };
        let md = summary_markdown(&summary, Some(&table()));
        assert!(md.contains("| tags | 1 | 0 |"));
        assert!(md.contains("- row 3: row 3: `Table Name` contains invalid characters"));
    }
}
