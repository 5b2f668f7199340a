//! Data-catalog inventory: loading, row validation, canonical formatters and
//! existence resolution against local stores and the portal.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod normalize;
mod row;

pub use normalize::{
    clean_for_comparison, format_field_value, normalize_rich_text, normalize_tag_list,
    normalize_tags, RICH_TEXT_ATTRIBUTES,
};
pub use row::{
    contains_forbidden_character, local_exists, remote_exists, CatalogContext, CatalogRow,
    LocationSnapshot, RowError, ValidationError, FORBIDDEN_CHARACTERS,
};

/// One inventory cell. Spreadsheet exports leave numeric placeholders in
/// empty text columns, so anything but non-blank text counts as unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

impl CellValue {
    pub fn from_csv(field: &str) -> Self {
        if field.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(field.to_string())
        }
    }

    /// Trimmed text, or `None` for blanks and non-text placeholders.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        }
    }
}

pub type RawRow = BTreeMap<String, CellValue>;

/// Inventory column names. Defaults follow the catalog workbook headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryColumns {
    pub table_name: String,
    pub local_container: String,
    pub remote_id: String,
    pub remote_link: String,
    pub provider: String,
    pub category: String,
    pub tags: String,
    pub summary: String,
    pub description: String,
    pub title: String,
    pub common_name: String,
}

impl Default for InventoryColumns {
    fn default() -> Self {
        Self {
            table_name: "Table Name".to_string(),
            local_container: "Local Container".to_string(),
            remote_id: "AGOL Item ID".to_string(),
            remote_link: "AGOL Link".to_string(),
            provider: "Provider".to_string(),
            category: "Web App Category".to_string(),
            tags: "Tags".to_string(),
            summary: "Metadata - Summary".to_string(),
            description: "Metadata - Description".to_string(),
            title: "AGOL Title Name".to_string(),
            common_name: "Common Name".to_string(),
        }
    }
}

/// Include/exclude lists over one column. An empty include list admits
/// every value not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ValueFilter {
    pub fn accepts(&self, value: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|v| v == value) {
            return false;
        }
        !self.exclude.iter().any(|v| v == value)
    }
}

/// Row selection by local container and by web-app category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowFilter {
    pub containers: ValueFilter,
    pub categories: ValueFilter,
}

impl RowFilter {
    pub fn accepts(&self, row: &RawRow, columns: &InventoryColumns) -> bool {
        let cell = |column: &str| row.get(column).and_then(CellValue::as_text).unwrap_or("");
        self.containers.accepts(cell(&columns.local_container))
            && self.categories.accepts(cell(&columns.category))
    }
}

/// Whether row construction checks existence eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistenceChecks {
    #[default]
    Strict,
    Deferred,
}

impl FromStr for ExistenceChecks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ExistenceChecks::Strict),
            "deferred" => Ok(ExistenceChecks::Deferred),
            other => Err(format!(
                "unknown existence check mode `{other}` (expected strict or deferred)"
            )),
        }
    }
}

/// Reads CSV inventory rows keyed by header.
pub fn read_inventory_csv<R: Read>(reader: R) -> Result<Vec<RawRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = csv_reader.headers().context("reading inventory headers")?.clone();

    let mut rows = Vec::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("reading inventory record {}", idx + 1))?;
        let row = headers
            .iter()
            .zip(record.iter().chain(std::iter::repeat("")))
            .map(|(header, field)| (header.to_string(), CellValue::from_csv(field)))
            .collect::<RawRow>();
        rows.push(row);
    }
    Ok(rows)
}

/// Loads an inventory from `.csv` or `.json` (array of objects).
pub fn load_inventory(path: impl AsRef<Path>) -> Result<Vec<RawRow>> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let rows = match extension.as_str() {
        "csv" => {
            let file = fs::File::open(path)
                .with_context(|| format!("opening inventory {}", path.display()))?;
            read_inventory_csv(file)?
        }
        "json" => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading inventory {}", path.display()))?;
            serde_json::from_str::<Vec<RawRow>>(&text)
                .with_context(|| format!("parsing inventory {}", path.display()))?
        }
        other => bail!(
            "unsupported inventory format `{other}` for {} (expected csv or json)",
            path.display()
        ),
    };
    debug!(path = %path.display(), rows = rows.len(), "loaded inventory");
    Ok(rows)
}
