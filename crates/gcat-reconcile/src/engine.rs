//! Per-field verdicts across locations.

use std::collections::{BTreeMap, BTreeSet};

use gcat_catalog::{clean_for_comparison, format_field_value, CatalogRow, LocationSnapshot, RowError};
use gcat_core::{
    ComparisonRecord, FieldComparison, FieldValue, LocatedValue, Location, LocationExistence,
    MetadataField, TextMode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictPolicy {
    /// Verdict when the dataset exists nowhere.
    pub all_absent_is_match: bool,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self {
            all_absent_is_match: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ComparisonKey {
    Missing,
    Text(String),
}

/// Absent locations are ignored; the rest must agree on one non-missing key.
pub fn verdict<'v>(values: impl IntoIterator<Item = &'v FieldValue>, policy: VerdictPolicy) -> bool {
    let keys = values
        .into_iter()
        .filter_map(|value| match value {
            FieldValue::Absent => None,
            FieldValue::Missing => Some(ComparisonKey::Missing),
            FieldValue::Present(text) => Some(ComparisonKey::Text(clean_for_comparison(text))),
        })
        .collect::<BTreeSet<_>>();

    match keys.len() {
        0 => policy.all_absent_is_match,
        1 => !keys.contains(&ComparisonKey::Missing),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileEngine {
    locations: Vec<Location>,
    fields: Vec<MetadataField>,
    policy: VerdictPolicy,
    text_mode: TextMode,
}

impl Default for ReconcileEngine {
    fn default() -> Self {
        Self {
            locations: vec![Location::Local, Location::Remote],
            fields: MetadataField::ALL.to_vec(),
            policy: VerdictPolicy::default(),
            text_mode: TextMode::Plain,
        }
    }
}

impl ReconcileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the catalog as the first compared location.
    pub fn with_catalog(mut self) -> Self {
        if !self.locations.contains(&Location::Catalog) {
            self.locations.insert(0, Location::Catalog);
        }
        self
    }

    pub fn with_fields(mut self, fields: Vec<MetadataField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_policy(mut self, policy: VerdictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_text_mode(mut self, text_mode: TextMode) -> Self {
        self.text_mode = text_mode;
        self
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn fields(&self) -> &[MetadataField] {
        &self.fields
    }

    pub fn compare_row(&self, row: &CatalogRow<'_>) -> Result<ComparisonRecord, RowError> {
        let span = info_span!("compare_row", table = row.table_name(), index = row.index());
        let _guard = span.enter();

        let snapshots = self
            .locations
            .iter()
            .map(|location| row.snapshot(*location))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.compare_snapshots(row.table_name(), &snapshots))
    }

    pub fn compare_snapshots(&self, table_name: &str, snapshots: &[LocationSnapshot]) -> ComparisonRecord {
        let existence = snapshots
            .iter()
            .map(|s| LocationExistence {
                location: s.location,
                exists: s.exists,
            })
            .collect();

        let fields = self
            .fields
            .iter()
            .map(|field| {
                let values = snapshots
                    .iter()
                    .map(|s| LocatedValue {
                        location: s.location,
                        value: self.field_value(*field, s),
                    })
                    .collect::<Vec<_>>();
                let matched = verdict(values.iter().map(|v| &v.value), self.policy);
                debug!(table_name, field = %field, matched, "field verdict");
                FieldComparison {
                    field: *field,
                    values,
                    matched,
                }
            })
            .collect();

        ComparisonRecord {
            table_name: table_name.to_string(),
            existence,
            fields,
        }
    }

    /// An unset, empty or blank-once-formatted value is `Missing`, never a
    /// value from elsewhere.
    pub fn field_value(&self, field: MetadataField, snapshot: &LocationSnapshot) -> FieldValue {
        if !snapshot.exists {
            return FieldValue::Absent;
        }
        let Some(value) = snapshot.field(field).filter(|v| !v.is_empty()) else {
            return FieldValue::Missing;
        };
        let formatted = format_field_value(field, snapshot.location, &value, self.text_mode);
        // Markup with no text (`<p></p>`) says nothing either.
        if formatted.trim().is_empty() {
            FieldValue::Missing
        } else {
            FieldValue::Present(formatted)
        }
    }
}

/// Records keyed by table name; a later record replaces an earlier one.
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    locations: Vec<Location>,
    fields: Vec<MetadataField>,
    records: BTreeMap<String, ComparisonRecord>,
}

pub const INDEX_COLUMN: &str = "Table Name";

impl ComparisonTable {
    pub fn new(locations: &[Location], fields: &[MetadataField]) -> Self {
        Self {
            locations: locations.to_vec(),
            fields: fields.to_vec(),
            records: BTreeMap::new(),
        }
    }

    pub fn for_engine(engine: &ReconcileEngine) -> Self {
        Self::new(engine.locations(), engine.fields())
    }

    pub fn insert(&mut self, record: ComparisonRecord) -> Option<ComparisonRecord> {
        self.records.insert(record.table_name.clone(), record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted by table name.
    pub fn records(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.records.values()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn fields(&self) -> &[MetadataField] {
        &self.fields
    }

    /// Index column followed by the record columns.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(INDEX_COLUMN.to_string())
            .chain(ComparisonRecord::column_names(&self.locations, &self.fields))
            .collect()
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.records()
            .map(|record| {
                std::iter::once(record.table_name.clone())
                    .chain(record.cells().iter().map(ToString::to_string))
                    .collect()
            })
            .collect()
    }

    /// `(field, matched, mismatched)` per tracked field.
    pub fn match_counts(&self) -> Vec<(MetadataField, usize, usize)> {
        self.fields
            .iter()
            .map(|field| {
                let matched = self
                    .records()
                    .filter(|r| r.matched(*field) == Some(true))
                    .count();
                (*field, matched, self.len() - matched)
            })
            .collect()
    }
}
