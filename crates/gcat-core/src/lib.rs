//! Core domain model for the GIS catalog audit toolkit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

pub const ABSENT_SENTINEL: &str = "Dataset Doesn't Exist";
pub const MISSING_SENTINEL: &str = "Missing";

/// Canonical metadata attributes kept consistent across locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataField {
    Title,
    Description,
    Summary,
    Tags,
    Credits,
    AccessConstraints,
}

impl MetadataField {
    pub const ALL: [MetadataField; 6] = [
        MetadataField::Title,
        MetadataField::Description,
        MetadataField::Summary,
        MetadataField::Tags,
        MetadataField::Credits,
        MetadataField::AccessConstraints,
    ];

    /// Attribute name on a local store metadata document. Also the report column name.
    pub fn local_attr(self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Description => "description",
            MetadataField::Summary => "summary",
            MetadataField::Tags => "tags",
            MetadataField::Credits => "credits",
            MetadataField::AccessConstraints => "accessConstraints",
        }
    }

    /// Property name on a portal item.
    pub fn remote_attr(self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Description => "description",
            MetadataField::Summary => "snippet",
            MetadataField::Tags => "tags",
            MetadataField::Credits => "accessInformation",
            MetadataField::AccessConstraints => "licenseInfo",
        }
    }

    pub fn attr_for(self, location: Location) -> &'static str {
        match location {
            Location::Remote => self.remote_attr(),
            Location::Catalog | Location::Local => self.local_attr(),
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_attr())
    }
}

impl FromStr for MetadataField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataField::ALL
            .into_iter()
            .find(|f| f.local_attr().eq_ignore_ascii_case(s.trim()) || f.remote_attr() == s.trim())
            .ok_or_else(|| format!("unknown metadata field `{s}`"))
    }
}

/// Places a dataset's metadata can live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Catalog,
    Local,
    Remote,
}

impl Location {
    pub fn label(self) -> &'static str {
        match self {
            Location::Catalog => "Catalog",
            Location::Local => "Local",
            Location::Remote => "Service",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How rich-text fields are rendered before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextMode {
    #[default]
    Plain,
    Html,
}

impl FromStr for TextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(TextMode::Plain),
            "html" => Ok(TextMode::Html),
            other => Err(format!("unknown text mode `{other}` (expected plain or html)")),
        }
    }
}

/// Raw metadata value as a backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Tags(Vec<String>),
}

impl MetadataValue {
    pub fn is_empty(&self) -> bool {
        match self {
            MetadataValue::Text(text) => text.is_empty(),
            MetadataValue::Tags(tags) => tags.is_empty(),
        }
    }
}

/// Per-location fact for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// The dataset is not present at the location.
    Absent,
    /// The dataset is present but the field is empty or not exposed.
    Missing,
    Present(String),
}

impl FieldValue {
    pub fn as_display(&self) -> &str {
        match self {
            FieldValue::Absent => ABSENT_SENTINEL,
            FieldValue::Missing => MISSING_SENTINEL,
            FieldValue::Present(text) => text,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_display())
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_display())
    }
}

/// Metadata document of one local store item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_constraints: Option<String>,
}

impl ItemMetadata {
    pub fn field(&self, field: MetadataField) -> Option<MetadataValue> {
        let slot = match field {
            MetadataField::Title => &self.title,
            MetadataField::Description => &self.description,
            MetadataField::Summary => &self.summary,
            MetadataField::Tags => &self.tags,
            MetadataField::Credits => &self.credits,
            MetadataField::AccessConstraints => &self.access_constraints,
        };
        slot.clone().map(MetadataValue::Text)
    }

    pub fn set_field(&mut self, field: MetadataField, value: impl Into<String>) {
        let value = Some(value.into());
        match field {
            MetadataField::Title => self.title = value,
            MetadataField::Description => self.description = value,
            MetadataField::Summary => self.summary = value,
            MetadataField::Tags => self.tags = value,
            MetadataField::Credits => self.credits = value,
            MetadataField::AccessConstraints => self.access_constraints = value,
        }
    }
}

/// Hosted portal item with the properties the toolkit reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub access_information: Option<String>,
    #[serde(default)]
    pub license_info: Option<String>,
}

impl PortalItem {
    pub fn field(&self, field: MetadataField) -> Option<MetadataValue> {
        let text = match field {
            MetadataField::Tags => return Some(MetadataValue::Tags(self.tags.clone())),
            MetadataField::Title => &self.title,
            MetadataField::Description => &self.description,
            MetadataField::Summary => &self.snippet,
            MetadataField::Credits => &self.access_information,
            MetadataField::AccessConstraints => &self.license_info,
        };
        text.clone().map(MetadataValue::Text)
    }
}

/// Item property update pushed to the portal. `None` leaves a property untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_information: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_info: Option<String>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.snippet.is_none()
            && self.tags.is_none()
            && self.access_information.is_none()
            && self.license_info.is_none()
    }

    pub fn apply_to(&self, item: &mut PortalItem) {
        if let Some(v) = &self.description {
            item.description = Some(v.clone());
        }
        if let Some(v) = &self.snippet {
            item.snippet = Some(v.clone());
        }
        if let Some(v) = &self.tags {
            item.tags = v.clone();
        }
        if let Some(v) = &self.access_information {
            item.access_information = Some(v.clone());
        }
        if let Some(v) = &self.license_info {
            item.license_info = Some(v.clone());
        }
    }
}

/// Program-specific boilerplate used by the canonical formatters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectProfile {
    pub project_name: String,
    pub hub_name: String,
    pub agency: String,
}

impl Default for ProjectProfile {
    fn default() -> Self {
        Self {
            project_name: "Cascadia".to_string(),
            hub_name: "Cascadia High-Speed Rail and I-5 Program Hub".to_string(),
            agency: "WSDOT".to_string(),
        }
    }
}

impl ProjectProfile {
    pub fn credits(&self, provider: &str) -> String {
        format!(
            "Data Created by {} Project Team - Data Source: {provider}",
            self.project_name
        )
    }

    pub fn default_summary(&self, webapp_category: Option<&str>) -> String {
        match webapp_category {
            Some(category) => format!(
                "This dataset was requested by SMEs for the {category} web app and map figure production."
            ),
            None => format!(
                "This dataset was used in the development of the {} project, but does not need to be published to the AGOL for web app purposes.",
                self.project_name
            ),
        }
    }

    pub fn access_constraints(&self) -> String {
        format!(
            "The {} is offered solely as a convenience to authorized users. It is provided as is and as available and neither {} nor any other person or entity makes any warranty whatsoever regarding it or the information it contains, including but not limited to warranties of accuracy, availability, currency, completeness, non-infringement, or fitness for a particular purpose. By accessing or using it you acknowledge and agree to all of the foregoing.",
            self.hub_name, self.agency
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationExistence {
    pub location: Location,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedValue {
    pub location: Location,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldComparison {
    pub field: MetadataField,
    pub values: Vec<LocatedValue>,
    pub matched: bool,
}

impl FieldComparison {
    pub fn value_at(&self, location: Location) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|v| v.location == location)
            .map(|v| &v.value)
    }
}

/// One reconciliation output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonRecord {
    pub table_name: String,
    pub existence: Vec<LocationExistence>,
    pub fields: Vec<FieldComparison>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Bool(bool),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Bool(true) => f.write_str("TRUE"),
            Cell::Bool(false) => f.write_str("FALSE"),
            Cell::Text(text) => f.write_str(text),
        }
    }
}

impl ComparisonRecord {
    pub fn exists_at(&self, location: Location) -> Option<bool> {
        self.existence
            .iter()
            .find(|e| e.location == location)
            .map(|e| e.exists)
    }

    pub fn field(&self, field: MetadataField) -> Option<&FieldComparison> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn matched(&self, field: MetadataField) -> Option<bool> {
        self.field(field).map(|f| f.matched)
    }

    /// Column headers: existence per location, then per field one column per
    /// location followed by the verdict column.
    pub fn column_names(locations: &[Location], fields: &[MetadataField]) -> Vec<String> {
        let mut columns = locations
            .iter()
            .map(|l| format!("{} - Exist", l.label()))
            .collect::<Vec<_>>();
        for field in fields {
            for location in locations {
                columns.push(format!("{} - {}", location.label(), field.local_attr()));
            }
            columns.push(format!("{} - Match", field.local_attr()));
        }
        columns
    }

    /// Cells in `column_names` order for the record's own locations and fields.
    pub fn cells(&self) -> Vec<Cell> {
        let mut cells = self
            .existence
            .iter()
            .map(|e| Cell::Bool(e.exists))
            .collect::<Vec<_>>();
        for comparison in &self.fields {
            for existence in &self.existence {
                let text = comparison
                    .value_at(existence.location)
                    .map(|v| v.as_display().to_string())
                    .unwrap_or_default();
                cells.push(Cell::Text(text));
            }
            cells.push(Cell::Bool(comparison.matched));
        }
        cells
    }
}
