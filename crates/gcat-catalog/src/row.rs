use std::path::{Path, PathBuf};

use gcat_core::{
    ItemMetadata, ItemUpdate, Location, MetadataField, MetadataValue, PortalItem, ProjectProfile,
};
use gcat_storage::{LocalStore, RemoteService, ServiceError, StoreError};
use thiserror::Error;
use tracing::debug;

use crate::normalize::normalize_tags;
use crate::{CellValue, ExistenceChecks, InventoryColumns, RawRow};

/// Characters rejected in table names and container names.
pub const FORBIDDEN_CHARACTERS: &str = ":<>\u{2013}/\" |?*'%);(^#@!&-";

pub fn contains_forbidden_character(value: &str) -> bool {
    value.chars().any(|c| FORBIDDEN_CHARACTERS.contains(c))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("local store root {0} does not exist")]
    MissingStoreRoot(PathBuf),
    #[error("row {index}: `{column}` is empty")]
    MissingValue { index: usize, column: String },
    #[error("row {index}: `{column}` contains invalid characters ({value})")]
    InvalidCharacters {
        index: usize,
        column: String,
        value: String,
    },
    #[error("row {index}: `{column}` is not a portal item link ({value})")]
    InvalidRemoteLink {
        index: usize,
        column: String,
        value: String,
    },
    #[error("row {index}: `{column}` ({value}) does not resolve to a portal item")]
    UnresolvedRemoteItem {
        index: usize,
        column: String,
        value: String,
    },
    #[error("row {index}: `{column}` ({value}) does not exist in {store}")]
    LocalItemMissing {
        index: usize,
        column: String,
        value: String,
        store: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// False when `root` is unset or empty; otherwise a fresh listing of the
/// store is searched for an exact name match.
pub fn local_exists(
    store: &dyn LocalStore,
    root: Option<&Path>,
    identifier: &str,
) -> Result<bool, StoreError> {
    let Some(root) = root.filter(|r| !r.as_os_str().is_empty()) else {
        return Ok(false);
    };
    let found = store
        .list_items(root)?
        .iter()
        .any(|item| item.name == identifier);
    debug!(root = %root.display(), identifier, found, "local existence check");
    Ok(found)
}

/// False when no usable identifier is given. Not-found is `Ok(false)`.
pub fn remote_exists(
    service: &dyn RemoteService,
    identifier: Option<&str>,
) -> Result<bool, ServiceError> {
    let Some(identifier) = identifier.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(false);
    };
    let found = service.get_item(identifier)?.is_some();
    debug!(identifier, found, "remote existence check");
    Ok(found)
}

/// Handles and settings shared by every row of one inventory.
#[derive(Clone, Copy)]
pub struct CatalogContext<'a> {
    pub store_root: &'a Path,
    pub local: &'a dyn LocalStore,
    pub remote: &'a dyn RemoteService,
    pub columns: &'a InventoryColumns,
    pub profile: &'a ProjectProfile,
    pub existence_checks: ExistenceChecks,
}

/// Metadata read from one location for one row.
#[derive(Debug, Clone)]
pub struct LocationSnapshot {
    pub location: Location,
    pub exists: bool,
    source: SnapshotSource,
}

#[derive(Debug, Clone)]
enum SnapshotSource {
    Document(Option<ItemMetadata>),
    Portal(Option<PortalItem>),
}

impl LocationSnapshot {
    /// Raw field value; `None` when the dataset is absent or the field unset.
    pub fn field(&self, field: MetadataField) -> Option<MetadataValue> {
        if !self.exists {
            return None;
        }
        match &self.source {
            SnapshotSource::Document(md) => md.as_ref().and_then(|m| m.field(field)),
            SnapshotSource::Portal(item) => item.as_ref().and_then(|i| i.field(field)),
        }
    }

    pub fn document(&self) -> Option<&ItemMetadata> {
        match &self.source {
            SnapshotSource::Document(md) => md.as_ref(),
            SnapshotSource::Portal(_) => None,
        }
    }

    pub fn portal_item(&self) -> Option<&PortalItem> {
        match &self.source {
            SnapshotSource::Portal(item) => item.as_ref(),
            SnapshotSource::Document(_) => None,
        }
    }
}

/// A validated inventory row.
pub struct CatalogRow<'a> {
    raw: RawRow,
    index: usize,
    ctx: CatalogContext<'a>,
    table_name: String,
    store_path: PathBuf,
    remote_id: Option<String>,
}

impl std::fmt::Debug for CatalogRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogRow")
            .field("index", &self.index)
            .field("table_name", &self.table_name)
            .field("store_path", &self.store_path)
            .field("remote_id", &self.remote_id)
            .finish()
    }
}

impl<'a> CatalogRow<'a> {
    /// Validates `raw`. `index` is only used in error messages.
    pub fn new(raw: RawRow, index: usize, ctx: CatalogContext<'a>) -> Result<Self, RowError> {
        if !ctx.store_root.exists() {
            return Err(ValidationError::MissingStoreRoot(ctx.store_root.to_path_buf()).into());
        }
        let columns = ctx.columns;

        let table_name = text_cell(&raw, &columns.table_name)
            .ok_or_else(|| ValidationError::MissingValue {
                index,
                column: columns.table_name.clone(),
            })?
            .to_string();
        check_characters(index, &columns.table_name, &table_name)?;

        let container = text_cell(&raw, &columns.local_container).map(ToString::to_string);
        if let Some(container) = &container {
            check_characters(index, &columns.local_container, container)?;
        }

        let remote_id = match text_cell(&raw, &columns.remote_id) {
            Some(id) => Some(id.to_string()),
            None => match text_cell(&raw, &columns.remote_link) {
                Some(link) => Some(parse_item_link(index, &columns.remote_link, link)?),
                None => None,
            },
        };

        let store_path = match &container {
            Some(c) if c.ends_with(".gdb") => ctx.store_root.join(c),
            Some(c) => ctx.store_root.join(format!("{c}.gdb")),
            None => ctx.store_root.to_path_buf(),
        };

        let row = Self {
            raw,
            index,
            ctx,
            table_name,
            store_path,
            remote_id,
        };

        if ctx.existence_checks == ExistenceChecks::Strict {
            if let Some(id) = &row.remote_id {
                if !row.remote_exists()? {
                    return Err(ValidationError::UnresolvedRemoteItem {
                        index,
                        column: columns.remote_id.clone(),
                        value: id.clone(),
                    }
                    .into());
                }
            }
            if !row.local_exists()? {
                return Err(ValidationError::LocalItemMissing {
                    index,
                    column: columns.table_name.clone(),
                    value: row.table_name.clone(),
                    store: row.store_path.clone(),
                }
                .into());
            }
        }

        Ok(row)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.cell(&self.ctx.columns.provider)
    }

    pub fn webapp_category(&self) -> Option<&str> {
        self.cell(&self.ctx.columns.category)
    }

    pub fn local_exists(&self) -> Result<bool, StoreError> {
        local_exists(self.ctx.local, Some(&self.store_path), &self.table_name)
    }

    pub fn remote_exists(&self) -> Result<bool, ServiceError> {
        remote_exists(self.ctx.remote, self.remote_id.as_deref())
    }

    pub fn fetch_local_metadata(&self) -> Result<Option<ItemMetadata>, StoreError> {
        self.ctx.local.read_metadata(&self.store_path, &self.table_name)
    }

    pub fn fetch_remote_item(&self) -> Result<Option<PortalItem>, ServiceError> {
        match &self.remote_id {
            Some(id) => self.ctx.remote.get_item(id),
            None => Ok(None),
        }
    }

    pub fn write_local_metadata(&self, metadata: &ItemMetadata) -> Result<(), StoreError> {
        self.ctx
            .local
            .write_metadata(&self.store_path, &self.table_name, metadata)
    }

    pub fn update_remote_item(&self, update: &ItemUpdate) -> Result<(), ServiceError> {
        match &self.remote_id {
            Some(id) => self.ctx.remote.update_item(id, update),
            None => Err(ServiceError::ItemNotFound(self.table_name.clone())),
        }
    }

    /// One existence check and one metadata read for `location`.
    pub fn snapshot(&self, location: Location) -> Result<LocationSnapshot, RowError> {
        let snapshot = match location {
            Location::Catalog => LocationSnapshot {
                location,
                exists: true,
                source: SnapshotSource::Document(Some(self.catalog_metadata())),
            },
            Location::Local => {
                let exists = self.local_exists()?;
                let metadata = if exists {
                    self.fetch_local_metadata()?
                } else {
                    None
                };
                LocationSnapshot {
                    location,
                    exists,
                    source: SnapshotSource::Document(metadata),
                }
            }
            Location::Remote => {
                let item = self.fetch_remote_item()?;
                LocationSnapshot {
                    location,
                    exists: item.is_some(),
                    source: SnapshotSource::Portal(item),
                }
            }
        };
        Ok(snapshot)
    }

    /// Title override, then common name, then the table name.
    pub fn title(&self) -> String {
        self.cell(&self.ctx.columns.title)
            .or_else(|| self.cell(&self.ctx.columns.common_name))
            .unwrap_or(self.table_name.as_str())
            .to_string()
    }

    pub fn description(&self) -> Option<String> {
        self.cell(&self.ctx.columns.description).map(ToString::to_string)
    }

    pub fn summary(&self) -> String {
        self.cell(&self.ctx.columns.summary)
            .map(ToString::to_string)
            .unwrap_or_else(|| self.default_summary())
    }

    pub fn default_summary(&self) -> String {
        self.ctx.profile.default_summary(self.webapp_category())
    }

    pub fn credits(&self) -> String {
        self.ctx.profile.credits(self.provider().unwrap_or("Unknown"))
    }

    pub fn access_constraints(&self) -> String {
        self.ctx.profile.access_constraints()
    }

    /// Tags in inventory order, trimmed, empties dropped.
    pub fn tags_list(&self) -> Vec<String> {
        self.cell(&self.ctx.columns.tags)
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tags_string(&self) -> Option<String> {
        self.cell(&self.ctx.columns.tags)
            .and_then(|tags| normalize_tags(Some(&MetadataValue::Text(tags.to_string()))))
    }

    /// Property update for the portal item, keyed description / snippet /
    /// tags / accessInformation / licenseInfo.
    pub fn remote_update(&self) -> ItemUpdate {
        let tags = self.tags_list();
        ItemUpdate {
            description: self.description(),
            snippet: Some(self.summary()),
            tags: (!tags.is_empty()).then_some(tags),
            access_information: Some(self.credits()),
            license_info: Some(self.access_constraints()),
        }
    }

    /// The canonical values the inventory prescribes for this dataset.
    pub fn catalog_metadata(&self) -> ItemMetadata {
        ItemMetadata {
            title: Some(self.title()),
            description: self.description(),
            summary: Some(self.summary()),
            tags: self.tags_string(),
            credits: Some(self.credits()),
            access_constraints: Some(self.access_constraints()),
        }
    }

    fn cell(&self, column: &str) -> Option<&str> {
        text_cell(&self.raw, column)
    }
}

fn text_cell<'r>(raw: &'r RawRow, column: &str) -> Option<&'r str> {
    raw.get(column).and_then(CellValue::as_text)
}

fn check_characters(index: usize, column: &str, value: &str) -> Result<(), ValidationError> {
    if contains_forbidden_character(value) {
        return Err(ValidationError::InvalidCharacters {
            index,
            column: column.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_item_link(index: usize, column: &str, link: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidRemoteLink {
        index,
        column: column.to_string(),
        value: link.to_string(),
    };
    if !link.starts_with("http") {
        return Err(invalid());
    }
    let (_, after) = link.split_once('=').ok_or_else(invalid)?;
    let id = after.split('#').next().unwrap_or_default().trim();
    if id.is_empty() {
        return Err(invalid());
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcat_storage::{FsGeodatabase, InMemoryPortal};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: FsGeodatabase,
        portal: InMemoryPortal,
        columns: InventoryColumns,
        profile: ProjectProfile,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().expect("tempdir");
            let root = dir.path().join("stores");
            let store = FsGeodatabase::new();
            store
                .create_item(&root.join("Transport.gdb"), None, "Roads", &ItemMetadata::default())
                .unwrap();
            store
                .create_item(&root, None, "FloodZone", &ItemMetadata::default())
                .unwrap();
            let portal = InMemoryPortal::new("https://portal.example.com");
            portal.insert(PortalItem {
                id: "abc123".into(),
                ..Default::default()
            });
            Self {
                _dir: dir,
                root,
                store,
                portal,
                columns: InventoryColumns::default(),
                profile: ProjectProfile::default(),
            }
        }

        fn ctx(&self, existence_checks: ExistenceChecks) -> CatalogContext<'_> {
            CatalogContext {
                store_root: &self.root,
                local: &self.store,
                remote: &self.portal,
                columns: &self.columns,
                profile: &self.profile,
                existence_checks,
            }
        }
    }

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::from_csv(v)))
            .collect()
    }

    #[test]
    fn forbidden_characters_reject_identifier() {
        let fx = Fixture::new();
        let err = CatalogRow::new(raw(&[("Table Name", "Flood:Zone")]), 2, fx.ctx(ExistenceChecks::Strict))
            .unwrap_err();
        assert!(matches!(
            err,
            RowError::Validation(ValidationError::InvalidCharacters { index: 2, .. })
        ));

        let row = CatalogRow::new(raw(&[("Table Name", "FloodZone")]), 3, fx.ctx(ExistenceChecks::Strict))
            .expect("valid row");
        assert_eq!(row.store_path(), fx.root.as_path());
        assert!(contains_forbidden_character("Flood Zone"));
        assert!(contains_forbidden_character("Flood\u{2013}Zone"));
        assert!(!contains_forbidden_character("Flood_Zone"));
    }

    #[test]
    fn missing_identifier_and_missing_root_fail() {
        let fx = Fixture::new();
        let err = CatalogRow::new(raw(&[("Table Name", " ")]), 4, fx.ctx(ExistenceChecks::Strict))
            .unwrap_err();
        assert!(matches!(err, RowError::Validation(ValidationError::MissingValue { .. })));

        let missing = fx.root.join("nowhere");
        let ctx = CatalogContext {
            store_root: &missing,
            ..fx.ctx(ExistenceChecks::Deferred)
        };
        let err = CatalogRow::new(raw(&[("Table Name", "Roads")]), 5, ctx).unwrap_err();
        assert!(matches!(err, RowError::Validation(ValidationError::MissingStoreRoot(_))));
    }

    #[test]
    fn item_id_is_parsed_from_link() {
        let fx = Fixture::new();
        let row = CatalogRow::new(
            raw(&[
                ("Table Name", "Roads"),
                ("Local Container", "Transport"),
                ("AGOL Link", "https://portal.example.com/home/item.html?id=abc123#overview"),
            ]),
            2,
            fx.ctx(ExistenceChecks::Strict),
        )
        .expect("valid row");
        assert_eq!(row.remote_id(), Some("abc123"));
        assert_eq!(row.store_path(), fx.root.join("Transport.gdb").as_path());

        let err = CatalogRow::new(
            raw(&[("Table Name", "Roads"), ("AGOL Link", "portal/item/abc123")]),
            3,
            fx.ctx(ExistenceChecks::Deferred),
        )
        .unwrap_err();
        assert!(matches!(err, RowError::Validation(ValidationError::InvalidRemoteLink { .. })));
    }

    #[test]
    fn strict_checks_fail_at_construction_and_deferred_checks_do_not() {
        let fx = Fixture::new();
        let ghost = raw(&[("Table Name", "Ghost"), ("AGOL Item ID", "zzz999")]);

        let err = CatalogRow::new(ghost.clone(), 6, fx.ctx(ExistenceChecks::Strict)).unwrap_err();
        assert!(matches!(
            err,
            RowError::Validation(ValidationError::UnresolvedRemoteItem { .. })
        ));

        let row = CatalogRow::new(ghost, 6, fx.ctx(ExistenceChecks::Deferred)).expect("deferred");
        assert!(!row.local_exists().unwrap());
        assert!(!row.remote_exists().unwrap());
        assert!(!row.snapshot(Location::Remote).unwrap().exists);
    }

    #[test]
    fn resolver_treats_placeholders_as_absent() {
        let fx = Fixture::new();
        assert!(!remote_exists(&fx.portal, CellValue::Number(f64::NAN).as_text()).unwrap());
        assert!(!remote_exists(&fx.portal, Some("  ")).unwrap());
        assert!(remote_exists(&fx.portal, Some("abc123")).unwrap());
        assert!(!local_exists(&fx.store, None, "Roads").unwrap());
        assert!(!local_exists(&fx.store, Some(Path::new("")), "Roads").unwrap());
        assert!(local_exists(&fx.store, Some(&fx.root.join("Transport.gdb")), "Roads").unwrap());
    }

    #[test]
    fn formatters_fill_defaults_from_profile() {
        let fx = Fixture::new();
        let row = CatalogRow::new(
            raw(&[
                ("Table Name", "Roads"),
                ("Local Container", "Transport"),
                ("AGOL Item ID", "abc123"),
                ("Provider", "County GIS"),
                ("Web App Category", "Transportation"),
                ("Tags", "Transportation, Major"),
                ("Common Name", "Major Roads"),
            ]),
            2,
            fx.ctx(ExistenceChecks::Strict),
        )
        .expect("valid row");

        assert_eq!(row.title(), "Major Roads");
        assert_eq!(row.tags_list(), vec!["Transportation", "Major"]);
        assert_eq!(row.tags_string().as_deref(), Some("Major,Transportation"));
        assert!(row.summary().contains("Transportation web app"));
        assert_eq!(row.description(), None);

        let update = row.remote_update();
        assert_eq!(update.description, None);
        assert_eq!(update.tags, Some(vec!["Transportation".into(), "Major".into()]));
        assert_eq!(
            update.access_information.as_deref(),
            Some("Data Created by Cascadia Project Team - Data Source: County GIS")
        );
        assert!(update
            .license_info
            .as_deref()
            .unwrap_or_default()
            .contains("Cascadia High-Speed Rail and I-5 Program Hub"));

        let catalog = row.snapshot(Location::Catalog).unwrap();
        assert_eq!(
            catalog.field(MetadataField::Tags),
            Some(MetadataValue::Text("Major,Transportation".into()))
        );
        assert_eq!(catalog.field(MetadataField::Description), None);
    }
}
