//! Pushes a row's canonical metadata to the local store and the portal.

use gcat_catalog::CatalogRow;
use gcat_core::{ItemUpdate, Location, MetadataField, MetadataValue};
use gcat_storage::{ServiceError, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl WriteFailure {
    fn is_connection_error(&self) -> bool {
        matches!(self, WriteFailure::Service(err) if err.is_connection_error())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    Written,
    DryRun,
    /// The dataset does not exist at the location.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub location: Location,
    pub status: WriteStatus,
    /// Attribute names written (or that would be written in a dry run).
    pub attributes: Vec<String>,
    pub error: Option<String>,
}

impl TargetOutcome {
    fn skipped(location: Location) -> Self {
        Self {
            location,
            status: WriteStatus::Skipped,
            attributes: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub table_name: String,
    pub targets: Vec<TargetOutcome>,
}

impl WriteOutcome {
    pub fn status_at(&self, location: Location) -> Option<WriteStatus> {
        self.targets
            .iter()
            .find(|t| t.location == location)
            .map(|t| t.status)
    }

    pub fn has_failures(&self) -> bool {
        self.targets.iter().any(|t| t.status == WriteStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataWriter {
    dry_run: bool,
}

impl MetadataWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Local then remote, each attempted regardless of the other. Per-location
    /// failures land in the outcome; only a rejected portal connection is
    /// returned as an error.
    pub fn write_row(&self, row: &CatalogRow<'_>) -> Result<WriteOutcome, WriteFailure> {
        let mut targets = Vec::with_capacity(2);
        for location in [Location::Local, Location::Remote] {
            let outcome = match self.write_location(row, location) {
                Ok(outcome) => outcome,
                Err(err) if err.is_connection_error() => return Err(err),
                Err(err) => {
                    warn!(
                        table = row.table_name(),
                        location = %location,
                        error = %err,
                        "metadata write failed"
                    );
                    TargetOutcome {
                        location,
                        status: WriteStatus::Failed,
                        attributes: Vec::new(),
                        error: Some(err.to_string()),
                    }
                }
            };
            targets.push(outcome);
        }
        Ok(WriteOutcome {
            table_name: row.table_name().to_string(),
            targets,
        })
    }

    fn write_location(
        &self,
        row: &CatalogRow<'_>,
        location: Location,
    ) -> Result<TargetOutcome, WriteFailure> {
        match location {
            Location::Local => self.write_local(row),
            Location::Remote => self.write_remote(row),
            Location::Catalog => Ok(TargetOutcome::skipped(location)),
        }
    }

    fn write_local(&self, row: &CatalogRow<'_>) -> Result<TargetOutcome, WriteFailure> {
        if !row.local_exists()? {
            return Ok(TargetOutcome::skipped(Location::Local));
        }
        let canonical = row.catalog_metadata();
        let mut metadata = row.fetch_local_metadata()?.unwrap_or_default();
        let mut attributes = Vec::new();
        for field in MetadataField::ALL {
            if let Some(MetadataValue::Text(value)) = canonical.field(field) {
                metadata.set_field(field, value);
                attributes.push(field.local_attr().to_string());
            }
        }

        let status = if self.dry_run {
            info!(table = row.table_name(), ?attributes, "dry run: local metadata not written");
            WriteStatus::DryRun
        } else {
            row.write_local_metadata(&metadata)?;
            info!(table = row.table_name(), store = %row.store_path().display(), "local metadata written");
            WriteStatus::Written
        };
        Ok(TargetOutcome {
            location: Location::Local,
            status,
            attributes,
            error: None,
        })
    }

    fn write_remote(&self, row: &CatalogRow<'_>) -> Result<TargetOutcome, WriteFailure> {
        if !row.remote_exists()? {
            return Ok(TargetOutcome::skipped(Location::Remote));
        }
        let update = row.remote_update();
        let attributes = update_attributes(&update);

        let status = if self.dry_run {
            info!(table = row.table_name(), ?attributes, "dry run: portal item not updated");
            WriteStatus::DryRun
        } else {
            row.update_remote_item(&update)?;
            info!(table = row.table_name(), item_id = row.remote_id(), "portal item updated");
            WriteStatus::Written
        };
        Ok(TargetOutcome {
            location: Location::Remote,
            status,
            attributes,
            error: None,
        })
    }
}

fn update_attributes(update: &ItemUpdate) -> Vec<String> {
    [
        ("description", update.description.is_some()),
        ("snippet", update.snippet.is_some()),
        ("tags", update.tags.is_some()),
        ("accessInformation", update.access_information.is_some()),
        ("licenseInfo", update.license_info.is_some()),
    ]
    .into_iter()
    .filter(|(_, set)| *set)
    .map(|(name, _)| name.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use gcat_catalog::{
        CatalogContext, CellValue, ExistenceChecks, InventoryColumns, RawRow, RowError,
    };
    use gcat_core::{ItemMetadata, PortalItem, ProjectProfile};
    use gcat_storage::{FsGeodatabase, InMemoryPortal, LocalItemRef, LocalStore, RemoteService};
    use tempfile::tempdir;

    /// Filesystem store that refuses every write.
    struct ReadOnlyStore(FsGeodatabase);

    impl LocalStore for ReadOnlyStore {
        fn list_items(&self, root: &Path) -> Result<Vec<LocalItemRef>, StoreError> {
            self.0.list_items(root)
        }

        fn read_metadata(&self, root: &Path, item: &str) -> Result<Option<ItemMetadata>, StoreError> {
            self.0.read_metadata(root, item)
        }

        fn write_metadata(
            &self,
            root: &Path,
            item: &str,
            _metadata: &ItemMetadata,
        ) -> Result<(), StoreError> {
            Err(StoreError::Other(anyhow::anyhow!(
                "{} is read-only, cannot write {item}",
                root.display()
            )))
        }

        fn list_stores(&self, directory: &Path) -> Result<Vec<PathBuf>, StoreError> {
            self.0.list_stores(directory)
        }
    }

    /// Portal whose token has expired.
    struct ExpiredTokenPortal;

    impl ExpiredTokenPortal {
        fn rejected() -> ServiceError {
            ServiceError::InvalidConnection("invalid token".into())
        }
    }

    impl RemoteService for ExpiredTokenPortal {
        fn get_item(&self, _item_id: &str) -> Result<Option<PortalItem>, ServiceError> {
            Err(Self::rejected())
        }

        fn update_item(&self, _item_id: &str, _update: &ItemUpdate) -> Result<(), ServiceError> {
            Err(Self::rejected())
        }

        fn search_items(&self) -> Result<Vec<PortalItem>, ServiceError> {
            Err(Self::rejected())
        }

        fn item_url(&self, item_id: &str) -> String {
            format!("https://portal.example.com/home/item.html?id={item_id}")
        }
    }

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::from_csv(v)))
            .collect()
    }

    #[test]
    fn writes_only_set_values_and_isolates_failures() {
        let dir = tempdir().expect("tempdir");
        let store = FsGeodatabase::new();
        let existing = ItemMetadata {
            description: Some("Hand-written description".into()),
            ..Default::default()
        };
        store.create_item(dir.path(), None, "Roads", &existing).unwrap();

        let portal = InMemoryPortal::new("https://portal.example.com");
        portal.insert(PortalItem {
            id: "abc123".into(),
            ..Default::default()
        });
        portal.reject_updates_for("abc123");

        let columns = InventoryColumns::default();
        let profile = ProjectProfile::default();
        let ctx = CatalogContext {
            store_root: dir.path(),
            local: &store,
            remote: &portal,
            columns: &columns,
            profile: &profile,
            existence_checks: ExistenceChecks::Strict,
        };
        let row = CatalogRow::new(
            raw(&[("Table Name", "Roads"), ("AGOL Item ID", "abc123"), ("Tags", "b, a")]),
            2,
            ctx,
        )
        .expect("row");

        let outcome = MetadataWriter::new().write_row(&row).expect("no connection failure");
        assert_eq!(outcome.status_at(Location::Local), Some(WriteStatus::Written));
        assert_eq!(outcome.status_at(Location::Remote), Some(WriteStatus::Failed));
        assert!(outcome.has_failures());

        let written = store.read_metadata(dir.path(), "Roads").unwrap().expect("item");
        assert_eq!(written.description.as_deref(), Some("Hand-written description"));
        assert_eq!(written.tags.as_deref(), Some("a,b"));
        assert_eq!(written.title.as_deref(), Some("Roads"));
        assert!(written.credits.unwrap_or_default().contains("Data Source: Unknown"));
    }

    #[test]
    fn dry_run_leaves_backends_untouched() {
        let dir = tempdir().expect("tempdir");
        let store = FsGeodatabase::new();
        store
            .create_item(dir.path(), None, "Roads", &ItemMetadata::default())
            .unwrap();
        let portal = InMemoryPortal::new("https://portal.example.com");
        portal.insert(PortalItem {
            id: "abc123".into(),
            ..Default::default()
        });

        let columns = InventoryColumns::default();
        let profile = ProjectProfile::default();
        let ctx = CatalogContext {
            store_root: dir.path(),
            local: &store,
            remote: &portal,
            columns: &columns,
            profile: &profile,
            existence_checks: ExistenceChecks::Strict,
        };
        let row = CatalogRow::new(
            raw(&[("Table Name", "Roads"), ("AGOL Item ID", "abc123"), ("Metadata - Description", "Roads layer")]),
            2,
            ctx,
        )
        .expect("row");

        let outcome = MetadataWriter::new().dry_run(true).write_row(&row).unwrap();
        assert_eq!(outcome.status_at(Location::Local), Some(WriteStatus::DryRun));
        assert_eq!(outcome.status_at(Location::Remote), Some(WriteStatus::DryRun));
        assert!(outcome.targets[1].attributes.contains(&"description".to_string()));

        assert_eq!(
            store.read_metadata(dir.path(), "Roads").unwrap(),
            Some(ItemMetadata::default())
        );
        assert_eq!(portal.get_item("abc123").unwrap().unwrap().description, None);
    }

    #[test]
    fn absent_locations_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let store = FsGeodatabase::new();
        let portal = InMemoryPortal::new("https://portal.example.com");
        let columns = InventoryColumns::default();
        let profile = ProjectProfile::default();
        let ctx = CatalogContext {
            store_root: dir.path(),
            local: &store,
            remote: &portal,
            columns: &columns,
            profile: &profile,
            existence_checks: ExistenceChecks::Deferred,
        };
        let row = CatalogRow::new(raw(&[("Table Name", "Ghost")]), 2, ctx).expect("row");

        let outcome = MetadataWriter::new().write_row(&row).unwrap();
        assert_eq!(outcome.status_at(Location::Local), Some(WriteStatus::Skipped));
        assert_eq!(outcome.status_at(Location::Remote), Some(WriteStatus::Skipped));
        assert!(!outcome.has_failures());
    }

    #[test]
    fn failed_local_write_still_updates_portal() {
        let dir = tempdir().expect("tempdir");
        FsGeodatabase::new()
            .create_item(dir.path(), None, "Roads", &ItemMetadata::default())
            .unwrap();
        let store = ReadOnlyStore(FsGeodatabase::new());
        let portal = InMemoryPortal::new("https://portal.example.com");
        portal.insert(PortalItem {
            id: "abc123".into(),
            ..Default::default()
        });

        let columns = InventoryColumns::default();
        let profile = ProjectProfile::default();
        let ctx = CatalogContext {
            store_root: dir.path(),
            local: &store,
            remote: &portal,
            columns: &columns,
            profile: &profile,
            existence_checks: ExistenceChecks::Strict,
        };
        let row = CatalogRow::new(
            raw(&[("Table Name", "Roads"), ("AGOL Item ID", "abc123"), ("Provider", "County GIS")]),
            2,
            ctx,
        )
        .expect("row");

        let outcome = MetadataWriter::new().write_row(&row).expect("no connection failure");
        assert_eq!(outcome.status_at(Location::Local), Some(WriteStatus::Failed));
        assert!(outcome.targets[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("read-only"));
        assert_eq!(outcome.status_at(Location::Remote), Some(WriteStatus::Written));

        let item = portal.get_item("abc123").unwrap().expect("item");
        assert!(item.snippet.is_some());
        assert_eq!(
            item.access_information.as_deref(),
            Some("Data Created by Cascadia Project Team - Data Source: County GIS")
        );
        assert_eq!(
            FsGeodatabase::new().read_metadata(dir.path(), "Roads").unwrap(),
            Some(ItemMetadata::default())
        );
    }

    #[test]
    fn rejected_portal_connection_aborts_the_row() {
        let dir = tempdir().expect("tempdir");
        let store = FsGeodatabase::new();
        store
            .create_item(dir.path(), None, "Roads", &ItemMetadata::default())
            .unwrap();
        let portal = ExpiredTokenPortal;
        let columns = InventoryColumns::default();
        let profile = ProjectProfile::default();
        let ctx = |existence_checks| CatalogContext {
            store_root: dir.path(),
            local: &store,
            remote: &portal,
            columns: &columns,
            profile: &profile,
            existence_checks,
        };
        let cells = [("Table Name", "Roads"), ("AGOL Item ID", "abc123")];

        match CatalogRow::new(raw(&cells), 2, ctx(ExistenceChecks::Strict)) {
            Err(RowError::Service(err)) => assert!(err.is_connection_error()),
            other => panic!("expected a connection failure, got {other:?}"),
        }

        let row = CatalogRow::new(raw(&cells), 2, ctx(ExistenceChecks::Deferred)).expect("row");
        assert!(matches!(
            row.remote_exists(),
            Err(ServiceError::InvalidConnection(_))
        ));
        match MetadataWriter::new().write_row(&row) {
            Err(WriteFailure::Service(err)) => assert!(err.is_connection_error()),
            other => panic!("expected the write to abort, got {other:?}"),
        }
    }
}
