//! Point-in-time copies of local and portal metadata.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gcat_catalog::{CatalogRow, RowError};
use gcat_core::{ItemMetadata, Location, PortalItem};
use gcat_storage::{BackupStore, StoredBackup};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const BACKUP_LABEL: &str = "metadata-backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBackupEntry {
    pub table_name: String,
    pub remote_id: Option<String>,
    pub local: Option<ItemMetadata>,
    pub remote: Option<PortalItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBackup {
    pub run_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub entries: Vec<MetadataBackupEntry>,
}

impl MetadataBackup {
    pub fn new(run_id: Uuid, captured_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            captured_at,
            entries: Vec::new(),
        }
    }

    pub fn capture(&mut self, row: &CatalogRow<'_>) -> Result<(), RowError> {
        let local = row.snapshot(Location::Local)?.document().cloned();
        let remote = row.snapshot(Location::Remote)?.portal_item().cloned();
        self.entries.push(MetadataBackupEntry {
            table_name: row.table_name().to_string(),
            remote_id: row.remote_id().map(ToString::to_string),
            local,
            remote,
        });
        Ok(())
    }

    /// Writes the backup as one JSON document. Identical contents share a path.
    pub fn store(&self, backups: &BackupStore) -> Result<StoredBackup> {
        let bytes = serde_json::to_vec_pretty(&self.entries).context("serializing metadata backup")?;
        let stored = backups.put_document(self.captured_at, BACKUP_LABEL, &bytes)?;
        info!(
            run_id = %self.run_id,
            entries = self.entries.len(),
            path = %stored.path.display(),
            reused = stored.reused,
            "metadata backup stored"
        );
        Ok(stored)
    }
}
