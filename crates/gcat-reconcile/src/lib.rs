//! Reconciliation pipeline: metadata comparison, storage-location presence,
//! metadata synchronization and metadata backups.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gcat_catalog::{
    load_inventory, CatalogContext, CatalogRow, ExistenceChecks, InventoryColumns, RawRow,
    RowError, RowFilter, ValidationError,
};
use gcat_core::{MetadataField, ProjectProfile, TextMode};
use gcat_storage::{
    BackupStore, FsGeodatabase, InMemoryPortal, LocalItemRef, LocalStore, PortalClient,
    PortalClientConfig, RemoteService,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};
use uuid::Uuid;

mod backup;
mod engine;
mod locations;
mod report;
mod writer;

pub use backup::{MetadataBackup, MetadataBackupEntry, BACKUP_LABEL};
pub use engine::{verdict, ComparisonTable, ReconcileEngine, VerdictPolicy, INDEX_COLUMN};
pub use locations::{
    compare_local_items, compare_service_items, CatalogEntry, LocationKind, Presence, PresenceRow,
    NOT_IN_STORE,
};
pub use report::{
    summary_markdown, ReportManifest, ReportManifestFile, ReportWriter, COMPARE_CSV, COMPARE_JSON,
    COMPARE_PARQUET, MANIFEST_JSON, SUMMARY_MD, WRITE_OUTCOMES_JSON,
};
pub use writer::{MetadataWriter, TargetOutcome, WriteFailure, WriteOutcome, WriteStatus};

/// What happens to an inventory row that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    #[default]
    Abort,
    Skip,
}

impl FromStr for InvalidRowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(InvalidRowPolicy::Abort),
            "skip" => Ok(InvalidRowPolicy::Skip),
            other => Err(format!("unknown invalid-row policy `{other}` (expected abort or skip)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub store_root: PathBuf,
    pub inventory_path: PathBuf,
    pub profile_path: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub portal_url: String,
    pub portal_token: Option<String>,
    /// Offline portal contents; replaces the HTTP client when set.
    pub portal_snapshot: Option<PathBuf>,
    pub text_mode: TextMode,
    pub existence_checks: ExistenceChecks,
    pub on_invalid_row: InvalidRowPolicy,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        Self {
            store_root: path("GCAT_STORE_ROOT").unwrap_or_else(|| PathBuf::from(".")),
            inventory_path: path("GCAT_INVENTORY")
                .unwrap_or_else(|| PathBuf::from("inventory.csv")),
            profile_path: path("GCAT_PROFILE"),
            reports_dir: path("GCAT_REPORTS_DIR").unwrap_or_else(|| PathBuf::from("./reports")),
            backups_dir: path("GCAT_BACKUPS_DIR").unwrap_or_else(|| PathBuf::from("./backups")),
            portal_url: lookup("GCAT_PORTAL_URL")
                .unwrap_or_else(|| "https://www.arcgis.com".to_string()),
            portal_token: lookup("GCAT_PORTAL_TOKEN").filter(|v| !v.is_empty()),
            portal_snapshot: path("GCAT_PORTAL_SNAPSHOT"),
            text_mode: lookup("GCAT_TEXT_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            existence_checks: lookup("GCAT_EXISTENCE_CHECKS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            on_invalid_row: lookup("GCAT_ON_INVALID_ROW")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            http_timeout_secs: lookup("GCAT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: lookup("GCAT_USER_AGENT").unwrap_or_else(|| "gcat/0.1".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareSettings {
    /// Compare against the catalog's own canonical values as well.
    pub include_catalog: bool,
    /// Tracked fields; every field when unset.
    pub fields: Option<Vec<MetadataField>>,
    pub all_absent_is_match: bool,
}

impl Default for CompareSettings {
    fn default() -> Self {
        Self {
            include_catalog: false,
            fields: None,
            all_absent_is_match: true,
        }
    }
}

/// Program profile loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDocument {
    pub project: ProjectProfile,
    pub columns: InventoryColumns,
    pub filter: RowFilter,
    pub compare: CompareSettings,
}

impl ProfileDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing profile yaml")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_processed: usize,
    pub skipped: Vec<SkippedRow>,
    pub write_failures: usize,
    pub reports_dir: Option<String>,
    pub artifacts: Vec<String>,
}

struct BuiltRows<'a> {
    rows: Vec<CatalogRow<'a>>,
    read: usize,
    skipped: Vec<SkippedRow>,
}

pub struct ReconcilePipeline {
    config: ReconcileConfig,
    profile: ProfileDocument,
    local: Box<dyn LocalStore>,
    remote: Box<dyn RemoteService>,
    reports: ReportWriter,
    backups: BackupStore,
}

impl ReconcilePipeline {
    pub fn new(
        config: ReconcileConfig,
        profile: ProfileDocument,
        local: Box<dyn LocalStore>,
        remote: Box<dyn RemoteService>,
    ) -> Self {
        let reports = ReportWriter::new(config.reports_dir.clone());
        let backups = BackupStore::new(config.backups_dir.clone());
        Self {
            config,
            profile,
            local,
            remote,
            reports,
            backups,
        }
    }

    /// Filesystem stores plus the HTTP portal, or the snapshot portal when
    /// `portal_snapshot` is set.
    pub fn from_config(config: ReconcileConfig) -> Result<Self> {
        let profile = match &config.profile_path {
            Some(path) => ProfileDocument::load(path)?,
            None => ProfileDocument::default(),
        };
        let remote: Box<dyn RemoteService> = match &config.portal_snapshot {
            Some(path) => Box::new(InMemoryPortal::load(path)?),
            None => Box::new(PortalClient::new(PortalClientConfig {
                portal_url: config.portal_url.clone(),
                token: config.portal_token.clone(),
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })?),
        };
        Ok(Self::new(config, profile, Box::new(FsGeodatabase::new()), remote))
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn profile(&self) -> &ProfileDocument {
        &self.profile
    }

    pub fn engine(&self) -> ReconcileEngine {
        let settings = &self.profile.compare;
        let mut engine = ReconcileEngine::new()
            .with_policy(VerdictPolicy {
                all_absent_is_match: settings.all_absent_is_match,
            })
            .with_text_mode(self.config.text_mode);
        if let Some(fields) = &settings.fields {
            engine = engine.with_fields(fields.clone());
        }
        if settings.include_catalog {
            engine = engine.with_catalog();
        }
        engine
    }

    fn context(&self, existence_checks: ExistenceChecks) -> CatalogContext<'_> {
        CatalogContext {
            store_root: &self.config.store_root,
            local: self.local.as_ref(),
            remote: self.remote.as_ref(),
            columns: &self.profile.columns,
            profile: &self.profile.project,
            existence_checks,
        }
    }

    /// Inventory rows passing the profile filter, tagged with their
    /// spreadsheet row number (header is row 1).
    fn inventory_rows(&self) -> Result<Vec<(usize, RawRow)>> {
        let rows = load_inventory(&self.config.inventory_path)?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(position, row)| (position + 2, row))
            .filter(|(_, row)| self.profile.filter.accepts(row, &self.profile.columns))
            .collect())
    }

    fn build_rows(&self, existence_checks: ExistenceChecks) -> Result<BuiltRows<'_>> {
        if !self.config.store_root.exists() {
            return Err(ValidationError::MissingStoreRoot(self.config.store_root.clone()).into());
        }
        let ctx = self.context(existence_checks);
        let raw_rows = self.inventory_rows()?;
        let read = raw_rows.len();

        let mut rows = Vec::with_capacity(read);
        let mut skipped = Vec::new();
        for (index, raw) in raw_rows {
            match CatalogRow::new(raw, index, ctx) {
                Ok(row) => rows.push(row),
                Err(RowError::Validation(err))
                    if self.config.on_invalid_row == InvalidRowPolicy::Skip =>
                {
                    warn!(index, error = %err, "skipping invalid inventory row");
                    skipped.push(SkippedRow {
                        index,
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    return Err(
                        anyhow::Error::new(err).context(format!("building inventory row {index}"))
                    )
                }
            }
        }
        Ok(BuiltRows {
            rows,
            read,
            skipped,
        })
    }

    fn summary(
        &self,
        run_id: Uuid,
        command: &str,
        started_at: DateTime<Utc>,
        built: &BuiltRows<'_>,
    ) -> RunSummary {
        RunSummary {
            run_id,
            command: command.to_string(),
            started_at,
            finished_at: Utc::now(),
            rows_read: built.read,
            rows_processed: built.rows.len(),
            skipped: built.skipped.clone(),
            write_failures: 0,
            reports_dir: Some(self.reports.run_dir(run_id).display().to_string()),
            artifacts: Vec::new(),
        }
    }

    pub fn compare_metadata(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("compare_metadata", run_id = %run_id);
        let _guard = span.enter();

        let built = self.build_rows(self.config.existence_checks)?;
        let engine = self.engine();
        let mut table = ComparisonTable::for_engine(&engine);
        for row in &built.rows {
            let record = engine
                .compare_row(row)
                .with_context(|| format!("comparing {}", row.table_name()))?;
            table.insert(record);
        }

        self.reports.write_comparison(run_id, &table)?;
        let summary = self.summary(run_id, "compare-metadata", started_at, &built);
        self.reports.write_summary(&summary, Some(&table))?;
        info!(rows = table.len(), skipped = summary.skipped.len(), "metadata comparison complete");
        Ok(summary)
    }

    pub fn compare_locations(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("compare_locations", run_id = %run_id);
        let _guard = span.enter();

        let built = self.build_rows(ExistenceChecks::Deferred)?;
        let catalog = built.rows.iter().map(CatalogEntry::from).collect::<Vec<_>>();
        let portal_items = self.remote.search_items().context("listing portal items")?;
        let local_items = self.local_items()?;

        let service_rows = compare_service_items(&catalog, &portal_items, self.remote.as_ref());
        let local_rows = compare_local_items(&catalog, &local_items);

        let mut summary = self.summary(run_id, "compare-locations", started_at, &built);
        for (kind, rows) in [
            (LocationKind::Service, &service_rows),
            (LocationKind::Local, &local_rows),
        ] {
            let path = self.reports.write_presence(run_id, kind, rows)?;
            summary.artifacts.push(path.display().to_string());
        }
        self.reports.write_summary(&summary, None)?;
        info!(
            service_rows = service_rows.len(),
            local_rows = local_rows.len(),
            "storage location comparison complete"
        );
        Ok(summary)
    }

    /// Items at the store root plus the top level of every store under it.
    fn local_items(&self) -> Result<Vec<LocalItemRef>> {
        let root = &self.config.store_root;
        let mut items = self
            .local
            .list_items(root)
            .with_context(|| format!("listing items in {}", root.display()))?
            .into_iter()
            .collect::<BTreeSet<_>>();
        for store in self.local.list_stores(root)? {
            let container = store
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
            for item in self.local.list_items(&store)? {
                items.insert(LocalItemRef {
                    name: item.name,
                    container: item.container.or_else(|| container.clone()),
                });
            }
        }
        Ok(items.into_iter().collect())
    }

    pub fn update_metadata(&self, dry_run: bool) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("update_metadata", run_id = %run_id, dry_run);
        let _guard = span.enter();

        let built = self.build_rows(self.config.existence_checks)?;
        let writer = MetadataWriter::new().dry_run(dry_run);
        let mut outcomes = Vec::with_capacity(built.rows.len());
        for row in &built.rows {
            let outcome = writer
                .write_row(row)
                .with_context(|| format!("writing metadata for {}", row.table_name()))?;
            outcomes.push(outcome);
        }

        let mut summary = self.summary(run_id, "update-metadata", started_at, &built);
        summary.write_failures = outcomes.iter().filter(|o| o.has_failures()).count();
        let path = self.reports.write_outcomes(run_id, &outcomes)?;
        summary.artifacts.push(path.display().to_string());
        self.reports.write_summary(&summary, None)?;
        if summary.write_failures > 0 {
            warn!(failures = summary.write_failures, "metadata update finished with failures");
        } else {
            info!(rows = outcomes.len(), "metadata update complete");
        }
        Ok(summary)
    }

    pub fn backup_metadata(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("backup_metadata", run_id = %run_id);
        let _guard = span.enter();

        let built = self.build_rows(ExistenceChecks::Deferred)?;
        let mut backup = MetadataBackup::new(run_id, started_at);
        for row in &built.rows {
            backup
                .capture(row)
                .with_context(|| format!("backing up {}", row.table_name()))?;
        }
        let stored = backup.store(&self.backups)?;

        let mut summary = self.summary(run_id, "backup-metadata", started_at, &built);
        summary.artifacts.push(stored.path.display().to_string());
        self.reports.write_summary(&summary, None)?;
        Ok(summary)
    }
}
