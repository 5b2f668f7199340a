//! Which datasets live in the catalog, the local stores and the portal.

use std::collections::BTreeSet;
use std::fmt;

use gcat_catalog::CatalogRow;
use gcat_core::PortalItem;
use gcat_storage::{LocalItemRef, RemoteService};
use serde::Serialize;

pub const NOT_IN_STORE: &str = "Not In Store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presence {
    #[serde(rename = "Both")]
    Both,
    #[serde(rename = "Data Catalog Only")]
    CatalogOnly,
    #[serde(rename = "Data Source Only")]
    SourceOnly,
}

impl Presence {
    pub fn label(self) -> &'static str {
        match self {
            Presence::Both => "Both",
            Presence::CatalogOnly => "Data Catalog Only",
            Presence::SourceOnly => "Data Source Only",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Service,
    Local,
}

impl LocationKind {
    pub fn slug(self) -> &'static str {
        match self {
            LocationKind::Service => "service",
            LocationKind::Local => "local",
        }
    }
}

/// The part of a catalog row the presence tables need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub table_name: String,
    pub remote_id: Option<String>,
}

impl From<&CatalogRow<'_>> for CatalogEntry {
    fn from(row: &CatalogRow<'_>) -> Self {
        Self {
            table_name: row.table_name().to_string(),
            remote_id: row.remote_id().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceRow {
    pub name: String,
    /// Portal item id (service table) or container (local table).
    pub reference: Option<String>,
    pub url: Option<String>,
    pub presence: Presence,
}

impl PresenceRow {
    pub fn header(kind: LocationKind) -> Vec<&'static str> {
        match kind {
            LocationKind::Service => vec!["Title", "Item ID", "Item URL", "Presence"],
            LocationKind::Local => vec!["Table Name", "Container", "Presence"],
        }
    }

    pub fn cells(&self, kind: LocationKind) -> Vec<String> {
        let mut cells = vec![self.name.clone(), self.reference.clone().unwrap_or_default()];
        if kind == LocationKind::Service {
            cells.push(self.url.clone().unwrap_or_default());
        }
        cells.push(self.presence.to_string());
        cells
    }
}

/// Every portal item, then catalog rows whose item id is not on the portal.
pub fn compare_service_items(
    catalog: &[CatalogEntry],
    items: &[PortalItem],
    service: &dyn RemoteService,
) -> Vec<PresenceRow> {
    let catalog_ids = catalog
        .iter()
        .filter_map(|e| e.remote_id.as_deref())
        .collect::<BTreeSet<_>>();
    let portal_ids = items.iter().map(|i| i.id.as_str()).collect::<BTreeSet<_>>();

    let mut rows = items
        .iter()
        .map(|item| PresenceRow {
            name: item.title.clone().unwrap_or_else(|| item.id.clone()),
            reference: Some(item.id.clone()),
            url: Some(service.item_url(&item.id)),
            presence: if catalog_ids.contains(item.id.as_str()) {
                Presence::Both
            } else {
                Presence::SourceOnly
            },
        })
        .collect::<Vec<_>>();

    rows.extend(catalog.iter().filter_map(|entry| {
        let id = entry.remote_id.as_deref()?;
        (!portal_ids.contains(id)).then(|| PresenceRow {
            name: entry.table_name.clone(),
            reference: Some(id.to_string()),
            url: None,
            presence: Presence::CatalogOnly,
        })
    }));
    rows
}

/// Every local item, then catalog rows with no local item.
pub fn compare_local_items(catalog: &[CatalogEntry], items: &[LocalItemRef]) -> Vec<PresenceRow> {
    let catalog_names = catalog
        .iter()
        .map(|e| e.table_name.as_str())
        .collect::<BTreeSet<_>>();
    let local_names = items.iter().map(|i| i.name.as_str()).collect::<BTreeSet<_>>();

    let mut rows = items
        .iter()
        .map(|item| PresenceRow {
            name: item.name.clone(),
            reference: item.container.clone(),
            url: None,
            presence: if catalog_names.contains(item.name.as_str()) {
                Presence::Both
            } else {
                Presence::SourceOnly
            },
        })
        .collect::<Vec<_>>();

    rows.extend(
        catalog
            .iter()
            .filter(|entry| !local_names.contains(entry.table_name.as_str()))
            .map(|entry| PresenceRow {
                name: entry.table_name.clone(),
                reference: Some(NOT_IN_STORE.to_string()),
                url: None,
                presence: Presence::CatalogOnly,
            }),
    );
    rows
}
