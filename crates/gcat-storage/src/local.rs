//! Local geodatabase-style stores.
//!
//! Every call takes the store root explicitly; there is no ambient
//! "current workspace".

use std::fs;
use std::path::{Path, PathBuf};

use gcat_core::ItemMetadata;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const ITEM_SUFFIX: &str = ".item.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid metadata document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("item `{item}` not found in {root}")]
    ItemNotFound { root: PathBuf, item: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Addressable item inside a store, optionally nested in a sub-container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalItemRef {
    pub name: String,
    pub container: Option<String>,
}

pub trait LocalStore {
    /// Every item at the root plus items one level inside sub-containers.
    /// A root that does not exist has no items.
    fn list_items(&self, root: &Path) -> Result<Vec<LocalItemRef>, StoreError>;

    fn read_metadata(&self, root: &Path, item: &str) -> Result<Option<ItemMetadata>, StoreError>;

    fn write_metadata(
        &self,
        root: &Path,
        item: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), StoreError>;

    /// Store roots directly under `directory`, sorted by path.
    fn list_stores(&self, directory: &Path) -> Result<Vec<PathBuf>, StoreError>;
}

/// Directory-backed store. A store is a `*.gdb` directory, each item a
/// `<name>.item.json` metadata document, sub-containers are plain directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsGeodatabase;

impl FsGeodatabase {
    pub fn new() -> Self {
        Self
    }

    /// Create an empty item; used by fixtures and tests.
    pub fn create_item(
        &self,
        root: &Path,
        container: Option<&str>,
        item: &str,
        metadata: &ItemMetadata,
    ) -> Result<PathBuf, StoreError> {
        let dir = match container {
            Some(c) => root.join(c),
            None => root.to_path_buf(),
        };
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{item}{ITEM_SUFFIX}"));
        write_document(&path, metadata)?;
        Ok(path)
    }

    fn item_path(&self, root: &Path, item: &str) -> Result<Option<PathBuf>, StoreError> {
        let file_name = format!("{item}{ITEM_SUFFIX}");
        let direct = root.join(&file_name);
        if direct.is_file() {
            return Ok(Some(direct));
        }
        for dir in sub_containers(root)? {
            let nested = dir.join(&file_name);
            if nested.is_file() {
                return Ok(Some(nested));
            }
        }
        Ok(None)
    }
}

impl LocalStore for FsGeodatabase {
    fn list_items(&self, root: &Path) -> Result<Vec<LocalItemRef>, StoreError> {
        if !root.is_dir() {
            debug!(root = %root.display(), "store root missing; no items");
            return Ok(Vec::new());
        }
        let mut items = item_names(root)?
            .into_iter()
            .map(|name| LocalItemRef {
                name,
                container: None,
            })
            .collect::<Vec<_>>();
        for dir in sub_containers(root)? {
            let container = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
            items.extend(item_names(&dir)?.into_iter().map(|name| LocalItemRef {
                name,
                container: container.clone(),
            }));
        }
        items.sort();
        Ok(items)
    }

    fn read_metadata(&self, root: &Path, item: &str) -> Result<Option<ItemMetadata>, StoreError> {
        let Some(path) = self.item_path(root, item)? else {
            return Ok(None);
        };
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Some(ItemMetadata::default()));
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    fn write_metadata(
        &self,
        root: &Path,
        item: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), StoreError> {
        let path = self
            .item_path(root, item)?
            .ok_or_else(|| StoreError::ItemNotFound {
                root: root.to_path_buf(),
                item: item.to_string(),
            })?;
        write_document(&path, metadata)
    }

    fn list_stores(&self, directory: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut stores = read_dir_paths(directory)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter(|p| p.extension().map(|e| e == "gdb").unwrap_or(false))
            .collect::<Vec<_>>();
        stores.sort();
        Ok(stores)
    }
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
}

fn sub_containers(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = read_dir_paths(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();
    Ok(dirs)
}

fn item_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    Ok(read_dir_paths(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .filter_map(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(ITEM_SUFFIX))
                .map(ToString::to_string)
        })
        .collect())
}

fn write_document(path: &Path, metadata: &ItemMetadata) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(metadata).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    crate::write_new_file(&temp_path, &bytes)?;
    fs::rename(&temp_path, path).map_err(|source| {
        let _ = fs::remove_file(&temp_path);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata(title: &str) -> ItemMetadata {
        ItemMetadata {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn lists_top_level_and_nested_items() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Master.gdb");
        let store = FsGeodatabase::new();
        store.create_item(&root, None, "Roads", &metadata("Roads")).unwrap();
        store
            .create_item(&root, Some("Hydrology"), "Channels", &metadata("Channels"))
            .unwrap();

        let items = store.list_items(&root).unwrap();
        assert_eq!(
            items,
            vec![
                LocalItemRef { name: "Channels".into(), container: Some("Hydrology".into()) },
                LocalItemRef { name: "Roads".into(), container: None },
            ]
        );
    }

    #[test]
    fn missing_root_has_no_items() {
        let dir = tempdir().expect("tempdir");
        let items = FsGeodatabase::new()
            .list_items(&dir.path().join("Nope.gdb"))
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn write_then_read_nested_metadata() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Spatial.gdb");
        let store = FsGeodatabase::new();
        store
            .create_item(&root, Some("Transport"), "Roads", &ItemMetadata::default())
            .unwrap();

        let mut md = store.read_metadata(&root, "Roads").unwrap().expect("item");
        md.tags = Some("a,b".into());
        store.write_metadata(&root, "Roads", &md).unwrap();

        let reread = store.read_metadata(&root, "Roads").unwrap().expect("item");
        assert_eq!(reread.tags.as_deref(), Some("a,b"));
        assert!(store.read_metadata(&root, "Bridges").unwrap().is_none());
    }

    #[test]
    fn writing_unknown_item_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let err = FsGeodatabase::new()
            .write_metadata(dir.path(), "Ghost", &ItemMetadata::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound { .. }));
    }

    #[test]
    fn lists_only_gdb_directories_as_stores() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Master.gdb")).unwrap();
        fs::create_dir_all(dir.path().join("Spatial.gdb")).unwrap();
        fs::create_dir_all(dir.path().join("scratch")).unwrap();
        let stores = FsGeodatabase::new().list_stores(dir.path()).unwrap();
        assert_eq!(
            stores,
            vec![dir.path().join("Master.gdb"), dir.path().join("Spatial.gdb")]
        );
    }
}
