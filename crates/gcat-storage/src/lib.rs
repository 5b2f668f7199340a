//! Storage backends: local geodatabase stores, the hosted portal and the
//! write-once backup directory.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

mod backup_store;
mod local;
mod portal;
mod retry;

pub use backup_store::{content_digest, BackupStore, StoredBackup};
pub use local::{FsGeodatabase, LocalItemRef, LocalStore, StoreError, ITEM_SUFFIX};
pub use portal::{
    InMemoryPortal, PortalClient, PortalClientConfig, PortalSnapshot, RemoteService, ServiceError,
};
pub use retry::{classify_response, is_transient_transport_error, BackoffPolicy, ResponseClass};

pub(crate) fn write_new_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("opening temp file {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing temp file {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flushing temp file {}", path.display()))?;
    Ok(())
}
