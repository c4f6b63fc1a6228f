pub mod daemon;
pub mod init;
pub mod notify;
pub mod policy;
pub mod run;
pub mod runs;
pub mod ticket;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tierwatch_core::{paths, store::RedbStore, TierwatchError};

/// Open the ticket database under an initialized root.
///
/// The database file is locked while open, so long-lived callers should
/// reopen it per unit of work rather than hold it.
pub(crate) fn open_store(root: &Path) -> anyhow::Result<Arc<RedbStore>> {
    if !paths::tierwatch_dir(root).is_dir() {
        return Err(TierwatchError::NotInitialized.into());
    }
    let path = paths::db_path(root);
    let store =
        RedbStore::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(Arc::new(store))
}
