//! In-process generation cache, grounded on `pbs-config`'s
//! `ConfigVersionCache`/`cached_config()` pattern. The teacher's version is
//! backed by a cross-process shared-memory segment (`proxmox_shared_memory`)
//! so multiple daemons observe the same generation; that crate is
//! unavailable outside the Proxmox ecosystem, so this is a plain in-process
//! `RwLock`, valid only within a single process (spec §5, §10.6).

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use pdata_api_types::PDataError;

struct Entry<T> {
    mtime: SystemTime,
    data: Arc<T>,
}

/// Caches the parsed form of a single config file, keyed on its mtime.
pub struct ConfigCache<T> {
    entry: RwLock<Option<Entry<T>>>,
}

impl<T> Default for ConfigCache<T> {
    fn default() -> Self {
        ConfigCache {
            entry: RwLock::new(None),
        }
    }
}

impl<T> ConfigCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value if `path`'s mtime matches what was cached;
    /// otherwise calls `reload`, caches, and returns the fresh value.
    pub fn get_or_reload(
        &self,
        path: &Path,
        reload: impl FnOnce() -> Result<T, PDataError>,
    ) -> Result<Arc<T>, PDataError> {
        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        if let Some(mtime) = mtime {
            let guard = self.entry.read().unwrap();
            if let Some(entry) = guard.as_ref() {
                if entry.mtime == mtime {
                    return Ok(entry.data.clone());
                }
            }
        }

        let fresh = Arc::new(reload()?);
        let mut guard = self.entry.write().unwrap();
        if let Some(mtime) = mtime {
            *guard = Some(Entry {
                mtime,
                data: fresh.clone(),
            });
        } else {
            *guard = None;
        }
        Ok(fresh)
    }

    /// Drops the cached entry, forcing the next read to reload. Called
    /// after every mutation, mirroring `ConfigVersionCache`'s generation
    /// bump in `save_config()`.
    pub fn invalidate(&self) {
        *self.entry.write().unwrap() = None;
    }
}
