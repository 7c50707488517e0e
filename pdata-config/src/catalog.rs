//! `CapabilityCatalog` (spec §4.2), grounded on the same CSV-load idiom as
//! `pbs-config/src/user.rs::config()`.
//!
//! Note: spec §4.1 and §4.2 both name a file `roles.csv`, but with
//! incompatible schemas (`username,role` for the credential store's role
//! assignments vs. `role,capability-id` for the catalog's role→capability
//! map). Since both cannot live in the same file, this resolves the
//! ambiguity by naming the catalog's file `role_caps.csv` (see DESIGN.md).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pdata_api_types::{PDataError, PDataResult};

use crate::cache::ConfigCache;

const ROLE_CAPS_CSV: &str = "role_caps.csv";
const CAPABILITIES_CSV: &str = "capabilities.csv";
const ASSETS_CSV: &str = "assets.csv";

type RoleCaps = BTreeMap<String, Vec<String>>;
type Capabilities = BTreeMap<String, String>;
type Assets = BTreeMap<String, Vec<String>>;

/// Read-only reference tables: role→capability-ids, capability-id→
/// expression, and asset-set→glob list. Reads go through an mtime-keyed
/// cache (spec §5, §10.6) so an admin hand-editing these files is picked
/// up without restarting whatever process holds this catalog open.
pub struct CapabilityCatalog {
    root: PathBuf,
    role_caps: ConfigCache<RoleCaps>,
    capabilities: ConfigCache<Capabilities>,
    assets: ConfigCache<Assets>,
}

fn read_lines(path: &Path) -> PDataResult<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(c) => Ok(c.lines().map(|l| l.to_string()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(PDataError::IoError(format!("read {path:?}: {e}"))),
    }
}

fn load_role_caps(path: &Path) -> PDataResult<BTreeMap<String, Vec<String>>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (lineno, line) in read_lines(path)?.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 2 {
            log::warn!("{}:{}: skipping malformed role_caps.csv line", path.display(), lineno + 1);
            continue;
        }
        out.entry(fields[0].to_string()).or_default().push(fields[1].to_string());
    }
    Ok(out)
}

fn load_capabilities(path: &Path) -> PDataResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (lineno, line) in read_lines(path)?.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        let (id, expr) = match (fields.next(), fields.next()) {
            (Some(id), Some(expr)) if !id.is_empty() => (id, expr),
            _ => {
                log::warn!(
                    "{}:{}: skipping malformed capabilities.csv line",
                    path.display(),
                    lineno + 1
                );
                continue;
            }
        };
        out.insert(id.to_string(), expr.to_string());
    }
    Ok(out)
}

fn load_assets(path: &Path) -> PDataResult<BTreeMap<String, Vec<String>>> {
    let mut out = BTreeMap::new();
    for (lineno, line) in read_lines(path)?.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let name = match fields.next() {
            Some(n) if !n.is_empty() => n,
            _ => {
                log::warn!("{}:{}: skipping malformed assets.csv line", path.display(), lineno + 1);
                continue;
            }
        };
        out.insert(name.to_string(), fields.map(|s| s.to_string()).collect());
    }
    Ok(out)
}

impl CapabilityCatalog {
    /// Attaches to the three reference tables under `root`. Each file is
    /// optional; a missing file yields an empty table (spec §4.2). Reads
    /// fresh, through the cache, on first access.
    pub fn open(root: impl Into<PathBuf>) -> PDataResult<Self> {
        Ok(CapabilityCatalog {
            root: root.into(),
            role_caps: ConfigCache::new(),
            capabilities: ConfigCache::new(),
            assets: ConfigCache::new(),
        })
    }

    fn role_caps(&self) -> PDataResult<Arc<RoleCaps>> {
        let path = self.root.join(ROLE_CAPS_CSV);
        self.role_caps.get_or_reload(&path, || load_role_caps(&path))
    }

    fn capabilities(&self) -> PDataResult<Arc<Capabilities>> {
        let path = self.root.join(CAPABILITIES_CSV);
        self.capabilities.get_or_reload(&path, || load_capabilities(&path))
    }

    fn assets(&self) -> PDataResult<Arc<Assets>> {
        let path = self.root.join(ASSETS_CSV);
        self.assets.get_or_reload(&path, || load_assets(&path))
    }

    /// Expands a role set into a deduplicated, first-occurrence-ordered
    /// list of raw capability expressions (spec §4.2).
    pub fn expand(&self, roles: &[String]) -> Vec<String> {
        let Ok(role_caps) = self.role_caps() else { return Vec::new() };
        let Ok(capabilities) = self.capabilities() else { return Vec::new() };

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for role in roles {
            let Some(cap_ids) = role_caps.get(role) else {
                continue;
            };
            for cap_id in cap_ids {
                if let Some(expr) = capabilities.get(cap_id) {
                    for part in expr.split(';') {
                        if part.is_empty() {
                            continue;
                        }
                        if seen.insert(part.to_string()) {
                            out.push(part.to_string());
                        }
                    }
                } else if seen.insert(cap_id.clone()) {
                    out.push(cap_id.clone());
                }
            }
        }
        out
    }

    /// Globs registered under `@assets:<set_name>`.
    pub fn asset_set(&self, set_name: &str) -> Option<Vec<String>> {
        self.assets().ok()?.get(set_name).cloned()
    }
}
