//! `PDataConfig` (spec §10.3): the ambient settings a running process
//! assembles once at startup, the way the teacher's `*-manager`/`*-client`
//! binaries assemble theirs — compiled-in defaults overridable by
//! environment variables, read once and threaded explicitly into the core
//! types rather than pulled from a global singleton (spec §9).

use std::path::PathBuf;

const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Process-scoped configuration for a running `pdata` service.
#[derive(Clone, Debug)]
pub struct PDataConfig {
    pub db_root: PathBuf,
    pub secret: Vec<u8>,
    pub token_ttl_secs: i64,
    pub permissive_symlinks: bool,
    pub allowed_roles: Vec<String>,
}

impl PDataConfig {
    /// Reads `PDATA_DB_ROOT`, `PDATA_SECRET`, `PDATA_TOKEN_TTL`,
    /// `PDATA_PERMISSIVE_SYMLINKS` and `PDATA_ROLES` from the environment,
    /// falling back to built-in defaults. `PDATA_DB_ROOT` and
    /// `PDATA_SECRET` have no safe default and must be set.
    pub fn from_env() -> Result<Self, String> {
        let db_root = std::env::var("PDATA_DB_ROOT")
            .map_err(|_| "PDATA_DB_ROOT must be set".to_string())?
            .into();
        let secret = std::env::var("PDATA_SECRET")
            .map_err(|_| "PDATA_SECRET must be set".to_string())?
            .into_bytes();

        let token_ttl_secs = match std::env::var("PDATA_TOKEN_TTL") {
            Ok(v) => v.parse().map_err(|_| "PDATA_TOKEN_TTL must be an integer".to_string())?,
            Err(_) => DEFAULT_TOKEN_TTL_SECS,
        };

        let permissive_symlinks = match std::env::var("PDATA_PERMISSIVE_SYMLINKS") {
            Ok(v) => matches!(v.as_str(), "1" | "true" | "yes"),
            Err(_) => false,
        };

        let allowed_roles = match std::env::var("PDATA_ROLES") {
            Ok(v) => v.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect(),
            Err(_) => vec!["admin".to_string(), "user".to_string(), "project".to_string()],
        };

        Ok(PDataConfig { db_root, secret, token_ttl_secs, permissive_symlinks, allowed_roles })
    }
}
