//! Core of a user-scoped, capability-based file-access service ("pdata").
//! Four subsystems compose into the public surface this crate exposes:
//! `pdata_config::CredentialStore` + `pdata_config::CapabilityCatalog`
//! (process-wide, loaded once), `pdata_ticket::TokenEngine` (stateless
//! given its secret), and the path/matcher/fileops trio in this crate
//! (stateless, fully parameterized per call). See `DESIGN.md` for the
//! grounding of each piece in the example pack this crate was built from.

pub mod config;
pub mod fileops;
pub mod matcher;
pub mod mount;
pub mod path;

pub use config::PDataConfig;
pub use fileops::{FileOps, ListResult};
pub use mount::MountPlanner;

use std::sync::Arc;

use pdata_api_types::{PDataResult, Role, Token, Username};
use pdata_config::{CapabilityCatalog, CredentialStore};
use pdata_ticket::TokenEngine;

/// Assembles the four core subsystems into the process-wide object a host
/// embeds (spec §3, "Ownership & lifecycle"): `CredentialStore`,
/// `CapabilityCatalog`, and `MountPlanner` are process-wide singletons
/// constructed once at startup; `TokenEngine` is stateless apart from its
/// signing secret. `PathResolver`/`CapabilityMatcher`/`FileOps` are purely
/// functional and take a validated `Token` plus request arguments.
pub struct Service {
    pub credentials: CredentialStore,
    pub mounts: MountPlanner,
    pub tokens: TokenEngine,
    pub fileops: FileOps,
    catalog: Arc<CapabilityCatalog>,
    token_ttl_secs: i64,
}

impl Service {
    pub fn open(config: &PDataConfig) -> PDataResult<Self> {
        let credentials = CredentialStore::open(&config.db_root, config.allowed_roles.clone())?;
        let catalog = Arc::new(CapabilityCatalog::open(&config.db_root)?);
        let mounts = MountPlanner::new(&config.db_root);
        let tokens = TokenEngine::new(config.secret.clone());
        let fileops = FileOps::new(catalog.clone(), config.permissive_symlinks);

        Ok(Service {
            credentials,
            mounts,
            tokens,
            fileops,
            catalog,
            token_ttl_secs: config.token_ttl_secs,
        })
    }

    /// Validates a password, builds the session's mount table and
    /// capability list, and mints a signed token — the `validate_user` +
    /// `create_token` flow from spec §6.
    pub fn login(&self, username: &Username, password: &str) -> PDataResult<String> {
        if !self.credentials.validate(username.as_str(), password) {
            return Err(pdata_api_types::PDataError::AuthFailure);
        }

        let role_names = self.credentials.get_roles(username.as_str());
        let roles: Vec<Role> = role_names
            .iter()
            .filter_map(|r| Role::try_from(r.clone()).ok())
            .collect();
        let role_strings: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();

        let mounts = self.mounts.plan(username, &roles);
        let caps = self.catalog.expand(&role_strings);

        Ok(self.tokens.mint(username, &roles, &caps, &mounts, self.token_ttl_secs))
    }

    pub fn validate_token(&self, token_str: &str) -> PDataResult<Token> {
        self.tokens.validate(token_str)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn open_service(dir: &TempDir) -> Service {
        std::fs::create_dir_all(dir.path().join("data/users/alice")).unwrap();
        let config = PDataConfig {
            db_root: dir.path().to_path_buf(),
            secret: b"test-secret".to_vec(),
            token_ttl_secs: 60,
            permissive_symlinks: false,
            allowed_roles: vec!["user".to_string(), "admin".to_string()],
        };
        Service::open(&config).unwrap()
    }

    #[test]
    fn login_then_validate_round_trips() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir);
        let alice = Username::from_str("alice").unwrap();
        service.credentials.add("alice", "hunter2", "user").unwrap();

        let token = service.login(&alice, "hunter2").unwrap();
        let parsed = service.validate_token(&token).unwrap();
        assert_eq!(parsed.username, alice);
        assert!(parsed.mounts.contains("~/data/users/alice"));
    }

    #[test]
    fn login_with_wrong_password_fails() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir);
        let alice = Username::from_str("alice").unwrap();
        service.credentials.add("alice", "hunter2", "user").unwrap();
        assert!(service.login(&alice, "wrong").is_err());
    }
}
