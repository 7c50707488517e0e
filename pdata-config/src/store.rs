//! `CredentialStore` (spec §4.1), grounded on `pbs-config/src/user.rs` and
//! `pbs-config/src/token_shadow.rs` for the lock-read-mutate-write shape,
//! but backed by plain CSV instead of `SectionConfig`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;

use pdata_api_types::{PDataError, PDataResult, Username};

use crate::cache::ConfigCache;
use crate::lock;

const USERS_CSV: &str = "users.csv";
const ROLES_CSV: &str = "roles.csv";
const LOCK_FILE: &str = ".users.lock";
const PBKDF2_ROUNDS: u32 = 10_000;
const HASH_LEN: usize = 32;
const SALT_LEN: usize = 16;

#[derive(Clone, Debug)]
struct UserRecord {
    salt: Vec<u8>,
    hash: Vec<u8>,
}

type Users = BTreeMap<String, UserRecord>;
type Roles = BTreeMap<String, BTreeSet<String>>;

/// Append-only CSV-backed user/role tables (spec §4.1). `root` holds
/// `users.csv` and `roles.csv`; both are created empty if absent. Reads go
/// through an mtime-keyed cache (spec §5, §10.6) so a long-lived process
/// picks up changes made by another process (e.g. `pdata-manager`) without
/// needing to be restarted.
pub struct CredentialStore {
    root: PathBuf,
    allowed_roles: BTreeSet<String>,
    users_cache: ConfigCache<Users>,
    roles_cache: ConfigCache<Roles>,
}

fn derive_hash(password: &str, salt: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut out);
    out
}

fn random_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn load_users(path: &Path) -> PDataResult<BTreeMap<String, UserRecord>> {
    let mut users = BTreeMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
        Err(e) => return Err(PDataError::IoError(format!("read {path:?}: {e}"))),
    };

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 3 {
            log::warn!("{}:{}: skipping malformed users.csv line", path.display(), lineno + 1);
            continue;
        }
        let (username, salt_hex, hash_hex) = (fields[0], fields[1], fields[2]);
        if salt_hex.is_empty() || hash_hex.is_empty() {
            log::warn!(
                "{}:{}: skipping users.csv entry with empty salt or hash",
                path.display(),
                lineno + 1
            );
            continue;
        }
        let (salt, hash) = match (hex::decode(salt_hex), hex::decode(hash_hex)) {
            (Ok(s), Ok(h)) => (s, h),
            _ => {
                log::warn!(
                    "{}:{}: skipping users.csv entry with non-hex salt/hash",
                    path.display(),
                    lineno + 1
                );
                continue;
            }
        };
        // last-write-wins
        users.insert(username.to_string(), UserRecord { salt, hash });
    }
    Ok(users)
}

fn load_roles(path: &Path) -> PDataResult<BTreeMap<String, BTreeSet<String>>> {
    let mut roles: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(roles),
        Err(e) => return Err(PDataError::IoError(format!("read {path:?}: {e}"))),
    };

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 2 {
            log::warn!("{}:{}: skipping malformed roles.csv line", path.display(), lineno + 1);
            continue;
        }
        roles.entry(fields[0].to_string()).or_default().insert(fields[1].to_string());
    }
    Ok(roles)
}

fn write_users(path: &Path, users: &BTreeMap<String, UserRecord>) -> PDataResult<()> {
    let mut out = String::new();
    for (user, rec) in users {
        out.push_str(&format!("{},{},{}\n", user, hex::encode(&rec.salt), hex::encode(&rec.hash)));
    }
    lock::atomic_write(path, out.as_bytes())
}

fn write_roles(path: &Path, roles: &BTreeMap<String, BTreeSet<String>>) -> PDataResult<()> {
    let mut out = String::new();
    for (user, rs) in roles {
        for role in rs {
            out.push_str(&format!("{user},{role}\n"));
        }
    }
    lock::atomic_write(path, out.as_bytes())
}

impl CredentialStore {
    /// Attaches to `users.csv`/`roles.csv` under `root`. Neither file is
    /// created until the first mutation (spec §4.1: "created empty if
    /// absent"); both are read fresh, through the cache, on first access.
    /// `allowed_roles` is the host's configured role set (spec §4.1); `add`
    /// and `set_role` reject any role outside it.
    pub fn open(
        root: impl Into<PathBuf>,
        allowed_roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> PDataResult<Self> {
        let root = root.into();
        Ok(CredentialStore {
            root,
            allowed_roles: allowed_roles.into_iter().map(Into::into).collect(),
            users_cache: ConfigCache::new(),
            roles_cache: ConfigCache::new(),
        })
    }

    fn check_role_allowed(&self, role: &str) -> PDataResult<()> {
        if self.allowed_roles.contains(role) {
            Ok(())
        } else {
            Err(PDataError::InvalidInput(format!("role {role:?} is not in the configured role set")))
        }
    }

    fn users_path(&self) -> PathBuf {
        self.root.join(USERS_CSV)
    }

    fn roles_path(&self) -> PathBuf {
        self.root.join(ROLES_CSV)
    }

    fn users(&self) -> PDataResult<std::sync::Arc<Users>> {
        let path = self.users_path();
        self.users_cache.get_or_reload(&path, || load_users(&path))
    }

    fn roles(&self) -> PDataResult<std::sync::Arc<Roles>> {
        let path = self.roles_path();
        self.roles_cache.get_or_reload(&path, || load_roles(&path))
    }

    fn lock(&self) -> PDataResult<lock::LockGuard> {
        lock::lock_file(&self.root.join(LOCK_FILE), Duration::from_secs(10))
    }

    /// Verifies `password` against the stored PBKDF2-SHA512 hash for
    /// `user`, comparing in constant time (spec §4.1).
    pub fn validate(&self, user: &str, password: &str) -> bool {
        let Ok(users) = self.users() else { return false };
        match users.get(user) {
            Some(rec) => {
                let computed = derive_hash(password, &rec.salt);
                computed.ct_eq(rec.hash.as_slice()).into()
            }
            None => false,
        }
    }

    pub fn add(&self, user: &str, password: &str, role: &str) -> PDataResult<()> {
        Username::try_from(user.to_string())?;
        self.check_role_allowed(role)?;
        let _guard = self.lock()?;
        let mut users = (*self.users()?).clone();
        if users.contains_key(user) {
            return Err(PDataError::AlreadyExists);
        }
        let mut roles = (*self.roles()?).clone();

        let salt = random_salt();
        let hash = derive_hash(password, &salt).to_vec();
        users.insert(user.to_string(), UserRecord { salt, hash });
        roles.entry(user.to_string()).or_default().insert(role.to_string());

        write_users(&self.users_path(), &users).and_then(|()| write_roles(&self.roles_path(), &roles))?;
        self.users_cache.invalidate();
        self.roles_cache.invalidate();
        log::info!("added user {user}");
        Ok(())
    }

    pub fn delete(&self, user: &str) -> PDataResult<()> {
        let _guard = self.lock()?;
        let mut users = (*self.users()?).clone();
        if !users.contains_key(user) {
            return Err(PDataError::NotFound);
        }
        let mut roles = (*self.roles()?).clone();

        users.remove(user);
        roles.remove(user);

        write_users(&self.users_path(), &users).and_then(|()| write_roles(&self.roles_path(), &roles))?;
        self.users_cache.invalidate();
        self.roles_cache.invalidate();
        log::info!("deleted user {user}");
        Ok(())
    }

    pub fn update_password(&self, user: &str, new_password: &str) -> PDataResult<()> {
        let _guard = self.lock()?;
        let mut users = (*self.users()?).clone();
        if !users.contains_key(user) {
            return Err(PDataError::NotFound);
        }

        let salt = random_salt();
        let hash = derive_hash(new_password, &salt).to_vec();
        users.insert(user.to_string(), UserRecord { salt, hash });

        write_users(&self.users_path(), &users)?;
        self.users_cache.invalidate();
        log::info!("updated password for {user}");
        Ok(())
    }

    pub fn set_role(&self, user: &str, role: &str) -> PDataResult<()> {
        self.check_role_allowed(role)?;
        let _guard = self.lock()?;
        let users = self.users()?;
        if !users.contains_key(user) {
            return Err(PDataError::NotFound);
        }
        let mut roles = (*self.roles()?).clone();
        roles.entry(user.to_string()).or_default().insert(role.to_string());

        write_roles(&self.roles_path(), &roles)?;
        self.roles_cache.invalidate();
        log::info!("granted role {role} to {user}");
        Ok(())
    }

    pub fn list_users(&self) -> Vec<String> {
        self.users().map(|u| u.keys().cloned().collect()).unwrap_or_default()
    }

    /// Roles assigned to `user`, defaulting to `{"user"}` when the user has
    /// a credential row but no role row (spec §3).
    pub fn get_roles(&self, user: &str) -> BTreeSet<String> {
        let Ok(roles) = self.roles() else { return BTreeSet::new() };
        match roles.get(user) {
            Some(roles) if !roles.is_empty() => roles.clone(),
            _ => {
                let Ok(users) = self.users() else { return BTreeSet::new() };
                if users.contains_key(user) {
                    BTreeSet::from(["user".to_string()])
                } else {
                    BTreeSet::new()
                }
            }
        }
    }

    pub fn db_root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();
        (dir, store)
    }

    #[test]
    fn add_and_validate() {
        let (_dir, store) = store();
        store.add("alice", "hunter2", "user").unwrap();
        assert!(store.validate("alice", "hunter2"));
        assert!(!store.validate("alice", "wrong"));
        assert!(!store.validate("bob", "hunter2"));
    }

    #[test]
    fn add_duplicate_rejected() {
        let (_dir, store) = store();
        store.add("alice", "pw", "user").unwrap();
        assert!(matches!(store.add("alice", "pw2", "user"), Err(PDataError::AlreadyExists)));
    }

    #[test]
    fn update_password_then_validate() {
        let (_dir, store) = store();
        store.add("alice", "old", "user").unwrap();
        store.update_password("alice", "new").unwrap();
        assert!(!store.validate("alice", "old"));
        assert!(store.validate("alice", "new"));
    }

    #[test]
    fn delete_then_not_found() {
        let (_dir, store) = store();
        store.add("alice", "pw", "user").unwrap();
        store.delete("alice").unwrap();
        assert!(matches!(store.delete("alice"), Err(PDataError::NotFound)));
        assert!(!store.validate("alice", "pw"));
    }

    #[test]
    fn roles_default_to_user() {
        let (_dir, store) = store();
        store.add("alice", "pw", "user").unwrap();
        assert_eq!(store.get_roles("alice"), BTreeSet::from(["user".to_string()]));
        store.set_role("alice", "admin").unwrap();
        assert_eq!(
            store.get_roles("alice"),
            BTreeSet::from(["user".to_string(), "admin".to_string()])
        );
    }

    #[test]
    fn add_rejects_username_that_would_inject_a_csv_row() {
        let (_dir, store) = store();
        assert!(matches!(
            store.add("alice\nmallory,admin", "pw", "user"),
            Err(PDataError::InvalidInput(_))
        ));
        assert!(store.list_users().is_empty());
    }

    #[test]
    fn add_rejects_role_outside_allowed_set() {
        let (_dir, store) = store();
        assert!(matches!(
            store.add("alice", "pw", "garbage-role"),
            Err(PDataError::InvalidInput(_))
        ));
        assert!(store.list_users().is_empty());
    }

    #[test]
    fn set_role_rejects_role_outside_allowed_set() {
        let (_dir, store) = store();
        store.add("alice", "pw", "user").unwrap();
        assert!(matches!(
            store.set_role("alice", "garbage-role"),
            Err(PDataError::InvalidInput(_))
        ));
        assert_eq!(store.get_roles("alice"), BTreeSet::from(["user".to_string()]));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();
            store.add("alice", "pw", "user").unwrap();
        }
        let store = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();
        assert!(store.validate("alice", "pw"));
    }

    #[test]
    fn separate_handle_observes_writes_through_the_cache() {
        let dir = TempDir::new().unwrap();
        let writer = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();
        let reader = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();

        assert!(!reader.validate("alice", "hunter2"));
        writer.add("alice", "hunter2", "user").unwrap();
        // reader has its own cache, keyed on users.csv's mtime, not on
        // writer's in-memory state; it must observe the write on next read.
        assert!(reader.validate("alice", "hunter2"));
    }

    #[test]
    fn malformed_csv_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.csv"), "alice,deadbeef\nbob,xx,yy\n").unwrap();
        let store = CredentialStore::open(dir.path(), ["user", "admin"]).unwrap();
        assert!(store.list_users().is_empty());
    }
}
