//! `FileOps` (spec §4.7), grounded on
//! `proxmox-restore-daemon/src/proxmox_restore_daemon/api.rs`'s `list`/
//! `get_dir_entry` for the directory-walk-and-classify shape.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use pdata_api_types::{Op, PDataError, PDataResult, Token, ROLE_ADMIN};
use pdata_config::CapabilityCatalog;

use crate::matcher;
use crate::path as resolver;

/// Result of `FileOps::list` (spec §4.7).
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ListResult {
    pub dirs: Vec<String>,
    pub files: Vec<String>,
    pub exists: bool,
}

/// Performs `list`/`read`/`write`/`delete`/`finalize_upload`/
/// `create_symlink` against resolved paths, applying per-entry
/// authorization and symlink-target re-checking.
pub struct FileOps {
    catalog: Arc<CapabilityCatalog>,
    permissive_symlinks: bool,
}

/// Virtual path of `vpath`'s containing directory. A path with no `/` names
/// a top-level entry directly under the default alias root, whose
/// containing directory is that root itself — not the entry's own path.
fn parent_vpath(vpath: &str) -> String {
    vpath
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default()
}

fn child_vpath(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '/' && *c != '\\')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
}

/// Computes the relative path from directory `from` to `to`, for symlinks
/// that must always carry a relative target (spec §4.7).
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from_comps: Vec<_> = from.components().collect();
    let to_comps: Vec<_> = to.components().collect();
    let common = from_comps
        .iter()
        .zip(to_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..from_comps.len() {
        result.push("..");
    }
    for comp in &to_comps[common..] {
        result.push(comp.as_os_str());
    }
    result
}

impl FileOps {
    pub fn new(catalog: Arc<CapabilityCatalog>, permissive_symlinks: bool) -> Self {
        FileOps { catalog, permissive_symlinks }
    }

    fn require_cap(&self, token: &Token, op: Op, vpath: &str) -> PDataResult<()> {
        if matcher::has_cap(token, op, vpath, &self.catalog) {
            Ok(())
        } else {
            Err(PDataError::PermissionDenied)
        }
    }

    fn not_found_or_denied(&self, token: &Token, vpath: &str) -> PDataError {
        if matcher::has_cap(token, Op::List, &parent_vpath(vpath), &self.catalog) {
            PDataError::NotFound
        } else {
            PDataError::PermissionDenied
        }
    }

    /// Maps an absolute host path back to a virtual path inside `token`'s
    /// namespace, if it falls under one of the session's mounts.
    fn host_path_to_vpath(&self, token: &Token, host_path: &Path) -> Option<String> {
        token.mounts.iter().find_map(|(alias, target)| {
            host_path.strip_prefix(target).ok().map(|rest| {
                let rest = rest.to_string_lossy();
                if rest.is_empty() {
                    alias.to_string()
                } else {
                    format!("{alias}/{rest}")
                }
            })
        })
    }

    /// Resolves a symlink one level and re-authorizes `op` against its
    /// target, mapped back through the mount table (spec §4.7 "Symlink
    /// policy").
    fn authorize_symlink_target(
        &self,
        token: &Token,
        link_host_path: &Path,
        op: Op,
    ) -> PDataResult<PathBuf> {
        let raw_target = std::fs::read_link(link_host_path)
            .map_err(|_| PDataError::PermissionDenied)?;
        let joined = if raw_target.is_absolute() {
            raw_target
        } else {
            link_host_path
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(&raw_target)
        };
        let abs_target = resolver::normalize_lexical(&joined);

        let permissive_ok = self.permissive_symlinks && matches!(op, Op::Read | Op::List);

        match self.host_path_to_vpath(token, &abs_target) {
            Some(target_vpath) => {
                if matcher::has_cap(token, op, &target_vpath, &self.catalog) || permissive_ok {
                    Ok(abs_target)
                } else {
                    Err(PDataError::PermissionDenied)
                }
            }
            None if permissive_ok => Ok(abs_target),
            None => Err(PDataError::PermissionDenied),
        }
    }

    /// `list(token, vpath)`: directory entries, skipping dotfiles, each
    /// gated on its own `list`/`read` capability (spec §4.7, open question
    /// (b)).
    pub fn list(&self, token: &Token, vpath: &str) -> PDataResult<ListResult> {
        self.require_cap(token, Op::List, vpath)?;
        let resolved = resolver::resolve(token, vpath)?;

        if !resolved.exists() {
            return Ok(ListResult::default());
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();

        let read_dir = std::fs::read_dir(&resolved)?;
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let entry_vpath = child_vpath(vpath, &name);
            let file_type = entry.file_type()?;

            if file_type.is_symlink() {
                match std::fs::metadata(entry.path()) {
                    Ok(target_meta) => {
                        let required = if target_meta.is_dir() { Op::List } else { Op::Read };
                        if self.authorize_symlink_target(token, &entry.path(), required).is_err() {
                            continue;
                        }
                        if target_meta.is_dir() {
                            dirs.push(name);
                        } else {
                            files.push(name);
                        }
                    }
                    Err(_) => {
                        // broken symlink: classified as a file, never dereferenced further.
                        if matcher::has_cap(token, Op::Read, &entry_vpath, &self.catalog) {
                            files.push(name);
                        }
                    }
                }
            } else if file_type.is_dir() {
                if matcher::has_cap(token, Op::List, &entry_vpath, &self.catalog) {
                    dirs.push(name);
                }
            } else if matcher::has_cap(token, Op::Read, &entry_vpath, &self.catalog) {
                files.push(name);
            }
        }

        dirs.sort();
        files.sort();
        Ok(ListResult { dirs, files, exists: true })
    }

    /// `read(token, vpath)`: requires `read`; dereferences one symlink
    /// level with re-authorization (spec §4.7).
    pub fn read(&self, token: &Token, vpath: &str) -> PDataResult<Vec<u8>> {
        self.require_cap(token, Op::Read, vpath)?;
        let resolved = resolver::resolve(token, vpath)?;

        let meta = std::fs::symlink_metadata(&resolved)
            .map_err(|_| self.not_found_or_denied(token, vpath))?;

        let final_path = if meta.file_type().is_symlink() {
            self.authorize_symlink_target(token, &resolved, Op::Read)?
        } else {
            resolved
        };

        std::fs::read(&final_path).map_err(|_| self.not_found_or_denied(token, vpath))
    }

    /// `write(token, vpath, bytes)`: requires `write` on the containing
    /// directory; whole-file overwrite (spec §4.7).
    pub fn write(&self, token: &Token, vpath: &str, bytes: &[u8]) -> PDataResult<()> {
        self.require_cap(token, Op::Write, &parent_vpath(vpath))?;
        let resolved = resolver::resolve(token, vpath)?;

        let target = match std::fs::symlink_metadata(&resolved) {
            Ok(meta) if meta.file_type().is_symlink() => {
                self.authorize_symlink_target(token, &resolved, Op::Write)?
            }
            Ok(meta) if meta.is_file() => resolved,
            Ok(_) => {
                return Err(PDataError::InvalidInput(
                    "write target is neither a regular file nor a symlink".into(),
                ))
            }
            Err(_) => {
                if let Some(parent) = resolved.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                resolved
            }
        };

        std::fs::write(&target, bytes)?;
        Ok(())
    }

    /// `delete(token, vpath)`: requires `delete`; only regular files and
    /// symlinks, never directories (spec §4.7).
    pub fn delete(&self, token: &Token, vpath: &str) -> PDataResult<()> {
        self.require_cap(token, Op::Delete, vpath)?;
        let resolved = resolver::resolve(token, vpath)?;

        let meta = std::fs::symlink_metadata(&resolved)
            .map_err(|_| self.not_found_or_denied(token, vpath))?;
        if meta.is_dir() {
            return Err(PDataError::InvalidInput("delete does not operate on directories".into()));
        }

        std::fs::remove_file(&resolved)?;
        Ok(())
    }

    /// `finalize_upload(token, temp_path, original_name)`: moves a temp
    /// file into the `~uploads` mount under a fresh sanitized name (spec
    /// §4.7, upload state machine).
    pub fn finalize_upload(
        &self,
        token: &Token,
        temp_path: &Path,
        original_name: &str,
    ) -> PDataResult<String> {
        let uploads_dir = token.mounts.get("~uploads").ok_or(PDataError::PermissionDenied)?;

        let sanitized = sanitize_filename(original_name);
        let ext = Path::new(&sanitized)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let name = format!("{}-{}{}", now_ms(), random_suffix(), ext);
        let dest = uploads_dir.join(&name);

        match std::fs::rename(temp_path, &dest) {
            Ok(()) => Ok(format!("/uploads/{name}")),
            Err(e) => {
                let _ = std::fs::remove_file(temp_path);
                Err(PDataError::IoError(e.to_string()))
            }
        }
    }

    /// `create_symlink(token, link_vpath, target_vpath)` (spec §4.7). The
    /// link is always created with a relative target; non-admin users may
    /// only target a path their own namespace can resolve.
    pub fn create_symlink(&self, token: &Token, link_vpath: &str, target_vpath: &str) -> PDataResult<()> {
        self.require_cap(token, Op::Write, &parent_vpath(link_vpath))?;

        if !token.has_role(ROLE_ADMIN) && target_vpath.starts_with('/') && !target_vpath.starts_with("~") {
            return Err(PDataError::PermissionDenied);
        }

        let link_resolved = resolver::resolve(token, link_vpath)?;
        let target_resolved = resolver::resolve(token, target_vpath)?;

        if let Ok(meta) = std::fs::symlink_metadata(&link_resolved) {
            if meta.is_dir() {
                return Err(PDataError::AlreadyExists);
            }
            std::fs::remove_file(&link_resolved)?;
        }

        let link_parent = link_resolved
            .parent()
            .ok_or_else(|| PDataError::InvalidInput("symlink has no parent directory".into()))?;
        if !link_parent.exists() {
            std::fs::create_dir_all(link_parent)?;
        }
        let rel_target = relative_path(link_parent, &target_resolved);

        #[cfg(unix)]
        std::os::unix::fs::symlink(&rel_target, &link_resolved)?;
        #[cfg(not(unix))]
        compile_error!("pdata's symlink support is unix-only");

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pdata_api_types::{MountTable, Role, Username};
    use std::str::FromStr;
    use tempfile::TempDir;

    fn token_for(dir: &Path, roles: &[&str], caps: &[&str]) -> Token {
        let mut mounts = MountTable::new();
        mounts.insert("~data", dir.join("data"));
        mounts.insert("~uploads", dir.join("uploads"));
        Token {
            username: Username::from_str("alice").unwrap(),
            roles: roles.iter().map(|r| Role::from_str(r).unwrap()).collect(),
            caps: caps.iter().map(|c| c.to_string()).collect(),
            mounts,
            exp: i64::MAX,
        }
    }

    fn ops() -> FileOps {
        FileOps::new(
            Arc::new(CapabilityCatalog::open(TempDir::new().unwrap().path()).unwrap()),
            false,
        )
    }

    fn setup_dirs(dir: &TempDir) {
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
    }

    #[test]
    fn write_read_list_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        let ops = ops();
        let token = token_for(dir.path(), &["user"], &["w:~data/**", "r:~data/**", "l:~data/**", "d:~data/**"]);

        ops.write(&token, "docs/hello.md", b"hi").unwrap();
        assert_eq!(ops.read(&token, "docs/hello.md").unwrap(), b"hi");

        let listing = ops.list(&token, "docs").unwrap();
        assert_eq!(listing.files, vec!["hello.md".to_string()]);
        assert!(listing.dirs.is_empty());

        ops.delete(&token, "docs/hello.md").unwrap();
        assert!(matches!(ops.read(&token, "docs/hello.md"), Err(PDataError::NotFound)));
    }

    #[test]
    fn list_hides_entries_without_capability() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        std::fs::create_dir_all(dir.path().join("data/docs")).unwrap();
        std::fs::write(dir.path().join("data/docs/visible.md"), "v").unwrap();
        std::fs::write(dir.path().join("data/docs/hidden.md"), "h").unwrap();

        let ops = ops();
        let token = token_for(dir.path(), &["user"], &["l:~data/**", "r:~data/docs/visible.md"]);
        let listing = ops.list(&token, "docs").unwrap();
        assert_eq!(listing.files, vec!["visible.md".to_string()]);
    }

    #[test]
    fn write_without_capability_is_denied() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        let ops = ops();
        let token = token_for(dir.path(), &["user"], &[]);
        assert!(matches!(
            ops.write(&token, "docs/hello.md", b"hi"),
            Err(PDataError::PermissionDenied)
        ));
    }

    #[test]
    fn delete_refuses_directories() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        std::fs::create_dir_all(dir.path().join("data/docs")).unwrap();
        let ops = ops();
        let token = token_for(dir.path(), &["user"], &["d:~data/**"]);
        assert!(matches!(ops.delete(&token, "docs"), Err(PDataError::InvalidInput(_))));
    }

    #[test]
    fn finalize_upload_sanitizes_name_and_moves_file() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        let tmp_file = dir.path().join("incoming.tmp");
        std::fs::write(&tmp_file, b"payload").unwrap();

        let ops = ops();
        let token = token_for(dir.path(), &["user"], &[]);
        let public_path = ops.finalize_upload(&token, &tmp_file, "../evil name!.txt").unwrap();

        assert!(public_path.starts_with("/uploads/"));
        assert!(public_path.ends_with(".txt"));
        assert!(!tmp_file.exists());
    }

    #[test]
    fn symlink_read_requires_capability_on_target() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        std::fs::create_dir_all(dir.path().join("data/shared")).unwrap();
        std::fs::write(dir.path().join("data/shared/doc.md"), "secret").unwrap();

        let ops = ops();
        let token = token_for(
            dir.path(),
            &["user"],
            &["w:~data/users/alice/**", "r:~data/users/alice/**"],
        );
        std::fs::create_dir_all(dir.path().join("data/users/alice")).unwrap();
        std::os::unix::fs::symlink(
            "../../shared/doc.md",
            dir.path().join("data/users/alice/shortcut"),
        )
        .unwrap();

        assert!(matches!(
            ops.read(&token, "users/alice/shortcut"),
            Err(PDataError::PermissionDenied)
        ));

        let token = token_for(
            dir.path(),
            &["user"],
            &["w:~data/users/alice/**", "r:~data/users/alice/**", "r:~data/shared/**"],
        );
        assert_eq!(ops.read(&token, "users/alice/shortcut").unwrap(), b"secret");
    }

    #[test]
    fn write_top_level_entry_checks_the_alias_root_not_its_own_path() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        let ops = ops();

        // scoped only to a subdirectory; must not authorize creating a
        // top-level entry that merely shares that subdirectory's name.
        let token = token_for(dir.path(), &["user"], &["w:~data/only-this-dir/**"]);
        assert!(matches!(
            ops.write(&token, "only-this-dir", b"hi"),
            Err(PDataError::PermissionDenied)
        ));

        let token = token_for(dir.path(), &["user"], &["w:~data/**"]);
        ops.write(&token, "top-level-file", b"hi").unwrap();
    }

    #[test]
    fn list_hides_symlink_entries_without_capability_on_their_target() {
        let dir = TempDir::new().unwrap();
        setup_dirs(&dir);
        std::fs::create_dir_all(dir.path().join("data/shared")).unwrap();
        std::fs::write(dir.path().join("data/shared/doc.md"), "secret").unwrap();
        std::fs::create_dir_all(dir.path().join("data/users/alice")).unwrap();
        std::os::unix::fs::symlink(
            "../../shared/doc.md",
            dir.path().join("data/users/alice/shortcut"),
        )
        .unwrap();

        let ops = ops();
        // alice can list her own directory but has no capability on the
        // shared target the symlink points at.
        let token = token_for(dir.path(), &["user"], &["l:~data/users/alice/**"]);
        let listing = ops.list(&token, "users/alice").unwrap();
        assert!(listing.files.is_empty());
        assert!(listing.dirs.is_empty());

        let token = token_for(
            dir.path(),
            &["user"],
            &["l:~data/users/alice/**", "r:~data/shared/**"],
        );
        let listing = ops.list(&token, "users/alice").unwrap();
        assert_eq!(listing.files, vec!["shortcut".to_string()]);
    }
}
