//! `PathResolver` (spec §4.5), grounded on `pbs-config/src/acl.rs`'s
//! `split_acl_path`/path-component-walk idiom, generalized from ACL path
//! matching to virtual-path-to-host-path resolution.

use std::path::{Component, Path, PathBuf};

use pdata_api_types::{PDataError, Token};

/// Collapses runs of `/` into a single separator (spec §4.5 precondition
/// 3: "the resolver may collapse runs of `/` before the check").
fn collapse_separators(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_slash = false;
    for c in s.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    out
}

fn validate_segment(seg: &str, idx: usize) -> Result<(), PDataError> {
    if seg == ".." || seg.contains("..\\") || (seg == "." && idx > 0) {
        return Err(PDataError::BadPath(format!("invalid path segment {seg:?}")));
    }
    Ok(())
}

/// Lexically collapses `.`/`..` components without touching the
/// filesystem (`Path::canonicalize` requires the path to already exist,
/// which is too strong for paths we are about to create).
pub(crate) fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

/// Translates a virtual or relative path (in the token's namespace) into a
/// vetted absolute host path (spec §4.5).
pub fn resolve(token: &Token, virtual_path: &str) -> Result<PathBuf, PDataError> {
    if virtual_path.contains('\0') {
        return Err(PDataError::BadPath("path contains a NUL byte".into()));
    }
    if virtual_path.chars().enumerate().any(|(i, c)| i > 0 && c == '~') {
        return Err(PDataError::BadPath("literal '~' outside first position".into()));
    }

    let collapsed = collapse_separators(virtual_path);

    if collapsed.is_empty() || collapsed == "." || collapsed == "/" {
        let alias = token
            .mounts
            .default_alias()
            .ok_or_else(|| PDataError::BadPath("session has no mounts".into()))?;
        return Ok(token.mounts.get(alias).unwrap().clone());
    }

    let segments: Vec<&str> = collapsed.split('/').filter(|s| !s.is_empty()).collect();
    for (idx, seg) in segments.iter().enumerate() {
        validate_segment(seg, idx)?;
    }

    if collapsed.starts_with('~') {
        let (alias, mount_target) = token
            .mounts
            .longest_prefix_match(&collapsed)
            .ok_or_else(|| PDataError::BadPath(format!("unknown mount alias in {collapsed:?}")))?;

        let remainder = collapsed
            .strip_prefix(alias)
            .unwrap_or("")
            .trim_start_matches('/');
        let resolved = if remainder.is_empty() {
            mount_target.clone()
        } else {
            mount_target.join(remainder)
        };

        let normalized = normalize_lexical(&resolved);
        if !normalized.starts_with(mount_target) {
            return Err(PDataError::PermissionDenied);
        }
        return Ok(normalized);
    }

    // no leading alias: prepend the session's default alias and re-resolve.
    let default_alias = token
        .mounts
        .default_alias()
        .ok_or_else(|| PDataError::BadPath("session has no mounts".into()))?
        .to_string();
    let reprefixed = format!("{default_alias}/{collapsed}");
    resolve(token, &reprefixed)
}
