//! `CapabilityMatcher` (spec §4.6). `pathpatterns`, the teacher's actual
//! glob-matching dependency, is unavailable at a compatible version from
//! this environment's registry mirror (it pins `0.3`, only `0.1.2`
//! resolves here), so this grammar is hand-rolled — the same way the
//! teacher hand-rolls its own ACL path matching in `acl.rs` rather than
//! reaching for a crate.

use pdata_config::CapabilityCatalog;
use pdata_api_types::{Op, Token};

/// Decides whether `token`'s capabilities grant `op` on `virtual_path`
/// (spec §4.6). Matching is OR across capabilities; there is no "deny".
pub fn has_cap(token: &Token, op: Op, virtual_path: &str, catalog: &CapabilityCatalog) -> bool {
    for cap in token.parsed_caps() {
        if cap.op.letter() != op.letter() {
            continue;
        }

        if cap.is_asset_ref() {
            let Some(set_name) = cap.asset_set_name() else {
                continue;
            };
            let Some(globs) = catalog.asset_set(set_name) else {
                continue;
            };
            if globs.iter().any(|g| glob_match(g, virtual_path)) {
                return true;
            }
            continue;
        }

        let expanded_pattern = expand_alias(&cap.pattern, token);
        let expanded_path = expand_alias(&qualify_vpath(virtual_path, token), token);
        if glob_match(&expanded_pattern, &expanded_path) {
            return true;
        }
    }
    false
}

/// Applies the resolver's alias-prefixing rule (spec §4.5) to a virtual
/// path without resolving it to a host path: relative paths are prefixed
/// with the session's default alias, so they compare on the same ground
/// as alias-qualified capability patterns.
fn qualify_vpath(vpath: &str, token: &Token) -> String {
    if vpath.is_empty() || vpath == "." || vpath == "/" {
        return token.mounts.default_alias().unwrap_or_default().to_string();
    }
    if vpath.starts_with('~') {
        return vpath.to_string();
    }
    match token.mounts.default_alias() {
        Some(alias) => format!("{alias}/{}", vpath.trim_start_matches('/')),
        None => vpath.to_string(),
    }
}

/// Textually replaces a leading alias with its mount target string, so
/// that differently-routed capability patterns and request paths compare
/// on the same ground (spec §4.6 step 4).
fn expand_alias(s: &str, token: &Token) -> String {
    match token.mounts.longest_prefix_match(s) {
        Some((alias, target)) => {
            let remainder = s.strip_prefix(alias).unwrap_or("");
            format!("{}{}", target.to_string_lossy(), remainder)
        }
        None => s.to_string(),
    }
}

/// Restricted shell-glob matcher: `*` (no `/`), `**` (any depth, including
/// zero segments), `?` (single char), `[...]` (char class).
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let path_segs: Vec<&str> = path.split('/').collect();
    match_segments(&pat_segs, &path_segs)
}

fn match_segments(pat: &[&str], path: &[&str]) -> bool {
    match pat.split_first() {
        None => path.is_empty(),
        Some((&"**", prest)) => {
            if match_segments(prest, path) {
                return true;
            }
            match path.split_first() {
                Some((_, rest)) => match_segments(pat, rest),
                None => false,
            }
        }
        Some((p0, prest)) => match path.split_first() {
            Some((s0, srest)) if segment_match(p0, s0) => match_segments(prest, srest),
            _ => false,
        },
    }
}

fn segment_match(pattern: &str, text: &str) -> bool {
    let pchars: Vec<char> = pattern.chars().collect();
    let tchars: Vec<char> = text.chars().collect();
    segment_match_chars(&pchars, &tchars)
}

fn segment_match_chars(p: &[char], t: &[char]) -> bool {
    match p.split_first() {
        None => t.is_empty(),
        Some(('*', prest)) => {
            if segment_match_chars(prest, t) {
                return true;
            }
            match t.split_first() {
                Some((_, trest)) => segment_match_chars(p, trest),
                None => false,
            }
        }
        Some(('?', prest)) => match t.split_first() {
            Some((_, trest)) => segment_match_chars(prest, trest),
            None => false,
        },
        Some(('[', _)) => match p.iter().position(|&c| c == ']') {
            Some(close_idx) => {
                let class = &p[1..close_idx];
                match t.split_first() {
                    Some((&tc, trest)) if class_match(class, tc) => {
                        segment_match_chars(&p[close_idx + 1..], trest)
                    }
                    _ => false,
                }
            }
            None => match t.split_first() {
                Some((&'[', trest)) => segment_match_chars(&p[1..], trest),
                _ => false,
            },
        },
        Some((&pc, prest)) => match t.split_first() {
            Some((&tc, trest)) if tc == pc => segment_match_chars(prest, trest),
            _ => false,
        },
    }
}

fn class_match(class: &[char], c: char) -> bool {
    let negate = matches!(class.first(), Some('!') | Some('^'));
    let class = if negate { &class[1..] } else { class };
    let mut i = 0;
    let mut matched = false;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    matched != negate
}
