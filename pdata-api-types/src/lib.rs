//! Shared types for the pdata capability-based file-access service: the error
//! taxonomy, validated identifiers, capability expressions and mount tables,
//! and the session token shape. Kept dependency-light so every other crate in
//! the workspace (and the core crate itself) can depend on it without pulling
//! in CSV parsing, crypto, or filesystem code.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

mod error;
mod username;

pub use error::PDataError;
pub use username::Username;

pub type PDataResult<T> = Result<T, PDataError>;

/// Role names are an open enumeration declared at startup (db root's
/// `roles.csv` plus whatever the host configures as allowed roles), not a
/// fixed set of Rust variants. `Role` is a thin validated wrapper so callers
/// can't smuggle a comma or path separator into a CSV field.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Role(String);

impl Role {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), PDataError> {
        if s.is_empty()
            || s.contains(',')
            || s.contains('/')
            || s.contains('\\')
            || s.contains('\n')
            || s.contains('\r')
        {
            return Err(PDataError::InvalidInput(format!("invalid role name {s:?}")));
        }
        Ok(())
    }
}

impl FromStr for Role {
    type Err = PDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Role(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = PDataError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Role(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq<str> for Role {
    fn eq(&self, rhs: &str) -> bool {
        self.0 == *rhs
    }
}

impl PartialEq<&str> for Role {
    fn eq(&self, rhs: &&str) -> bool {
        self.0 == **rhs
    }
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_PROJECT: &str = "project";

/// A single operation a capability expression, or a request, can name.
/// `List` and its long form `list` are the same operation; only the first
/// character of the textual form is significant (spec §4.1/§4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Op {
    Read,
    Write,
    Exec,
    List,
    Delete,
}

impl Op {
    pub fn letter(self) -> char {
        match self {
            Op::Read => 'r',
            Op::Write => 'w',
            Op::Exec => 'x',
            Op::List => 'l',
            Op::Delete => 'd',
        }
    }

    /// Parses either a single-letter op (`r`, `w`, `x`, `l`, `d`) or one of
    /// the long-form aliases (`read`, `write`, `exec`, `list`, `delete`).
    /// Only the first character is significant, matching how capability
    /// expressions are matched in §4.6.
    pub fn from_token(s: &str) -> Option<Op> {
        let first = s.chars().next()?;
        match first {
            'r' => Some(Op::Read),
            'w' => Some(Op::Write),
            'x' => Some(Op::Exec),
            'l' => Some(Op::List),
            'd' => Some(Op::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Op::Read => "read",
            Op::Write => "write",
            Op::Exec => "exec",
            Op::List => "list",
            Op::Delete => "delete",
        })
    }
}

/// A parsed `"<op>:<pattern>"` capability expression (spec §3/§4.6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapabilityExpr {
    pub op: Op,
    pub pattern: String,
}

impl CapabilityExpr {
    /// Parses a raw expression. Returns `None` for malformed expressions
    /// (missing `:`, or an unrecognized op letter), per §4.6 step 1: "Skip
    /// if malformed."
    pub fn parse(raw: &str) -> Option<CapabilityExpr> {
        let (op_str, pattern) = raw.split_once(':')?;
        let op = Op::from_token(op_str)?;
        Some(CapabilityExpr {
            op,
            pattern: pattern.to_string(),
        })
    }

    pub fn is_asset_ref(&self) -> bool {
        self.pattern.starts_with("@assets:")
    }

    /// The asset-set name referenced by `@assets:<name>`, if any.
    pub fn asset_set_name(&self) -> Option<&str> {
        self.pattern.strip_prefix("@assets:")
    }
}

/// `{ alias -> absolute host directory }`, built per session by the mount
/// planner. Aliases always begin with `~` (spec §3).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MountTable {
    mounts: BTreeMap<String, PathBuf>,
    /// Insertion order, since `BTreeMap` only gives lexicographic order and
    /// §4.5's default-alias fallback needs "the first alias inserted".
    order: Vec<String>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an alias. No-op if the alias is already present (first
    /// insertion wins, mirroring ordinary namespace construction order).
    pub fn insert(&mut self, alias: impl Into<String>, target: PathBuf) {
        let alias = alias.into();
        if self.mounts.insert(alias.clone(), target).is_none() {
            self.order.push(alias);
        }
    }

    pub fn get(&self, alias: &str) -> Option<&PathBuf> {
        self.mounts.get(alias)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.mounts.contains_key(alias)
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathBuf)> {
        self.mounts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The alias the resolver falls back to for empty/relative paths:
    /// `~data` if present, else the first alias inserted (spec §4.5).
    pub fn default_alias(&self) -> Option<&str> {
        if self.mounts.contains_key("~data") {
            return Some("~data");
        }
        self.order.first().map(|s| s.as_str())
    }

    /// Finds the longest alias that is a prefix of `path` at a `/` boundary,
    /// i.e. `path == alias` or `path starts_with "alias/"`.
    pub fn longest_prefix_match<'a>(&'a self, path: &str) -> Option<(&'a str, &'a PathBuf)> {
        self.mounts
            .iter()
            .filter(|(alias, _)| {
                path == alias.as_str() || path.starts_with(&format!("{alias}/"))
            })
            .max_by_key(|(alias, _)| alias.len())
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// A validated session token, the core's sole unit of authorization context.
/// Signature verification and (de)serialization to the wire format live in
/// `pdata-ticket`; this crate only defines the shape.
#[derive(Clone, Debug)]
pub struct Token {
    pub username: Username,
    pub roles: Vec<Role>,
    pub caps: Vec<String>,
    pub mounts: MountTable,
    /// Milliseconds since the Unix epoch.
    pub exp: i64,
}

impl Token {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }

    /// The parsed, non-malformed capability expressions carried by this
    /// token. Malformed entries are silently skipped per §4.6 step 1.
    pub fn parsed_caps(&self) -> impl Iterator<Item = CapabilityExpr> + '_ {
        self.caps.iter().filter_map(|raw| CapabilityExpr::parse(raw))
    }
}
