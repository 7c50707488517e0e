use thiserror::Error;

/// The core error taxonomy (spec §7). One tagged variant per failure mode,
/// mirroring how the teacher's domain errors each correspond to one precise
/// `bail!()` call site rather than a single catch-all.
#[derive(Error, Debug)]
pub enum PDataError {
    /// Credential validation failed, or a token failed signature/expiry
    /// checks. Deliberately never says which.
    #[error("authentication failed")]
    AuthFailure,

    /// Capability check failed, or the resolved path fell outside a mount.
    /// Never distinguishes "forbidden" from "not found", to avoid leaking
    /// the existence of a path the caller cannot see.
    #[error("permission denied")]
    PermissionDenied,

    /// Virtual path failed structural validation: literal `~` misuse,
    /// traversal, NUL bytes, or an unknown mount alias.
    #[error("bad path: {0}")]
    BadPath(String),

    /// Path resolved and was permitted, but no such filesystem entry
    /// exists. Only ever returned when the caller has list permission on
    /// the containing directory.
    #[error("not found")]
    NotFound,

    /// User creation against an existing username, or symlink creation
    /// where the target exists and is a directory.
    #[error("already exists")]
    AlreadyExists,

    /// A structurally invalid argument: empty username, missing payload,
    /// invalid role name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The underlying host filesystem failed. Mutating components roll
    /// in-memory state back to the last consistent snapshot before
    /// returning this.
    #[error("io error: {0}")]
    IoError(String),

    /// Concurrent modification was detected, e.g. an atomic rename's
    /// target vanished between check and rename.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<std::io::Error> for PDataError {
    fn from(e: std::io::Error) -> Self {
        PDataError::IoError(e.to_string())
    }
}
