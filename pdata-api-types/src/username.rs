use std::fmt;
use std::str::FromStr;

use crate::error::PDataError;

/// A validated username (spec §3): non-empty, case-sensitive, and free of
/// `,`, `/`, `\`, `..`, newlines, or a leading `.` — the set of bytes that
/// would let a username escape its row in a CSV file or its own directory
/// on disk.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Username(String);

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), PDataError> {
        if s.is_empty() {
            return Err(PDataError::InvalidInput("username must not be empty".into()));
        }
        if s.starts_with('.') {
            return Err(PDataError::InvalidInput(format!(
                "username {s:?} must not start with '.'"
            )));
        }
        if s.contains("..")
            || s.contains(',')
            || s.contains('/')
            || s.contains('\\')
            || s.contains('\n')
            || s.contains('\r')
        {
            return Err(PDataError::InvalidInput(format!("invalid username {s:?}")));
        }
        Ok(())
    }
}

impl FromStr for Username {
    type Err = PDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Username(s.to_string()))
    }
}

impl TryFrom<String> for Username {
    type Error = PDataError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Username(s))
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Username {
    fn eq(&self, rhs: &str) -> bool {
        self.0 == *rhs
    }
}

impl PartialEq<&str> for Username {
    fn eq(&self, rhs: &&str) -> bool {
        self.0 == **rhs
    }
}
