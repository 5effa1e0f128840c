use ::std::{io, path::PathBuf};
use thiserror::Error;

/// Coarse classification of [`DatabaseError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid identifier, scheme, mode, or memory budget
    Configuration,
    /// Blob files truncated or damaged, or a table that cannot be built
    DataCorruption,
    Io,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Unknown database identifier {0:?}")]
    UnknownDatabase(String),
    #[error("Database not found at {0:?}")]
    NotFound(PathBuf),
    #[error("Malformed database {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("Invalid output scheme {0:?}")]
    InvalidScheme(String),
    #[error("Invalid backend mode {0:?}, expected one of: array, string, bytes, disk")]
    InvalidMode(String),
    #[error(
        "Database {tier} needs about {required_mb}MB in array mode, only {available_mb}MB available; \
         use a blob mode (string, bytes or disk) or a smaller database"
    )]
    MemoryBudget {
        tier: &'static str,
        required_mb: u64,
        available_mb: u64,
    },
    #[error("Corrupted blob {path:?}: {reason}")]
    Corrupted { path: PathBuf, reason: &'static str },
    #[error("Hash table full after probing {slots} slots")]
    TableFull { slots: u32 },
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    #[error("Io error at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DatabaseError {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        use DatabaseError::*;
        match self {
            UnknownDatabase(_)
            | NotFound(_)
            | Malformed { .. }
            | InvalidScheme(_)
            | InvalidMode(_)
            | MemoryBudget { .. } => ErrorKind::Configuration,
            Corrupted { .. } | TableFull { .. } | OutOfRange(_) => ErrorKind::DataCorruption,
            Io { .. } => ErrorKind::Io,
        }
    }

    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    #[inline]
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(
            DatabaseError::InvalidMode("ram".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DatabaseError::TableFull { slots: 10 }.kind(),
            ErrorKind::DataCorruption
        );
        let err = DatabaseError::io("/tmp/x")(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_not_found_is_distinct_from_malformed() {
        let not_found = DatabaseError::NotFound("a".into());
        let malformed = DatabaseError::malformed("a", "no languages");
        assert!(matches!(not_found, DatabaseError::NotFound(_)));
        assert!(matches!(malformed, DatabaseError::Malformed { .. }));
        assert_eq!(malformed.to_string(), "Malformed database \"a\": no languages");
    }
}
