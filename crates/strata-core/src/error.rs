use thiserror::Error;

use crate::schema::FieldType;

/// Canonical result for strata.
pub type Result<T> = std::result::Result<T, Error>;

/// Who is at fault for an error.
///
/// `Client` errors are caused by bad input and are always recoverable; the
/// coordinator state is untouched. `Server` errors signal a bug or a broken
/// collaborator and are surfaced as opaque failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Server,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid field type: {0}")]
    InvalidFieldType(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("duplicate name: {0}")]
    Duplicate(String),

    #[error("alias '{alias}' collides with target name")]
    AliasCollision { alias: String },

    #[error("unknown qualifier in field reference '{0}'")]
    UnknownQualifier(String),

    #[error("field '{field}' is not declared for target '{target}'")]
    UndeclaredField { target: String, field: String },

    #[error("required field '{field}' is missing for target '{target}'")]
    MissingField { target: String, field: String },

    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: String,
    },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("processor error: {0}")]
    Processor(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Processor(_) | Error::Invariant(_) => ErrorKind::Server,
            _ => ErrorKind::Client,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Client
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidEvent(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_kinds() {
        assert!(Error::Duplicate("q".into()).is_client_error());
        assert!(Error::TypeMismatch {
            field: "a".into(),
            expected: FieldType::Long,
            found: "string".into(),
        }
        .is_client_error());
        assert_eq!(Error::Invariant("x".into()).kind(), ErrorKind::Server);
        assert_eq!(Error::Processor("x".into()).kind(), ErrorKind::Server);
    }
}
