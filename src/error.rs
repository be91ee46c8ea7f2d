//! Crate-wide error type.
//!
//! Every fallible operation in the ingest pipeline returns [`IngestError`].
//! The variants line up with the error kinds a caller needs to react to
//! differently: a [`IngestError::ParseError`] is logged and the event
//! dropped, a [`IngestError::TooEarlyForStateAssociation`] is dropped
//! silently, a [`IngestError::BackendFatal`] propagates out to the FFI
//! boundary as a `:STORAGE:ERROR:` callback.

use std::fmt;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A command argument could not be parsed into its typed field.
    #[error("parse error: field `{field}` had invalid value `{value}`")]
    ParseError { field: String, value: String },

    /// An unrecognised command was presented to the dispatcher.
    #[error("unregistered command: {0}")]
    UnregisteredCommand(String),

    /// A command was registered twice.
    #[error("duplicate registration for command: {0}")]
    DuplicateRegistration(String),

    /// A state event referenced an entity that has not yet been registered.
    /// Benign during the first frames of a mission; callers drop silently.
    #[error("too early for state association: object {0} not yet registered")]
    TooEarlyForStateAssociation(u16),

    /// A reference that should already exist in a cache was missing (chat
    /// sender, kill victim, marker name).
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// A database/write failure for a single batch. The batch is dropped.
    #[error("backend transient error: {0}")]
    BackendTransient(String),

    /// The backend could not be initialised at all.
    #[error("backend fatal error: {0}")]
    BackendFatal(String),

    /// The configuration document failed validation.
    #[error("config error: {0}")]
    ConfigError(String),

    /// A lock was poisoned or otherwise unavailable.
    #[error("lock unavailable")]
    LockError,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "relational-embedded")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "relational-server")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl IngestError {
    pub fn parse(field: impl Into<String>, value: impl Into<String>) -> Self {
        IngestError::ParseError {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether this error represents a benign, expected condition that
    /// should be dropped without a warn-level log (the dispatcher's
    /// buffered consumers use this to decide log severity).
    pub fn is_silent(&self) -> bool {
        matches!(self, IngestError::TooEarlyForStateAssociation(_))
    }
}

/// A lightweight error for functions that validate a positional argument
/// vector's shape before any individual field parse begins.
#[derive(Debug)]
pub struct ArityError {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for ArityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} arguments, got {}",
            self.expected, self.actual
        )
    }
}

impl From<ArityError> for IngestError {
    fn from(e: ArityError) -> Self {
        IngestError::parse("argc", e.to_string())
    }
}
