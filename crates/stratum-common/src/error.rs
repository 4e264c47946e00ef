//! Common error types for the Stratum snapshotter.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`StratumError`].
pub type StratumResult<T> = Result<T, StratumError>;

/// Flat classification of a [`StratumError`], for callers that branch on cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced key, layer or dataset is absent.
    NotFound,
    /// Key collision on Prepare/View/Commit.
    AlreadyExists,
    /// Operation not valid for the layer's current kind.
    InvalidState,
    /// Remove blocked by dependent layers.
    HasChildren,
    /// Backend resource in use.
    Busy,
    /// Backend unreachable, privilege denied, pool absent, or manager closed.
    Unavailable,
    /// Key rejected by the naming rules.
    InvalidKey,
    /// The caller cancelled the operation.
    Cancelled,
    /// Anything else.
    Unknown,
}

/// Errors returned by every Stratum operation.
#[derive(Error, Diagnostic, Debug)]
pub enum StratumError {
    /// Layer or backend object not found.
    #[error("Not found: {what}")]
    #[diagnostic(code(stratum::layer::not_found))]
    NotFound {
        /// The key or backend name that was not found.
        what: String,
    },

    /// Layer key or backend object already exists.
    #[error("Already exists: {what}")]
    #[diagnostic(code(stratum::layer::already_exists))]
    AlreadyExists {
        /// The colliding key or backend name.
        what: String,
    },

    /// The layer is in the wrong state for this operation.
    #[error("Invalid state for {key}: {reason}")]
    #[diagnostic(
        code(stratum::layer::invalid_state),
        help("Only layers created with Prepare can be committed, and only once")
    )]
    InvalidState {
        /// The layer key.
        key: String,
        /// Why the operation is not allowed.
        reason: String,
    },

    /// The layer still has dependent layers.
    #[error("Layer {key} has {children} dependent layer(s)")]
    #[diagnostic(
        code(stratum::layer::has_children),
        help("Remove the layers prepared from this one first")
    )]
    HasChildren {
        /// The layer key.
        key: String,
        /// Number of dependent layers found.
        children: usize,
    },

    /// Backend resource is busy.
    #[error("Busy: {resource}: {detail}")]
    #[diagnostic(
        code(stratum::backend::busy),
        help("The dataset is mounted or has dependents; retry once it is released")
    )]
    Busy {
        /// The busy dataset or snapshot.
        resource: String,
        /// Backend-provided detail.
        detail: String,
    },

    /// Backend unreachable or not permitted.
    #[error("Backend unavailable: {detail}")]
    #[diagnostic(
        code(stratum::backend::unavailable),
        help("Check that the pool is imported and that you have sufficient privileges (sudo)")
    )]
    Unavailable {
        /// Backend-provided detail.
        detail: String,
    },

    /// Invalid layer key.
    #[error("Invalid layer key {key:?}: {reason}")]
    #[diagnostic(
        code(stratum::layer::invalid_key),
        help("Keys are printable ASCII without whitespace or '@', at most 200 bytes")
    )]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// The violated rule.
        reason: String,
    },

    /// Operation cancelled by the caller.
    #[error("Cancelled: {operation}")]
    #[diagnostic(code(stratum::cancelled))]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// Unclassified backend failure.
    #[error("Backend error: {detail}")]
    #[diagnostic(code(stratum::backend::unknown))]
    Unknown {
        /// Backend-provided detail.
        detail: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(stratum::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(stratum::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(stratum::serialization))]
    Serialization(String),
}

impl StratumError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::HasChildren { .. } => ErrorKind::HasChildren,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Unknown { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Unknown,
        }
    }

    /// Shorthand for [`StratumError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Shorthand for [`StratumError::AlreadyExists`].
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Shorthand for [`StratumError::InvalidState`].
    pub fn invalid_state(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::Serialization(err.to_string())
    }
}
