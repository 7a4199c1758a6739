//! Error types for the framework core

use std::fmt;
use thiserror::Error;

/// Boxed cause carried by bundle errors (activator failures, I/O, ...)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Type code of a bundle error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleErrorKind {
    /// Malformed content or manifest
    Invalid,
    /// The resolver could not wire the bundle
    ResolveError,
    /// The bundle activator failed in start or stop
    ActivatorError,
    /// Another bundle already has the same symbolic name and version
    DuplicateBundle,
    /// A state change could not be carried out
    StateChange,
    /// The operation is not valid for this kind of bundle
    InvalidOperation,
    /// Bundle content could not be read
    ReadError,
    /// The operation is not supported by this framework
    Unsupported,
}

impl fmt::Display for BundleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleErrorKind::Invalid => "INVALID",
            BundleErrorKind::ResolveError => "RESOLVE_ERROR",
            BundleErrorKind::ActivatorError => "ACTIVATOR_ERROR",
            BundleErrorKind::DuplicateBundle => "DUPLICATE_BUNDLE",
            BundleErrorKind::StateChange => "STATECHANGE_ERROR",
            BundleErrorKind::InvalidOperation => "INVALID_OPERATION",
            BundleErrorKind::ReadError => "READ_ERROR",
            BundleErrorKind::Unsupported => "UNSUPPORTED_OPERATION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum FrameworkError {
    #[error("Bundle error ({kind}): {message}")]
    Bundle {
        kind: BundleErrorKind,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid filter syntax at position {position} in \"{filter}\": {message}")]
    InvalidSyntax {
        filter: String,
        position: usize,
        message: String,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Manifest error in header {header} (clause \"{clause}\"): {message}")]
    Manifest {
        header: String,
        clause: String,
        message: String,
    },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameworkError {
    /// Bundle error without a nested cause
    pub fn bundle(kind: BundleErrorKind, message: impl Into<String>) -> Self {
        FrameworkError::Bundle {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Bundle error wrapping a cause
    pub fn bundle_with_source(
        kind: BundleErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        FrameworkError::Bundle {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        FrameworkError::IllegalState(message.into())
    }

    /// Bundle error kind, if this is a bundle error
    pub fn bundle_error_kind(&self) -> Option<BundleErrorKind> {
        match self {
            FrameworkError::Bundle { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, FrameworkError::IllegalState(_))
    }

    /// Re-tag manifest, version and storage failures as `Invalid` bundle errors.
    ///
    /// Used at install/update time where any content problem is reported
    /// as an invalid bundle.
    pub(crate) fn into_invalid_bundle(self) -> Self {
        match self {
            FrameworkError::Bundle { .. } | FrameworkError::IllegalState(_) => self,
            other => {
                let message = other.to_string();
                FrameworkError::bundle_with_source(BundleErrorKind::Invalid, message, other)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Error returned by bundle activators
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ActivatorFailure(pub String);

impl ActivatorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        ActivatorFailure(message.into())
    }
}
