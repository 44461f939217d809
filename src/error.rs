//! Error types for scans and report output.
//!
//! Anything touching a scan root or an output destination is fatal and
//! surfaces as a [`ReporterError`] naming the failing path. Problems local to
//! a single source file are [`ParseWarning`]s: they are recorded in the
//! dependency report and never abort a scan.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("path not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output destination could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to parse config at {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("python grammar unavailable: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),
}

impl ReporterError {
    /// Classify an I/O failure on `path` as one of the path errors.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::Unreadable {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub fn write_failed(path: &Path, err: io::Error) -> Self {
        Self::Serialization {
            path: path.to_path_buf(),
            source: err,
        }
    }

    /// The path this error is about, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path }
            | Self::PermissionDenied { path }
            | Self::NotADirectory { path }
            | Self::Unreadable { path, .. }
            | Self::Serialization { path, .. }
            | Self::Config { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// A source file that could not be statically analyzed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParseWarning {
    pub path: String,
    pub message: String,
}

impl ParseWarning {
    pub fn new(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string_lossy().replace('\\', "/"),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = ReporterError::from_io(
            Path::new("/missing/root"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ReporterError::NotFound { .. }));
        assert_eq!(err.to_string(), "path not found: /missing/root");
    }

    #[test]
    fn io_permission_maps_to_permission_denied() {
        let err = ReporterError::from_io(
            Path::new("/locked"),
            io::Error::new(io::ErrorKind::PermissionDenied, "no"),
        );
        assert!(matches!(err, ReporterError::PermissionDenied { .. }));
        assert_eq!(err.path(), Some(Path::new("/locked")));
    }

    #[test]
    fn serialization_error_names_destination() {
        let err = ReporterError::write_failed(
            Path::new("out/deps.json"),
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("out/deps.json"));
        assert!(err.to_string().contains("disk full"));
    }
}
