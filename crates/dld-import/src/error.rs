//! Error type for staging datasets into the import directory

use std::io;
use std::path::{Path, PathBuf};

use dld_core::StreamError;

use crate::ledger::AlreadyStagingError;

/// Error from staging a dataset or reconciling the import directory.
///
/// Skippable errors (duplicate source, staging conflict, non-http location)
/// are logged and the offending dataset is skipped; everything else aborts
/// the run.
#[derive(Debug)]
pub enum StageError {
    /// Missing/ambiguous source keys, unreadable list file, no target graph
    Config(String),
    /// Another dataset already claimed this canonical key
    Duplicate { source: String, key: String },
    AlreadyStaging(AlreadyStagingError),
    /// Location that is not an http(s) URL
    InvalidLocation(String),
    /// Payload whose companion would be the run-wide `global.graph`
    ReservedName { source: String, file_name: String },
    Io { path: PathBuf, source: io::Error },
    Stream { url: String, source: StreamError },
    /// Shutdown requested before the run finished
    Interrupted,
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Duplicate { source, key } => {
                write!(f, "duplicate source '{source}' (stripped: '{key}')")
            }
            Self::AlreadyStaging(e) => write!(f, "{e}"),
            Self::InvalidLocation(loc) => {
                write!(f, "location does not appear to be a http(s)-URL: {loc}")
            }
            Self::ReservedName { source, file_name } => write!(
                f,
                "source '{source}' stages as '{file_name}', whose graph file would replace global.graph"
            ),
            Self::Io { path, source } => write!(f, "IO error at {}: {source}", path.display()),
            Self::Stream { url, source } => write!(f, "{url}: {source}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AlreadyStaging(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::Stream { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<AlreadyStagingError> for StageError {
    fn from(e: AlreadyStagingError) -> Self {
        Self::AlreadyStaging(e)
    }
}

impl StageError {
    /// Whether the run continues after logging this error and skipping the dataset.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. }
                | Self::AlreadyStaging(_)
                | Self::InvalidLocation(_)
                | Self::ReservedName { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// `map_err` adapter attaching the path an I/O error happened at.
    pub fn io_at(path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skippable_classes() {
        let dup = StageError::Duplicate {
            source: "/a/x.ttl".into(),
            key: "x".into(),
        };
        assert!(dup.is_skippable());
        assert!(StageError::InvalidLocation("ftp://x".into()).is_skippable());
        let reserved = StageError::ReservedName {
            source: "/a/global.gz".into(),
            file_name: "global.gz".into(),
        };
        assert!(reserved.is_skippable());
        assert!(
            StageError::from(AlreadyStagingError { key: "x".into() }).is_skippable()
        );
        assert!(!StageError::config("no graph").is_skippable());
        assert!(!StageError::Interrupted.is_skippable());
    }

    #[test]
    fn display_duplicate() {
        let err = StageError::Duplicate {
            source: "/b/x.nt".into(),
            key: "x".into(),
        };
        assert_eq!(err.to_string(), "duplicate source '/b/x.nt' (stripped: 'x')");
    }

    #[test]
    fn io_at_keeps_path() {
        let err = Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "gone"))
            .map_err(StageError::io_at(Path::new("/import/x.ttl")))
            .unwrap_err();
        assert!(err.to_string().contains("/import/x.ttl"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
