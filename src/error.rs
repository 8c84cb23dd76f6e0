use thiserror::Error;

/// Boxed cause preserved from the backend that produced the failure.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The shared error taxonomy every backend reports through.
///
/// Backend-specific failures (content-resolver errors, archive-library
/// errors, nonzero exit from the privileged shell) are caught at the
/// adapter boundary and re-thrown as one of these variants, with the
/// original error kept on the `source()` chain. Raw library errors never
/// cross the VFS contract.
#[derive(Debug, Error)]
pub enum FsError {
    /// The target of the operation does not exist.
    #[error("{path}: not found")]
    NotFound {
        path: String,
        #[source]
        source: Option<Cause>,
    },

    /// The caller is not permitted to perform the operation.
    #[error("{path}: access denied{}", fmt_detail(.detail))]
    AccessDenied {
        path: String,
        detail: Option<String>,
        #[source]
        source: Option<Cause>,
    },

    /// The backend cannot express the requested operation at all
    /// (e.g. a symlink in a format that cannot represent one).
    #[error("{path}: unsupported operation: {operation}")]
    Unsupported { path: String, operation: String },

    /// Catch-all I/O or library failure.
    #[error("{path}: {message}")]
    Generic {
        path: String,
        message: String,
        #[source]
        source: Option<Cause>,
    },
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl FsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound { path: path.into(), source: None }
    }

    pub fn access_denied(path: impl Into<String>) -> Self {
        FsError::AccessDenied { path: path.into(), detail: None, source: None }
    }

    pub fn access_denied_with(path: impl Into<String>, detail: impl Into<String>) -> Self {
        FsError::AccessDenied {
            path: path.into(),
            detail: Some(detail.into()),
            source: None,
        }
    }

    pub fn unsupported(path: impl Into<String>, operation: impl Into<String>) -> Self {
        FsError::Unsupported { path: path.into(), operation: operation.into() }
    }

    pub fn generic(path: impl Into<String>, message: impl Into<String>) -> Self {
        FsError::Generic { path: path.into(), message: message.into(), source: None }
    }

    /// Attach the lower-level failure that caused this error.
    pub fn with_source(mut self, cause: impl Into<Cause>) -> Self {
        match &mut self {
            FsError::NotFound { source, .. }
            | FsError::AccessDenied { source, .. }
            | FsError::Generic { source, .. } => *source = Some(cause.into()),
            FsError::Unsupported { .. } => {}
        }
        self
    }

    /// Translate a `std::io::Error` into the taxonomy, tagging the locator
    /// it happened on.
    pub fn from_io(err: std::io::Error, path: impl Into<String>) -> Self {
        use std::io::ErrorKind;
        let path = path.into();
        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound { path, source: Some(err.into()) },
            ErrorKind::PermissionDenied => {
                FsError::AccessDenied { path, detail: None, source: Some(err.into()) }
            }
            ErrorKind::Unsupported => FsError::Unsupported {
                path,
                operation: err.to_string(),
            },
            _ => FsError::Generic { path, message: err.to_string(), source: Some(err.into()) },
        }
    }

    /// The locator the failure was reported against.
    pub fn path(&self) -> &str {
        match self {
            FsError::NotFound { path, .. }
            | FsError::AccessDenied { path, .. }
            | FsError::Unsupported { path, .. }
            | FsError::Generic { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, FsError::AccessDenied { .. })
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_error_kinds_map_to_taxonomy() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(FsError::from_io(err, "/a").is_not_found());

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(FsError::from_io(err, "/a").is_access_denied());

        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(FsError::from_io(err, "/a"), FsError::Generic { .. }));
    }

    #[test]
    fn cause_is_preserved_on_the_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "backend says no");
        let err = FsError::generic("/a/b", "copy failed").with_source(io);
        let source = err.source().expect("source retained");
        assert!(source.to_string().contains("backend says no"));
    }
}
