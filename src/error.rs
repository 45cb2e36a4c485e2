// src/error.rs
//
// Error taxonomy surfaced to callers. Every user-visible failure carries the
// originating operation, profile, and key so callers never have to parse
// message strings.

use std::fmt;

pub type Result<T> = std::result::Result<T, MscError>;

/// Classification of a failure. Only `Unavailable` is retried, and only at the
/// provider boundary; classified errors surface to the client unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The key or manifest generation does not exist.
    NotFound,
    /// Credentials are missing, invalid, or denied.
    Unauthorized,
    /// ETag mismatch where one was required.
    PreconditionFailed,
    /// Transient error exhausted after retry (timeout, throttling, 5xx).
    Unavailable,
    /// Malformed URL, reserved profile name, configuration schema violation.
    InvalidArgument,
    /// Index references missing parts or parts fail to parse.
    ManifestCorrupt,
    /// Local disk failure; callers may retry with cache bypass.
    CacheError,
    /// Concurrent commit or write rejected by the backend.
    Conflict,
}

impl ErrorKind {
    /// Stable lowercase label, used for telemetry status tags (`error.{kind}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ManifestCorrupt => "manifest_corrupt",
            ErrorKind::CacheError => "cache_error",
            ErrorKind::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error for every fallible mscio operation.
#[derive(Debug, Clone)]
pub struct MscError {
    kind: ErrorKind,
    message: String,
    /// Operation that originated the failure ("read", "write", "list", ...).
    operation: Option<&'static str>,
    profile: Option<String>,
    key: Option<String>,
}

impl MscError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            profile: None,
            key: None,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(ErrorKind::NotFound, format!("object not found: {key}")).with_key(key)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn manifest_corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ManifestCorrupt, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CacheError, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn operation(&self) -> Option<&'static str> {
        self.operation
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Transient failures may be retried by the provider retry layer.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Unavailable
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach operation context. Existing context is kept so the innermost
    /// frame (closest to the backend) wins.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation.get_or_insert(operation);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile.get_or_insert(profile.into());
        self
    }
}

impl std::error::Error for MscError {}

impl fmt::Display for MscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(op) = self.operation {
            write!(f, " during {op}")?;
        }
        match (&self.profile, &self.key) {
            (Some(profile), Some(key)) => write!(f, " on msc://{profile}/{key}")?,
            (Some(profile), None) => write!(f, " on profile {profile}")?,
            (None, Some(key)) => write!(f, " on {key}")?,
            (None, None) => {}
        }
        write!(f, ": {}", self.message)
    }
}

/// Classify a filesystem error from the POSIX provider or the cache directory.
pub(crate) fn classify_io_error(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as IoKind;
    match err.kind() {
        IoKind::NotFound => ErrorKind::NotFound,
        IoKind::PermissionDenied => ErrorKind::Unauthorized,
        IoKind::AlreadyExists => ErrorKind::Conflict,
        _ => ErrorKind::Unavailable,
    }
}

impl From<std::io::Error> for MscError {
    fn from(err: std::io::Error) -> Self {
        MscError::new(classify_io_error(&err), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_innermost_wins() {
        let err = MscError::not_found("a/b.txt")
            .with_operation("read")
            .with_operation("sync")
            .with_profile("data");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.operation(), Some("read"));
        assert_eq!(err.profile(), Some("data"));
        assert_eq!(err.key(), Some("a/b.txt"));
        let rendered = err.to_string();
        assert!(rendered.contains("not_found during read on msc://data/a/b.txt"));
    }

    #[test]
    fn test_io_error_classification() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(MscError::from(nf).kind(), ErrorKind::NotFound);
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(MscError::from(denied).kind(), ErrorKind::Unauthorized);
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = MscError::from(timeout);
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.is_transient());
    }
}
