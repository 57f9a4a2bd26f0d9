//! Error taxonomy for fleet operations.
//!
//! Transient infrastructure failures (`Git`, `Timeout`) are retried and
//! downgraded by callers; programmer errors (`NotCloned`, `UnknownProject`,
//! `UnpinnedProject`) fail fast and are never absorbed.

use std::time::Duration;

/// Errors produced by fleet tracking, trigger detection, and status I/O.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Fetch was requested for a project that was never cloned. The caller
    /// must run the clone pass first.
    #[error("repo should be cloned first: {0}")]
    NotCloned(String),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("no revision pinned for project: {0}")]
    UnpinnedProject(String),

    #[error("git error: {0}")]
    Git(String),

    /// A git operation exceeded its wall-clock deadline and was killed.
    #[error("git operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid build specification: {0}")]
    Spec(String),

    #[error("document error: {0}")]
    Document(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<roxmltree::Error> for FleetError {
    fn from(e: roxmltree::Error) -> Self {
        FleetError::Document(e.to_string())
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_cloned_display() {
        let err = FleetError::NotCloned("mesa".to_string());
        assert!(err.to_string().contains("cloned first"));
        assert!(err.to_string().contains("mesa"));
    }

    #[test]
    fn test_timeout_display() {
        let err = FleetError::Timeout(Duration::from_secs(300));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_lookup_errors_name_the_project() {
        let err = FleetError::UnknownProject("drm".to_string());
        assert!(err.to_string().contains("drm"));

        let err = FleetError::UnpinnedProject("piglit".to_string());
        assert!(err.to_string().contains("piglit"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FleetError = io.into();
        assert!(matches!(err, FleetError::Io(_)));
    }
}
