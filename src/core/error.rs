//! Error handling for image publication
//!
//! This module provides the error taxonomy of the publication workflow with
//! recovery guidance, using the thiserror crate for ergonomic error handling.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for image publication operations
#[derive(Error, Debug)]
pub enum PublishError {
    // Input errors, always raised before any network call
    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Lookup errors
    #[error("no image matching '{name_or_id}' was found")]
    NotFound { name_or_id: String },

    #[error("{count} images are named '{name}', use an id instead")]
    Ambiguous { name: String, count: usize },

    // Wire errors
    #[error("{method} {url} failed{}: {message}", status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    Transport {
        method: String,
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("staging {object} failed: {message}")]
    Staging { object: String, message: String },

    #[error("import task {task_id} failed: {message}")]
    ImportFailed { task_id: String, message: String },

    #[error("timed out after {}s waiting for {what}", after.as_secs_f64())]
    Timeout { what: String, after: Duration },
}

impl PublishError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status attached to a transport failure, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Check if the server reported a condition that may clear on its own.
    ///
    /// Classification is by status code only: 5xx and 429.
    pub fn is_transient(&self) -> bool {
        matches!(self.status(), Some(500..=599) | Some(429))
    }

    /// Check if the caller may retry the whole publication
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. }
                | Self::Config(_)
                | Self::Ambiguous { .. }
                | Self::ImportFailed { .. }
        )
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Validation { .. } => vec!["Fix the offending value and run again"],
            Self::Config(_) => vec![
                "Check .image-publisher.yaml",
                "Check IMAGE_PUBLISHER_* environment variables",
            ],
            Self::Io { .. } => vec![
                "Check that the artifact path exists",
                "Check read permissions on the artifact",
            ],
            Self::NotFound { .. } => vec!["List images to check the name or id"],
            Self::Ambiguous { .. } => vec!["Refer to the image by id"],
            Self::Transport { .. } => vec![
                "Check the catalog endpoint and token",
                "Retry later if the catalog is overloaded",
            ],
            Self::Staging { .. } => vec![
                "Check object store quota and permissions",
                "Partially uploaded segments may remain in the segments container",
            ],
            Self::ImportFailed { .. } => vec![
                "Inspect the task message for the catalog's reason",
                "Check that the disk format matches the artifact",
            ],
            Self::Timeout { .. } => vec![
                "Raise the timeout",
                "Publish with wait disabled and check the image later",
            ],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Ambiguous { .. } => "AMBIGUOUS",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Staging { .. } => "STAGING_ERROR",
            Self::ImportFailed { .. } => "IMPORT_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }
}

/// A best-effort cleanup step that itself failed.
///
/// Never replaces the error that triggered the rollback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rollback of {resource} failed: {message}")]
pub struct RollbackError {
    pub resource: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, PublishError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(status: Option<u16>) -> PublishError {
        PublishError::Transport {
            method: "GET".to_string(),
            url: "https://image.example.com/v2/tasks/1".to_string(),
            status,
            message: "Random error".to_string(),
        }
    }

    #[test]
    fn test_transient_classification_by_status() {
        assert!(transport(Some(503)).is_transient());
        assert!(transport(Some(500)).is_transient());
        assert!(transport(Some(429)).is_transient());
        assert!(!transport(Some(404)).is_transient());
        assert!(!transport(Some(409)).is_transient());
        assert!(!transport(None).is_transient());
    }

    #[test]
    fn test_transient_ignores_message_text() {
        let error = PublishError::Staging {
            object: "images/a".to_string(),
            message: "503 Service Unavailable".to_string(),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn test_validation_error() {
        let error = PublishError::validation("min_disk", "'fish' is not an integer");

        assert_eq!(error.code(), "VALIDATION_ERROR");
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("min_disk"));
    }

    #[test]
    fn test_transport_display_includes_status() {
        let display = transport(Some(503)).to_string();
        assert!(display.contains("status 503"));
        assert!(display.contains("Random error"));

        let display = transport(None).to_string();
        assert!(!display.contains("status"));
    }

    #[test]
    fn test_timeout_error() {
        let error = PublishError::Timeout {
            what: "task 42".to_string(),
            after: Duration::from_secs(2),
        };

        assert_eq!(error.code(), "TIMEOUT");
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("task 42"));
    }

    #[test]
    fn test_import_failed_not_recoverable() {
        let error = PublishError::ImportFailed {
            task_id: "t-1".to_string(),
            message: "bad header".to_string(),
        };

        assert!(!error.is_recoverable());
        assert!(error.suggested_actions().len() >= 2);
    }

    #[test]
    fn test_every_error_has_actions() {
        let errors = vec![
            PublishError::Config("x".to_string()),
            PublishError::NotFound {
                name_or_id: "a".to_string(),
            },
            PublishError::Ambiguous {
                name: "a".to_string(),
                count: 2,
            },
            transport(Some(500)),
        ];

        for error in errors {
            assert!(!error.suggested_actions().is_empty(), "{}", error.code());
        }
    }

    #[test]
    fn test_rollback_error_display() {
        let error = RollbackError {
            resource: "image 42".to_string(),
            message: "403 Forbidden".to_string(),
        };
        assert_eq!(error.to_string(), "rollback of image 42 failed: 403 Forbidden");
    }
}
