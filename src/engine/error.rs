use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the automation engine
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum AutomationError {
    /// No template image was supplied (or it could not be loaded)
    #[error("Template missing: {0}")]
    TemplateMissing(String),

    /// A group lookup by name found nothing
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// The reserved root group may never be deleted or reparented
    #[error("Root group '{0}' cannot be deleted or moved")]
    RootGroupProtected(String),

    /// Coordinates landed outside the screen; corrected by clamping, never fatal
    #[error("Coordinate out of bounds: ({x}, {y}) on {width}x{height} screen")]
    CoordinateOutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    /// A task attempt exceeded its timeout budget
    #[error("Task timed out after {0}s")]
    Timeout(u64),

    /// Screen capture failure
    #[error("Capture error: {0}")]
    Capture(String),

    /// Any other actuator or matcher failure within an attempt
    #[error("Attempt failed: {0}")]
    Attempt(String),

    /// I/O errors (file reading, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl AutomationError {
    /// Convert from std::io::Error
    pub fn from_io(err: std::io::Error) -> Self {
        AutomationError::Io(err.to_string())
    }

    /// Convert from serde_json::Error
    pub fn from_serde(err: serde_json::Error) -> Self {
        AutomationError::Deserialization(err.to_string())
    }

    /// Whether this error terminates the task immediately.
    ///
    /// A timeout aborts the current task on the spot: no further retries and
    /// no backup-chain fallback. Everything else attempt-level counts against
    /// `retry_count` like an ordinary failed attempt.
    pub fn fast_fail(&self) -> bool {
        matches!(self, AutomationError::Timeout(_))
    }

    /// Stable error code used in structured events
    pub fn code(&self) -> &'static str {
        match self {
            AutomationError::TemplateMissing(_) => "TEMPLATE_MISSING",
            AutomationError::GroupNotFound(_) => "GROUP_NOT_FOUND",
            AutomationError::RootGroupProtected(_) => "ROOT_GROUP_PROTECTED",
            AutomationError::CoordinateOutOfBounds { .. } => "COORDINATE_OUT_OF_BOUNDS",
            AutomationError::Timeout(_) => "TASK_TIMEOUT",
            AutomationError::Capture(_) => "CAPTURE_ERROR",
            AutomationError::Attempt(_) => "ATTEMPT_FAILED",
            AutomationError::Io(_) => "IO_ERROR",
            AutomationError::Deserialization(_) => "DESERIALIZATION_ERROR",
        }
    }
}

/// Type alias for Result with AutomationError
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Structured error information carried inside progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (e.g. "TASK_TIMEOUT", "ATTEMPT_FAILED")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// ID of the task the error belongs to (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Attempt number that produced the error (1-based)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Timestamp when the error occurred
    pub timestamp: String,
}

impl ErrorInfo {
    pub fn new(task_id: Option<String>, error: &AutomationError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            task_id,
            attempt: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Record which attempt produced the error
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_fail_classification() {
        assert!(AutomationError::Timeout(30).fast_fail());

        assert!(!AutomationError::TemplateMissing("a.png".into()).fast_fail());
        assert!(!AutomationError::Attempt("actuator refused".into()).fast_fail());
        assert!(!AutomationError::Capture("no display".into()).fast_fail());
        assert!(
            !AutomationError::CoordinateOutOfBounds {
                x: -3,
                y: 10,
                width: 800,
                height: 600
            }
            .fast_fail()
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AutomationError::Timeout(5).code(), "TASK_TIMEOUT");
        assert_eq!(
            AutomationError::GroupNotFound("A".into()).code(),
            "GROUP_NOT_FOUND"
        );
        assert_eq!(
            AutomationError::TemplateMissing("t.png".into()).code(),
            "TEMPLATE_MISSING"
        );
    }

    #[test]
    fn test_error_info_carries_attempt() {
        let err = AutomationError::Attempt("click rejected".into());
        let info = ErrorInfo::new(Some("task-1".into()), &err).with_attempt(2);

        assert_eq!(info.code, "ATTEMPT_FAILED");
        assert_eq!(info.task_id.as_deref(), Some("task-1"));
        assert_eq!(info.attempt, Some(2));
        assert!(!info.timestamp.is_empty());
    }
}
