use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GraderError {
    #[error("invalid course id: {0}")]
    InvalidCourseId(String),

    #[error("invalid assignment id: {0}")]
    InvalidAssignmentId(String),

    #[error("no API token available (run `cheesegrader token set` or pass --token)")]
    MissingToken,

    #[error("API token rejected: {0}")]
    InvalidToken(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("LMS request failed: {0}")]
    Http(String),

    #[error("LMS returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected LMS response: {0}")]
    UnexpectedResponse(String),

    #[error("assignment '{assignment}' is a group assignment; group assignments are not supported")]
    UnsupportedGroupAssignment { assignment: String },

    #[error("download of {url} failed: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("CSV is missing column: {0}")]
    MissingColumn(String),

    #[error("failed to read CSV: {0}")]
    Csv(String),

    #[error("path does not exist: {0}")]
    InvalidPath(PathBuf),

    #[error("invalid match pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    Validation(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GraderError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            GraderError::Http(_)
                | GraderError::Status { .. }
                | GraderError::UnexpectedResponse(_)
                | GraderError::DownloadFailed { .. }
        )
    }
}
