use serde::Serialize;

/// Per-row failures collected while processing an upload. Neither aborts the
/// upload; the row is skipped and reported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("{0}")]
    Parse(String),
    #[error("student {0} not found or not enrolled in this course")]
    NotEnrolled(String),
}

impl RowError {
    pub fn kind(&self) -> RowErrorKind {
        match self {
            RowError::Parse(_) => RowErrorKind::ParseError,
            RowError::NotEnrolled(_) => RowErrorKind::NotEnrolled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    ParseError,
    NotEnrolled,
}

/// Failures that abort a whole upload before or while rows are processed.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MalformedUpload(_) => "malformed_upload",
            ImportError::Storage(_) => "db_query_failed",
        }
    }
}

/// Outcome of resolving a student identifier against the enrollment roster.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    /// Unknown student, wrong course, wrong instructor and other semester are
    /// deliberately reported the same way.
    #[error("student {0} not found or not enrolled in this course")]
    NotEnrolled(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}
