use serde::Serialize;
use thiserror::Error;

/// An attachment refused by the format policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub name: String,
    pub extension: String,
    pub size: usize,
}

/// Client input errors. Raised before any workspace exists.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("No code provided")]
    EmptyScript,

    #[error("Script exceeds maximum size of {limit} bytes")]
    ScriptTooLarge { limit: usize },

    #[error("Attachment '{name}' exceeds maximum size of {limit} bytes")]
    AttachmentTooLarge { name: String, limit: usize },

    #[error("Invalid attachment name '{name}': {reason}")]
    InvalidAttachmentName { name: String, reason: &'static str },

    #[error("Invalid file format(s)")]
    UnsupportedFormat {
        files: Vec<RejectedFile>,
        accepted: String,
    },
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Rejected(#[from] SubmissionError),

    /// Carries host paths in its chain; log it, never return it to a caller
    #[error("Failed to prepare workspace")]
    Workspace(anyhow::Error),
}

impl ExecuteError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExecuteError::Rejected(_))
    }
}
