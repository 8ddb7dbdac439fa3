use serde::{Deserialize, Serialize};
use std::fmt;

/// A named binary file submitted alongside a script
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

// Attachment bytes are never useful in logs
impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .finish()
    }
}

/// One incoming execution call. Lives only for the duration of that call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub script: String,
    pub attachments: Vec<Attachment>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// How the interpreter process lifecycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationKind {
    Completed,
    TimedOut,
    SpawnFailed,
}

impl fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationKind::Completed => write!(f, "completed"),
            TerminationKind::TimedOut => write!(f, "timed_out"),
            TerminationKind::SpawnFailed => write!(f, "spawn_failed"),
        }
    }
}

/// Termination details. The exit code only exists for a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `exit_code` is `None` when the process was ended by a signal
    Completed { exit_code: Option<i32> },
    TimedOut { timeout_ms: u64 },
    SpawnFailed { reason: String },
}

impl Termination {
    pub fn kind(&self) -> TerminationKind {
        match self {
            Termination::Completed { .. } => TerminationKind::Completed,
            Termination::TimedOut { .. } => TerminationKind::TimedOut,
            Termination::SpawnFailed { .. } => TerminationKind::SpawnFailed,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Termination::Completed { exit_code } => *exit_code,
            _ => None,
        }
    }
}

/// Captured contents of one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub text: String,
    /// Set when the stream exceeded the capture limit and the tail was dropped
    pub truncated_at: Option<usize>,
}

impl CapturedStream {
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated_at: None,
        }
    }
}

/// Raw result of running the interpreter.
/// Produced by the execution engine, consumed by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub termination: Termination,
    pub execution_time_ms: u64,
}

/// Where an attachment ended up inside the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAttachment {
    pub original: String,
    pub saved: String,
}

/// API-facing result of one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// stdout lines followed by stderr lines, empty lines removed
    pub output: Vec<String>,
    pub error: Option<String>,
    pub status: TerminationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Index into `output` of the first stderr line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_start: Option<usize>,
    #[serde(default)]
    pub attachments: Vec<SavedAttachment>,
    pub execution_time_ms: u64,
}

impl NormalizedResponse {
    pub fn stdout_lines(&self) -> &[String] {
        let end = self.stderr_start.unwrap_or(self.output.len());
        &self.output[..end]
    }

    pub fn stderr_lines(&self) -> &[String] {
        match self.stderr_start {
            Some(start) => &self.output[start..],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_kind_serialization() {
        let json = serde_json::to_string(&TerminationKind::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(TerminationKind::SpawnFailed.to_string(), "spawn_failed");
    }

    #[test]
    fn test_exit_code_only_for_completed() {
        assert_eq!(Termination::Completed { exit_code: Some(2) }.exit_code(), Some(2));
        assert_eq!(Termination::TimedOut { timeout_ms: 10 }.exit_code(), None);
        assert_eq!(
            Termination::SpawnFailed { reason: "x".into() }.kind(),
            TerminationKind::SpawnFailed
        );
    }

    #[test]
    fn test_attachment_debug_hides_bytes() {
        let attachment = Attachment::new("photo.png", vec![0u8; 2048]);
        let rendered = format!("{:?}", attachment);
        assert!(rendered.contains("photo.png"));
        assert!(rendered.contains("2048"));
        assert!(!rendered.contains("[0, 0"));
    }

    #[test]
    fn test_stream_split_by_stderr_start() {
        let response = NormalizedResponse {
            output: vec!["out".into(), "err 1".into(), "err 2".into()],
            error: None,
            status: TerminationKind::Completed,
            exit_code: Some(1),
            stderr_start: Some(1),
            attachments: vec![],
            execution_time_ms: 3,
        };
        assert_eq!(response.stdout_lines(), ["out".to_string()]);
        assert_eq!(response.stderr_lines().len(), 2);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["error"], serde_json::Value::Null);
    }
}
