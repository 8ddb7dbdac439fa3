/// Request Intake - High-Level Orchestration
///
/// **Responsibility:**
/// Validate a submission, then drive workspace → engine → normalizer and
/// destroy the workspace before returning.
///
/// **Flow:**
/// Received → Validated → WorkspaceReady → Executed → Normalized → CleanedUp → Responded
///
/// - A validation failure returns a client error before any workspace exists
/// - Once a workspace exists, every exit path passes through cleanup: the
///   normal path releases the guard explicitly, panics and cancellation
///   (e.g. a dropped HTTP connection) release it through `Drop`
///
/// This module is the glue layer - it knows nothing about:
/// - How processes are spawned (engine's job)
/// - How output is shaped (normalizer's job)

use crate::engine::ExecutionEngine;
use crate::error::{ExecuteError, SubmissionError};
use crate::normalizer;
use crate::workspace::{ValidatedRequest, WorkspaceManager};
use pyrunner_common::config::RunnerConfig;
use pyrunner_common::formats::AcceptedFormats;
use pyrunner_common::types::{ExecutionRequest, NormalizedResponse};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// The execution service. Holds no per-request state, so one instance can
/// serve any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: RunnerConfig,
    workspaces: WorkspaceManager,
    engine: ExecutionEngine,
}

impl Sandbox {
    pub fn new(config: RunnerConfig) -> Self {
        let workspaces = WorkspaceManager::new(&config);
        let engine = ExecutionEngine::new(&config);
        Self {
            config,
            workspaces,
            engine,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn accepted_formats(&self) -> &AcceptedFormats {
        self.workspaces.formats()
    }

    /// Check the script and attachments. Performs no I/O.
    pub fn validate(&self, request: ExecutionRequest) -> Result<ValidatedRequest, SubmissionError> {
        if request.script.trim().is_empty() {
            return Err(SubmissionError::EmptyScript);
        }
        if request.script.len() > self.config.max_script_bytes {
            return Err(SubmissionError::ScriptTooLarge {
                limit: self.config.max_script_bytes,
            });
        }

        let attachments = self.workspaces.plan_attachments(request.attachments)?;

        Ok(ValidatedRequest {
            script: request.script,
            attachments,
        })
    }

    /// Handle one execution request end to end.
    ///
    /// Script errors, timeouts and spawn failures are all `Ok`; the response
    /// status tells them apart. `Err` means the request was rejected or the
    /// workspace could not be prepared.
    #[instrument(
        skip_all,
        fields(
            script_bytes = request.script.len(),
            attachments = request.attachments.len()
        )
    )]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<NormalizedResponse, ExecuteError> {
        let start = Instant::now();

        let validated = self.validate(request).map_err(|e| {
            info!(reason = %e, "Submission rejected");
            ExecuteError::Rejected(e)
        })?;
        debug!("Submission validated");

        let guard = self.workspaces.create(&validated).await.map_err(|e| {
            error!(error = ?e, "Failed to prepare workspace");
            ExecuteError::Workspace(e)
        })?;
        drop(validated);

        let result = self
            .engine
            .run(guard.workspace(), self.config.timeout())
            .await;

        let mut response = normalizer::normalize(result);
        response.attachments = guard.workspace().files().to_vec();

        let workspace_id = guard.workspace().id().clone();
        guard.release().await;

        info!(
            workspace_id = %workspace_id,
            status = %response.status,
            exit_code = ?response.exit_code,
            output_lines = response.output.len(),
            total_ms = start.elapsed().as_millis() as u64,
            "Execution request handled"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrunner_common::types::Attachment;

    fn sandbox(root: &std::path::Path) -> Sandbox {
        Sandbox::new(RunnerConfig {
            workspace_root: root.to_path_buf(),
            max_script_bytes: 64,
            ..RunnerConfig::default()
        })
    }

    #[test]
    fn test_validate_rejects_empty_script() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        for script in ["", "   \n\t"] {
            assert!(matches!(
                sandbox.validate(ExecutionRequest::new(script)),
                Err(SubmissionError::EmptyScript)
            ));
        }
    }

    #[test]
    fn test_validate_rejects_oversized_script() {
        let dir = tempfile::tempdir().unwrap();
        let err = sandbox(dir.path())
            .validate(ExecutionRequest::new("x".repeat(65)))
            .unwrap_err();
        assert!(matches!(err, SubmissionError::ScriptTooLarge { limit: 64 }));
    }

    #[test]
    fn test_validate_plans_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let validated = sandbox(dir.path())
            .validate(
                ExecutionRequest::new("print(1)")
                    .with_attachment(Attachment::new("../../photo.JPG", vec![1])),
            )
            .unwrap();
        assert_eq!(validated.attachments[0].saved, "sample.jpg");
    }

    #[tokio::test]
    async fn test_rejected_request_creates_no_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("workspaces");
        let sandbox = sandbox(&root);

        let err = sandbox
            .execute(ExecutionRequest::new("print(1)").with_attachment(Attachment::new("x.exe", vec![0])))
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        let err = sandbox.execute(ExecutionRequest::new("")).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Rejected(SubmissionError::EmptyScript)));

        // The root is only created on the way to a workspace
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_unwritable_root_is_workspace_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, "x").unwrap();

        let err = sandbox(&file_root)
            .execute(ExecutionRequest::new("print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Workspace(_)));
        assert_eq!(err.to_string(), "Failed to prepare workspace");
    }
}
