// HTTP route handlers for the pyrunner API

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose, Engine as _};
use pyrunner_common::types::{Attachment, ExecutionRequest, TerminationKind};
use pyrunner_sandbox::{ExecuteError, RejectedFile, SubmissionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteJsonRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub attachments: Vec<JsonAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct JsonAttachment {
    pub name: String,
    /// Base64-encoded file contents
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_files: Option<Vec<RejectedFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_formats: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            output: vec![line.into()],
            invalid_files: None,
            accepted_formats: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FormatsResponse {
    pub accepted_formats: Vec<String>,
    pub formats_string: String,
}

fn bad_request(error: impl Into<String>) -> Response {
    let error = error.into();
    let line = format!("Error: {}", error);
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error, line))).into_response()
}

/// Map intake failures to HTTP responses. Internal details stay in the logs.
fn error_response(err: ExecuteError) -> Response {
    match err {
        ExecuteError::Rejected(SubmissionError::UnsupportedFormat { files, accepted }) => {
            let mut output = vec![
                "FILE FORMAT ERROR:".to_string(),
                format!("Accepted image formats: {}", accepted),
                "Invalid files detected:".to_string(),
            ];
            output.extend(
                files
                    .iter()
                    .map(|file| format!("  • {} ({})", file.name, file.extension)),
            );

            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Invalid file format(s)".to_string(),
                    output,
                    invalid_files: Some(files),
                    accepted_formats: Some(accepted),
                }),
            )
                .into_response()
        }
        ExecuteError::Rejected(e) => bad_request(e.to_string()),
        ExecuteError::Workspace(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(
                "Execution failed",
                "Error: the sandbox could not prepare a workspace",
            )),
        )
            .into_response(),
    }
}

async fn run(state: &AppState, request: ExecutionRequest) -> Response {
    match state.sandbox.execute(request).await {
        Ok(response) => {
            let status = match response.status {
                TerminationKind::SpawnFailed => StatusCode::SERVICE_UNAVAILABLE,
                TerminationKind::Completed | TerminationKind::TimedOut => StatusCode::OK,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn read_multipart(multipart: &mut Multipart) -> Result<ExecutionRequest, MultipartError> {
    let mut request = ExecutionRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "code" => request.script = field.text().await?,
            "files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                request.attachments.push(Attachment::new(file_name, data.to_vec()));
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(request)
}

/// POST /execute - multipart form with `code` and zero or more `files`
pub async fn execute_multipart(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let request = match read_multipart(&mut multipart).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed multipart submission");
            return bad_request(format!("Malformed upload: {}", e.body_text()));
        }
    };

    run(&state, request).await
}

/// POST /execute/json - JSON body with base64 attachments
pub async fn execute_json(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteJsonRequest>,
) -> Response {
    let mut request = ExecutionRequest::new(payload.code);

    for attachment in payload.attachments {
        match general_purpose::STANDARD.decode(attachment.data.as_bytes()) {
            Ok(data) => request.attachments.push(Attachment::new(attachment.name, data)),
            Err(_) => {
                return bad_request(format!(
                    "Attachment '{}' is not valid base64",
                    attachment.name
                ));
            }
        }
    }

    run(&state, request).await
}

/// GET /formats - accepted attachment formats, for client-side checks
pub async fn formats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let formats = state.sandbox.accepted_formats();
    Json(FormatsResponse {
        accepted_formats: formats.extensions().to_vec(),
        formats_string: formats.display_string(),
    })
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}
