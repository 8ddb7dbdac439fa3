/// Output Normalizer - Raw Streams to API Response
///
/// **Core Responsibility:**
/// Turn an `ExecutionResult` into a `NormalizedResponse`.
///
/// **Critical Properties:**
/// - Knows nothing about processes or workspaces
/// - Pure function: (raw result) → response
///
/// **Rules:**
/// - Output is stdout lines then stderr lines; empty lines are dropped
/// - Stderr on a completed run is not a request failure; `stderr_start`
///   marks where it begins
/// - Timeouts and spawn failures set `error`; whatever output exists is kept
/// - A truncated stream gets a trailing `[output truncated after N bytes]`

use pyrunner_common::types::{CapturedStream, ExecutionResult, NormalizedResponse, Termination};

/// Split text into lines, dropping empty ones. Whitespace-only lines are
/// kept. Handles `\n` and `\r\n`.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|line| !line.is_empty())
}

fn stream_lines(stream: &CapturedStream) -> Vec<String> {
    let mut lines: Vec<String> = split_lines(&stream.text).map(str::to_string).collect();
    if let Some(limit) = stream.truncated_at {
        lines.push(format!("[output truncated after {} bytes]", limit));
    }
    lines
}

/// Short description of a non-completed run
pub fn termination_error(termination: &Termination) -> Option<String> {
    match termination {
        Termination::Completed { .. } => None,
        Termination::TimedOut { timeout_ms } => {
            Some(format!("Execution timed out after {} ms", timeout_ms))
        }
        Termination::SpawnFailed { reason } => Some(reason.clone()),
    }
}

pub fn normalize(result: ExecutionResult) -> NormalizedResponse {
    let mut output = stream_lines(&result.stdout);
    let stderr_lines = stream_lines(&result.stderr);

    let stderr_start = if stderr_lines.is_empty() {
        None
    } else {
        Some(output.len())
    };
    output.extend(stderr_lines);

    NormalizedResponse {
        output,
        error: termination_error(&result.termination),
        status: result.termination.kind(),
        exit_code: result.termination.exit_code(),
        stderr_start,
        attachments: Vec::new(),
        execution_time_ms: result.execution_time_ms,
    }
}
