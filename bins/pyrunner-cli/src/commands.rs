// CLI commands for running scripts and managing runner config
use anyhow::{bail, Context, Result};
use pyrunner_common::config::{RunnerConfig, DEFAULT_CONFIG_PATH};
use pyrunner_common::types::{Attachment, ExecutionRequest, NormalizedResponse, TerminationKind};
use pyrunner_sandbox::{ExecuteError, Sandbox};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Exit status used when the run hit the wall-clock limit
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit status used when the interpreter could not be started
pub const EXIT_SPAWN_FAILED: i32 = 127;

fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::load(path)?.with_env_overrides()?,
        None => RunnerConfig::load_default()?,
    };
    config.validate().context("Invalid runner configuration")?;
    debug!(
        interpreter = %config.interpreter,
        timeout_ms = config.timeout_ms,
        workspace_root = %config.workspace_root.display(),
        "Runner config loaded"
    );
    Ok(config)
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file: {}", path.display()))?;
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Attachment::new(name, data))
}

/// Render a response the way the terminal shows it; stderr lines are marked
pub fn render_response(response: &NormalizedResponse) -> Vec<String> {
    let mut lines: Vec<String> = response.stdout_lines().to_vec();
    lines.extend(response.stderr_lines().iter().map(|line| format!("[stderr] {}", line)));
    if let Some(error) = &response.error {
        lines.push(format!("[error] {}", error));
    }
    lines
}

/// Process exit status mirroring how the script ended
pub fn exit_status(response: &NormalizedResponse) -> i32 {
    match response.status {
        TerminationKind::Completed => response.exit_code.unwrap_or(1),
        TerminationKind::TimedOut => EXIT_TIMED_OUT,
        TerminationKind::SpawnFailed => EXIT_SPAWN_FAILED,
    }
}

pub async fn run_script(
    script: &Path,
    attachments: &[std::path::PathBuf],
    timeout_ms: Option<u64>,
    config_path: Option<&Path>,
) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(timeout_ms) = timeout_ms {
        if timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        config.timeout_ms = timeout_ms;
    }

    let source = fs::read_to_string(script)
        .with_context(|| format!("Failed to read script {}", script.display()))?;

    let mut request = ExecutionRequest::new(source);
    for path in attachments {
        request = request.with_attachment(read_attachment(path)?);
    }

    let sandbox = Sandbox::new(config);
    let response = match sandbox.execute(request).await {
        Ok(response) => response,
        Err(ExecuteError::Rejected(e)) => bail!("Submission rejected: {}", e),
        Err(e) => return Err(anyhow::Error::new(e).context("Sandbox failure")),
    };

    for line in render_response(&response) {
        println!("{}", line);
    }

    Ok(exit_status(&response))
}

pub fn print_formats(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Accepted attachment formats: {}", config.accepted_formats.display_string());
    for ext in config.accepted_formats.extensions() {
        println!("  {}", ext);
    }
    if !config.enforce_formats {
        println!("(format checks are disabled)");
    }
    Ok(())
}

pub fn init_project(path: &Path) -> Result<()> {
    println!("Initializing pyrunner config at: {}", path.display());

    let config_path = path.join(DEFAULT_CONFIG_PATH);
    if config_path.exists() {
        println!("  Exists, left untouched: {}", DEFAULT_CONFIG_PATH);
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json_content = serde_json::to_string_pretty(&RunnerConfig::default())?;
    fs::write(&config_path, json_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("  Created: {}", DEFAULT_CONFIG_PATH);

    println!("\nNext steps:");
    println!("  1. Point \"interpreter\" at your Python (or set PYTHON_PATH)");
    println!("  2. Start the API: pyrunner-api");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: TerminationKind, exit_code: Option<i32>) -> NormalizedResponse {
        NormalizedResponse {
            output: vec!["out".to_string(), "boom".to_string()],
            error: None,
            status,
            exit_code,
            stderr_start: Some(1),
            attachments: vec![],
            execution_time_ms: 12,
        }
    }

    #[test]
    fn test_render_marks_stderr() {
        let mut r = response(TerminationKind::TimedOut, None);
        r.error = Some("Execution timed out after 10 ms".to_string());
        assert_eq!(
            render_response(&r),
            vec!["out", "[stderr] boom", "[error] Execution timed out after 10 ms"]
        );
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&response(TerminationKind::Completed, Some(0))), 0);
        assert_eq!(exit_status(&response(TerminationKind::Completed, Some(3))), 3);
        assert_eq!(exit_status(&response(TerminationKind::Completed, None)), 1);
        assert_eq!(exit_status(&response(TerminationKind::TimedOut, None)), EXIT_TIMED_OUT);
        assert_eq!(exit_status(&response(TerminationKind::SpawnFailed, None)), EXIT_SPAWN_FAILED);
    }

    #[test]
    fn test_init_writes_loadable_config_once() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        let loaded = RunnerConfig::load(&path).unwrap();
        assert_eq!(loaded, RunnerConfig::default());

        fs::write(&path, r#"{ "timeout_ms": 42 }"#).unwrap();
        init_project(dir.path()).unwrap();
        assert_eq!(RunnerConfig::load(&path).unwrap().timeout_ms, 42);
    }

    #[test]
    fn test_attachment_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"jpeg").unwrap();

        let attachment = read_attachment(&path).unwrap();
        assert_eq!(attachment.name, "photo.jpg");
        assert_eq!(attachment.data, b"jpeg");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_script_with_shell() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("runner.json");
        let config = RunnerConfig {
            interpreter: "sh".to_string(),
            script_extension: "sh".to_string(),
            workspace_root: dir.path().join("ws"),
            ..RunnerConfig::default()
        };
        fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

        let script = dir.path().join("job.sh");
        fs::write(&script, "echo hi\nexit 4\n").unwrap();

        let code = run_script(&script, &[], None, Some(&config_path)).await.unwrap();
        assert_eq!(code, 4);

        let timed_out = {
            fs::write(&script, "sleep 5\n").unwrap();
            run_script(&script, &[], Some(200), Some(&config_path)).await.unwrap()
        };
        assert_eq!(timed_out, EXIT_TIMED_OUT);
    }
}
