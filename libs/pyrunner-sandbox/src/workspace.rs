/// Workspace Manager - Single-Use Execution Directories
///
/// **Responsibility:**
/// Give every request its own directory under the configured root, write the
/// script and attachments into it, and remove it afterwards.
///
/// **Guarantees:**
/// - Directory names combine a timestamp with a random UUID, so requests
///   arriving in the same clock tick never share a root
/// - Attachment names are reduced to bare file names before any join;
///   nothing a client sends can address a path outside the root
/// - The script always lives at `script.<ext>`; attachments never replace it
/// - `WorkspaceGuard` removes the directory when dropped, so panics and
///   cancelled requests still clean up. The normal path calls `release()`.

use crate::error::{RejectedFile, SubmissionError};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use pyrunner_common::config::RunnerConfig;
use pyrunner_common::formats::AcceptedFormats;
use pyrunner_common::types::{Attachment, SavedAttachment};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_FILE_NAME_BYTES: usize = 255;
const ID_TIMESTAMP_DIGITS: usize = 17;
const ID_UUID_HEX: usize = 32;
const IMAGE_BASE_NAME: &str = "sample";

/// Unique workspace identifier, also used as the directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn generate() -> Self {
        Self(format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            Uuid::new_v4().simple()
        ))
    }

    /// Whether `name` has the shape `generate` produces:
    /// 17 timestamp digits, `-`, 32 lowercase hex digits
    pub fn is_generated(name: &str) -> bool {
        let Some((stamp, uuid)) = name.split_once('-') else {
            return false;
        };
        stamp.len() == ID_TIMESTAMP_DIGITS
            && stamp.bytes().all(|b| b.is_ascii_digit())
            && uuid.len() == ID_UUID_HEX
            && uuid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attachment that passed validation, with the name it will be saved under
#[derive(Clone)]
pub struct PlannedAttachment {
    pub original: String,
    pub saved: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for PlannedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedAttachment")
            .field("original", &self.original)
            .field("saved", &self.saved)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Request that passed intake validation
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub script: String,
    pub attachments: Vec<PlannedAttachment>,
}

/// The isolated execution root of one request
#[derive(Debug, Clone)]
pub struct Workspace {
    id: WorkspaceId,
    root_path: PathBuf,
    script_name: String,
    files: Vec<SavedAttachment>,
}

impl Workspace {
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Script file name relative to the root
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn script_path(&self) -> PathBuf {
        self.root_path.join(&self.script_name)
    }

    pub fn files(&self) -> &[SavedAttachment] {
        &self.files
    }
}

/// Reduce a client-supplied attachment name to a bare file name.
///
/// Directory components are stripped (`../../x` becomes `x`), control
/// characters and `:` are dropped. Names that reduce to nothing, `.` or `..`
/// are rejected.
pub fn sanitize_file_name(raw: &str) -> Result<String, SubmissionError> {
    let invalid = |reason| SubmissionError::InvalidAttachmentName {
        name: raw.to_string(),
        reason,
    };

    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != ':')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(invalid("name is empty"));
    }
    if cleaned == "." || cleaned == ".." {
        return Err(invalid("name refers to a directory"));
    }
    if cleaned.len() > MAX_FILE_NAME_BYTES {
        return Err(invalid("name is too long"));
    }

    Ok(cleaned.to_string())
}

/// Pick `name`, or `stem-2.ext`, `stem-3.ext`, ... if it is taken.
/// Comparison is case-insensitive so case-folding filesystems behave the same.
fn claim_unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };

    let mut counter = 2;
    loop {
        let candidate = format!("{}-{}{}", stem, counter, ext);
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Remove a workspace directory. A directory that is already gone counts as removed.
async fn remove_workspace_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_workspace_dir_blocking(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Destroy a workspace. Idempotent; failures are logged and swallowed.
pub async fn destroy(workspace: &Workspace) {
    match remove_workspace_dir(&workspace.root_path).await {
        Ok(()) => debug!(workspace_id = %workspace.id, "Workspace destroyed"),
        Err(e) => warn!(
            workspace_id = %workspace.id,
            error = %e,
            "Failed to remove workspace"
        ),
    }
}

/// Scoped ownership of a workspace.
///
/// Created only by `WorkspaceManager::create`. Exactly one removal is
/// attempted: by `release()` on the normal path, otherwise by `Drop`.
#[must_use = "dropping the guard destroys the workspace"]
pub struct WorkspaceGuard {
    workspace: Workspace,
    released: bool,
}

impl WorkspaceGuard {
    fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            released: false,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Destroy the workspace and consume the guard
    pub async fn release(mut self) {
        self.released = true;
        destroy(&self.workspace).await;
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Panic or cancellation path. Blocking removal keeps the directory
        // from outliving the request even when no runtime is left to spawn on.
        match remove_workspace_dir_blocking(&self.workspace.root_path) {
            Ok(()) => debug!(
                workspace_id = %self.workspace.id,
                "Workspace destroyed by guard"
            ),
            Err(e) => warn!(
                workspace_id = %self.workspace.id,
                error = %e,
                "Failed to remove workspace from guard"
            ),
        }
    }
}

/// Creates and destroys workspaces under a shared root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    script_name: String,
    formats: AcceptedFormats,
    enforce_formats: bool,
    max_attachment_bytes: usize,
}

impl WorkspaceManager {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            root: config.workspace_root.clone(),
            script_name: config.script_file_name(),
            formats: config.accepted_formats.clone(),
            enforce_formats: config.enforce_formats,
            max_attachment_bytes: config.max_attachment_bytes,
        }
    }

    pub fn formats(&self) -> &AcceptedFormats {
        &self.formats
    }

    /// Validate attachments and decide their on-disk names.
    ///
    /// Accepted images become `sample<ext>`, numbered when repeated. Other
    /// files keep their sanitized name when the format policy allows them.
    /// All format violations are reported together.
    pub fn plan_attachments(
        &self,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<PlannedAttachment>, SubmissionError> {
        for attachment in &attachments {
            if attachment.data.len() > self.max_attachment_bytes {
                return Err(SubmissionError::AttachmentTooLarge {
                    name: attachment.name.clone(),
                    limit: self.max_attachment_bytes,
                });
            }
        }

        if self.enforce_formats {
            let rejected: Vec<RejectedFile> = attachments
                .iter()
                .filter(|a| !self.formats.accepts(&a.name))
                .map(|a| RejectedFile {
                    name: a.name.clone(),
                    extension: AcceptedFormats::extension_of(&a.name)
                        .unwrap_or_else(|| "no extension".to_string()),
                    size: a.data.len(),
                })
                .collect();

            if !rejected.is_empty() {
                return Err(SubmissionError::UnsupportedFormat {
                    files: rejected,
                    accepted: self.formats.display_string(),
                });
            }
        }

        let mut taken = HashSet::new();
        taken.insert(self.script_name.to_lowercase());

        let mut planned = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let sanitized = sanitize_file_name(&attachment.name)?;
            let base = match self.formats.matching_extension(&sanitized) {
                Some(ext) => format!("{}{}", IMAGE_BASE_NAME, ext),
                None => sanitized,
            };
            let saved = claim_unique_name(&base, &mut taken);

            planned.push(PlannedAttachment {
                original: attachment.name,
                saved,
                data: attachment.data,
            });
        }

        Ok(planned)
    }

    /// Allocate a fresh directory and materialize the request into it.
    ///
    /// The guard exists as soon as the directory does, so a failed write
    /// half-way through still removes everything.
    pub async fn create(&self, request: &ValidatedRequest) -> Result<WorkspaceGuard> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create workspace root {}", self.root.display()))?;

        let id = WorkspaceId::generate();
        let root_path = self.root.join(id.as_str());

        // create_dir (not create_dir_all) fails if the name already exists
        tokio::fs::create_dir(&root_path)
            .await
            .with_context(|| format!("Failed to create workspace {}", root_path.display()))?;

        let mut guard = WorkspaceGuard::new(Workspace {
            id,
            root_path,
            script_name: self.script_name.clone(),
            files: Vec::with_capacity(request.attachments.len()),
        });

        restrict_permissions(guard.workspace.root_path()).await?;

        write_new_file(
            guard.workspace.root_path(),
            &guard.workspace.script_name,
            request.script.as_bytes(),
        )
        .await?;

        for attachment in &request.attachments {
            write_new_file(guard.workspace.root_path(), &attachment.saved, &attachment.data).await?;
            guard.workspace.files.push(SavedAttachment {
                original: attachment.original.clone(),
                saved: attachment.saved.clone(),
            });
        }

        info!(
            workspace_id = %guard.workspace.id,
            attachments = guard.workspace.files.len(),
            "Workspace ready"
        );

        Ok(guard)
    }

    /// Destroy a workspace. Safe to call more than once.
    pub async fn destroy(&self, workspace: &Workspace) {
        destroy(workspace).await;
    }

    /// Remove workspace directories left behind by a previous process.
    /// Entries not named like a workspace are left alone.
    /// Only call while no requests are in flight.
    pub async fn sweep_stale(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(error = %e, "Failed to scan workspace root");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read workspace root entry");
                    break;
                }
            };

            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let owned = entry
                .file_name()
                .to_str()
                .map(WorkspaceId::is_generated)
                .unwrap_or(false);
            if !is_dir || !owned {
                continue;
            }

            match remove_workspace_dir(&entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    name = %entry.file_name().to_string_lossy(),
                    error = %e,
                    "Failed to remove stale workspace"
                ),
            }
        }

        if removed > 0 {
            info!(removed, "Removed stale workspaces");
        }
        removed
    }
}

/// Write a file that must not exist yet, directly inside `dir`
async fn write_new_file(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let path = dir.join(name);
    if path.parent() != Some(dir) {
        bail!("Refusing to write '{}' outside the workspace", name);
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .await
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
