//! Per-invocation scratch directories holding an extracted repository snapshot.

use std::path::{Path, PathBuf};

use codex_github::github_api_error::GithubApiError;
use codex_github::webhook_payloads::RepoRef;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

use crate::installation_api::GithubInstallationApi;
use crate::process_helpers::{exit_status_label, run_captured};

const WORKSPACE_PREFIX: &str = "codex-";

#[derive(Debug, Error)]
/// Enumerates supported `WorkspaceError` values.
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to download tarball for {repo}: {source}")]
    Download {
        repo: String,
        #[source]
        source: GithubApiError,
    },
    #[error("failed to run `{program}`: {source}")]
    ExtractSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tarball extraction for {repo} failed with exit code {status}: {stderr}")]
    Extraction {
        repo: String,
        status: String,
        stderr: String,
    },
    #[error("tarball for {repo} must contain exactly one top-level directory (found {found})")]
    MissingRepoDir { repo: String, found: usize },
}

/// Scratch directory owned by exactly one handler invocation.
///
/// The directory is removed by [`RepoWorkspace::destroy`], or on drop when a
/// handler returns early, panics or is cancelled mid-flight.
#[derive(Debug)]
pub struct RepoWorkspace {
    guard: Option<TempDir>,
    work_dir: PathBuf,
    repo_dir: PathBuf,
}

impl RepoWorkspace {
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Top-level directory of the extracted snapshot.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            destroy_workspace(guard);
        }
    }
}

impl Drop for RepoWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Recursively remove a workspace directory. Failures are logged, not raised.
fn destroy_workspace(work_dir: TempDir) {
    let path = work_dir.path().to_path_buf();
    match work_dir.close() {
        Ok(()) => tracing::debug!(work_dir = %path.display(), "removed workspace"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(
            work_dir = %path.display(),
            error = %error,
            "failed to remove workspace"
        ),
    }
}

#[derive(Debug, Clone)]
/// Creates [`RepoWorkspace`]s under one root directory.
pub struct WorkspaceManager {
    root: PathBuf,
    tar_program: String,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, tar_program: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            tar_program: tar_program.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download `repo`'s default-branch tarball and extract it into a fresh
    /// `codex-*` directory.
    pub async fn create_workspace(
        &self,
        api: &dyn GithubInstallationApi,
        repo: &RepoRef,
    ) -> Result<RepoWorkspace, WorkspaceError> {
        let guard = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|source| WorkspaceError::Create {
                root: self.root.clone(),
                source,
            })?;
        let work_dir = guard.path().to_path_buf();
        let mut workspace = RepoWorkspace {
            guard: Some(guard),
            repo_dir: work_dir.clone(),
            work_dir,
        };

        let tarball = api
            .download_repository_tarball(repo)
            .await
            .map_err(|source| WorkspaceError::Download {
                repo: repo.to_string(),
                source,
            })?;
        let tarball_bytes = tarball.len();

        let mut command = Command::new(&self.tar_program);
        command.arg("-xzf").arg("-").arg("-C").arg(&workspace.work_dir);
        let output = run_captured(command, &workspace.work_dir, Some(tarball))
            .await
            .map_err(|source| WorkspaceError::ExtractSpawn {
                program: self.tar_program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(WorkspaceError::Extraction {
                repo: repo.to_string(),
                status: exit_status_label(&output),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        workspace.repo_dir = resolve_repo_dir(&workspace.work_dir, repo).await?;
        tracing::debug!(
            repo = %repo,
            tarball_bytes,
            repo_dir = %workspace.repo_dir.display(),
            "extracted repository snapshot"
        );
        Ok(workspace)
    }
}

async fn resolve_repo_dir(work_dir: &Path, repo: &RepoRef) -> Result<PathBuf, WorkspaceError> {
    let missing = |found: usize| WorkspaceError::MissingRepoDir {
        repo: repo.to_string(),
        found,
    };
    let mut entries = tokio::fs::read_dir(work_dir).await.map_err(|_| missing(0))?;
    let mut directories = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|_| missing(0))? {
        if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
            directories.push(entry.path());
        }
    }
    match directories.len() {
        1 => Ok(directories.remove(0)),
        found => Err(missing(found)),
    }
}
