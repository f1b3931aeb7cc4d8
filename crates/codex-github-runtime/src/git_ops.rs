//! Version-control steps a handler performs inside its workspace checkout.

use std::path::Path;

use async_trait::async_trait;
use codex_github::webhook_payloads::RepoRef;
use thiserror::Error;
use tokio::process::Command;

use crate::process_helpers::{exit_status_label, redact_credentials, run_captured};

const REMOTE_PLACEHOLDER: &str = "<remote>";

#[derive(Debug, Error)]
/// Enumerates supported `GitError` values.
pub enum GitError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with exit code {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "Codex Agent".to_string(),
            email: "codex@app".to_string(),
        }
    }
}

#[async_trait]
/// Trait contract for `GitOperations` behavior.
pub trait GitOperations: Send + Sync {
    /// Turn an extracted snapshot into a repository whose index and working
    /// tree match `reference` on `remote_url`.
    async fn init_snapshot(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        reference: &str,
    ) -> Result<(), GitError>;

    async fn configure_identity(&self, repo_dir: &Path) -> Result<(), GitError>;

    async fn create_branch(&self, repo_dir: &Path, name: &str) -> Result<(), GitError>;

    async fn stage_all(&self, repo_dir: &Path) -> Result<(), GitError>;

    async fn has_staged_changes(&self, repo_dir: &Path) -> Result<bool, GitError>;

    async fn commit(&self, repo_dir: &Path, message: &str) -> Result<(), GitError>;

    /// Overwrite `refs/heads/<branch>` on the remote with local `HEAD`.
    async fn force_push(&self, repo_dir: &Path, remote_url: &str, branch: &str)
        -> Result<(), GitError>;
}

/// [`GitOperations`] backed by the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    identity: GitIdentity,
}

impl GitCli {
    pub fn new(program: impl Into<String>, identity: GitIdentity) -> Self {
        Self {
            program: program.into(),
            identity,
        }
    }

    async fn run(
        &self,
        repo_dir: &Path,
        args: &[&str],
    ) -> Result<(std::process::Output, String), GitError> {
        let display = std::iter::once(self.program.as_str())
            .chain(args.iter().map(|arg| {
                if arg.contains("://") {
                    REMOTE_PLACEHOLDER
                } else {
                    arg
                }
            }))
            .collect::<Vec<_>>()
            .join(" ");
        let mut command = Command::new(&self.program);
        command.args(args);
        command.env("GIT_TERMINAL_PROMPT", "0");
        let output = run_captured(command, repo_dir, None)
            .await
            .map_err(|source| GitError::Spawn {
                command: display.clone(),
                source,
            })?;
        Ok((output, display))
    }

    async fn run_checked(&self, repo_dir: &Path, args: &[&str]) -> Result<(), GitError> {
        let (output, command) = self.run(repo_dir, args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(command_failed(command, &output))
    }
}

fn command_failed(command: String, output: &std::process::Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    GitError::CommandFailed {
        command,
        status: exit_status_label(output),
        stderr: redact_credentials(stderr.trim()),
    }
}

#[async_trait]
impl GitOperations for GitCli {
    async fn init_snapshot(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        reference: &str,
    ) -> Result<(), GitError> {
        self.run_checked(repo_dir, &["init", "-q"]).await?;
        self.run_checked(
            repo_dir,
            &["fetch", "-q", "--depth=1", remote_url, reference],
        )
        .await?;
        // Hard: tarballs omit export-ignore paths and expand export-subst files.
        self.run_checked(repo_dir, &["reset", "-q", "--hard", "FETCH_HEAD"])
            .await
    }

    async fn configure_identity(&self, repo_dir: &Path) -> Result<(), GitError> {
        self.run_checked(repo_dir, &["config", "user.email", &self.identity.email])
            .await?;
        self.run_checked(repo_dir, &["config", "user.name", &self.identity.name])
            .await
    }

    async fn create_branch(&self, repo_dir: &Path, name: &str) -> Result<(), GitError> {
        self.run_checked(repo_dir, &["checkout", "-q", "-b", name])
            .await
    }

    async fn stage_all(&self, repo_dir: &Path) -> Result<(), GitError> {
        self.run_checked(repo_dir, &["add", "-A"]).await
    }

    async fn has_staged_changes(&self, repo_dir: &Path) -> Result<bool, GitError> {
        let (output, command) = self
            .run(repo_dir, &["diff", "--cached", "--quiet"])
            .await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(command_failed(command, &output)),
        }
    }

    async fn commit(&self, repo_dir: &Path, message: &str) -> Result<(), GitError> {
        self.run_checked(repo_dir, &["commit", "-q", "-m", message])
            .await
    }

    async fn force_push(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        branch: &str,
    ) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run_checked(
            repo_dir,
            &["push", "-q", "--force", remote_url, refspec.as_str()],
        )
        .await
    }
}

/// Builds per-repository remote URLs relative to the configured git host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRemote {
    base: String,
}

impl GitRemote {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `https://x-access-token:<token>@host/<owner>/<repo>.git` for http(s)
    /// bases; other bases (local mirrors, `file://`) are used as-is.
    pub fn authenticated_url(&self, repo: &RepoRef, token: &str) -> String {
        let path = format!("{}/{}.git", repo.owner, repo.name);
        match self.base.split_once("://") {
            Some((scheme, host)) if scheme == "https" || scheme == "http" => {
                format!("{scheme}://x-access-token:{token}@{host}/{path}")
            }
            _ => format!("{}/{path}", self.base),
        }
    }
}
