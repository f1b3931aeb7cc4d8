//! Webhook event handlers and the dependencies they share.

mod issue_labeled;
mod pull_request_review;
mod workflow_failure;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use codex_github::codex_prompts::ReviewEvent;
use codex_github::webhook_payloads::{require_installation_id, GithubInstallationRef};

use crate::app_config::RuntimeSettings;
use crate::codex_generator::CodeGenerator;
use crate::git_ops::{GitCli, GitIdentity, GitOperations, GitRemote};
use crate::installation_api::{GithubInstallationApi, InstallationClientFactory};
use crate::repo_workspace::WorkspaceManager;

pub use issue_labeled::handle_issue_labeled;
pub use pull_request_review::handle_pull_request;
pub use workflow_failure::{handle_workflow_run, is_failed_run};

const DEFAULT_BASE_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Observable result of one handler invocation.
pub enum HandlerOutcome {
    Ignored { reason: String },
    NoChanges,
    PullRequestOpened { number: u64, branch: String },
    ReviewSubmitted { pull_number: u64, event: ReviewEvent },
    IssueCreated { number: u64 },
}

impl HandlerOutcome {
    pub(crate) fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::NoChanges => "no_changes",
            Self::PullRequestOpened { .. } => "pull_request_opened",
            Self::ReviewSubmitted { .. } => "review_submitted",
            Self::IssueCreated { .. } => "issue_created",
        }
    }
}

/// Everything a handler needs, passed explicitly per invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub clients: Arc<dyn InstallationClientFactory>,
    pub generator: Arc<dyn CodeGenerator>,
    pub git: Arc<dyn GitOperations>,
    pub workspaces: WorkspaceManager,
    pub remote: GitRemote,
    /// Working directory for review and diagnosis runs.
    pub generator_cwd: PathBuf,
    pub pipeline_failure_label: String,
}

impl HandlerContext {
    pub fn new(
        settings: &RuntimeSettings,
        clients: Arc<dyn InstallationClientFactory>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            clients,
            generator,
            git: Arc::new(GitCli::new(
                settings.git_executable.clone(),
                GitIdentity::default(),
            )),
            workspaces: WorkspaceManager::new(
                settings.workspace_root.clone(),
                settings.tar_executable.clone(),
            ),
            remote: GitRemote::new(settings.github_git_base.clone()),
            generator_cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            pipeline_failure_label: settings.pipeline_failure_label.clone(),
        }
    }

    pub(crate) fn client_for(
        &self,
        installation: Option<&GithubInstallationRef>,
    ) -> Result<Arc<dyn GithubInstallationApi>> {
        let installation_id = require_installation_id(installation)?;
        self.clients
            .client_for_installation(installation_id)
            .with_context(|| format!("failed to create client for installation {installation_id}"))
    }
}

pub(crate) fn base_branch(default_branch: Option<&str>) -> &str {
    default_branch
        .map(str::trim)
        .filter(|branch| !branch.is_empty())
        .unwrap_or(DEFAULT_BASE_BRANCH)
}
