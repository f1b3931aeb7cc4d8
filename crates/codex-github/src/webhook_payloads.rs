//! Typed views over the GitHub webhook payload fields the agent consumes.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `RepoRef` used across Codex agent components.
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse an `owner/repo` slug.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (owner, name) = trimmed
            .split_once('/')
            .ok_or_else(|| anyhow!("invalid repository '{trimmed}': expected owner/repo"))?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("invalid repository '{trimmed}': expected owner/repo");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubRepository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl GithubRepository {
    pub fn repo_ref(&self) -> Result<RepoRef> {
        RepoRef::parse(&self.full_name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubInstallationRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubIssueSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Payload of an `issues` delivery with action `labeled`.
pub struct IssuesLabeledPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub label: Option<GithubLabel>,
    pub issue: GithubIssueSummary,
    pub repository: GithubRepository,
    #[serde(default)]
    pub installation: Option<GithubInstallationRef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubPullRequestSummary {
    pub number: u64,
    pub diff_url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Payload of a `pull_request` delivery.
pub struct PullRequestPayload {
    #[serde(default)]
    pub action: Option<String>,
    pub pull_request: GithubPullRequestSummary,
    pub repository: GithubRepository,
    #[serde(default)]
    pub installation: Option<GithubInstallationRef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubWorkflowRunSummary {
    pub id: u64,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Payload of a `workflow_run` delivery.
pub struct WorkflowRunPayload {
    #[serde(default)]
    pub action: Option<String>,
    pub workflow_run: GithubWorkflowRunSummary,
    pub repository: GithubRepository,
    #[serde(default)]
    pub installation: Option<GithubInstallationRef>,
}

/// Resolve the installation id carried by an app webhook delivery.
pub fn require_installation_id(installation: Option<&GithubInstallationRef>) -> Result<u64> {
    installation
        .map(|installation| installation.id)
        .ok_or_else(|| anyhow!("webhook payload is missing installation.id"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `WebhookRoute` values.
pub enum WebhookRoute {
    IssueLabeled,
    PullRequest,
    WorkflowRunCompleted,
    Ping,
}

impl WebhookRoute {
    /// Map an `X-GitHub-Event` name and payload action onto a handler route.
    pub fn from_event(event_name: &str, action: Option<&str>) -> Option<Self> {
        match (event_name.trim(), action.map(str::trim)) {
            ("issues", Some("labeled")) => Some(Self::IssueLabeled),
            ("pull_request", Some("opened" | "synchronize")) => Some(Self::PullRequest),
            ("workflow_run", Some("completed")) => Some(Self::WorkflowRunCompleted),
            ("ping", _) => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IssueLabeled => "issues.labeled",
            Self::PullRequest => "pull_request",
            Self::WorkflowRunCompleted => "workflow_run.completed",
            Self::Ping => "ping",
        }
    }
}

/// Read the top-level `action` string of a webhook payload.
pub fn payload_action(payload: &Value) -> Option<&str> {
    payload.get("action").and_then(Value::as_str)
}
