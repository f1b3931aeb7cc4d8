//! Typed capability surface over the GitHub REST calls the handlers make.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codex_github::codex_prompts::ReviewEvent;
use codex_github::github_api_error::GithubApiError;
use codex_github::webhook_payloads::RepoRef;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Deserialize)]
/// Installation access token minted for one GitHub App installation.
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// True when the token expires within `margin_seconds` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin_seconds: i64) -> bool {
        self.expires_at <= now + chrono::Duration::seconds(margin_seconds)
    }
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequestReview {
    pub event: ReviewEvent,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedReview {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[async_trait]
/// GitHub REST operations available to a single app installation.
pub trait GithubInstallationApi: Send + Sync {
    fn installation_id(&self) -> u64;

    /// Mint a fresh installation access token, bypassing any cached one.
    async fn installation_access_token(&self) -> Result<InstallationToken, GithubApiError>;

    /// `GET /repos/{owner}/{repo}/tarball` for the default branch.
    async fn download_repository_tarball(&self, repo: &RepoRef) -> Result<Vec<u8>, GithubApiError>;

    /// `POST /repos/{owner}/{repo}/pulls`
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GithubApiError>;

    /// `POST /repos/{owner}/{repo}/pulls/{pull_number}/reviews`
    async fn create_pull_request_review(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        request: &NewPullRequestReview,
    ) -> Result<CreatedReview, GithubApiError>;

    /// Unified diff text served at a pull request's `diff_url`.
    async fn fetch_pull_request_diff(&self, diff_url: &str) -> Result<String, GithubApiError>;

    /// `GET /repos/{owner}/{repo}/actions/runs/{run_id}/logs` as raw bytes.
    async fn download_workflow_run_logs(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<u8>, GithubApiError>;

    /// `POST /repos/{owner}/{repo}/issues`
    async fn create_issue(
        &self,
        repo: &RepoRef,
        request: &NewIssue,
    ) -> Result<CreatedIssue, GithubApiError>;
}

/// Builds a fresh installation client per handler invocation.
pub trait InstallationClientFactory: Send + Sync {
    fn client_for_installation(
        &self,
        installation_id: u64,
    ) -> Result<Arc<dyn GithubInstallationApi>, GithubApiError>;
}
