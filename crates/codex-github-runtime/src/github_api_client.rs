use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use codex_github::github_api_error::GithubApiError;
use codex_github::webhook_payloads::RepoRef;
use serde_json::json;
use tokio::sync::Mutex;

use crate::github_app_auth::GithubAppAuth;
use crate::installation_api::{
    CreatedIssue, CreatedPullRequest, CreatedReview, GithubInstallationApi,
    InstallationClientFactory, InstallationToken, NewIssue, NewPullRequest, NewPullRequestReview,
};

/// Cached tokens are refreshed once they are this close to expiry.
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Installation-scoped GitHub client. The access token is minted on first use
/// and refreshed transparently near expiry.
pub struct GithubInstallationClient {
    auth: Arc<GithubAppAuth>,
    installation_id: u64,
    trusted_hosts: Vec<String>,
    cached_token: Mutex<Option<InstallationToken>>,
}

impl GithubInstallationClient {
    pub fn new(auth: Arc<GithubAppAuth>, installation_id: u64, trusted_hosts: Vec<String>) -> Self {
        Self {
            auth,
            installation_id,
            trusted_hosts,
            cached_token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, GithubApiError> {
        let mut guard = self.cached_token.lock().await;
        if let Some(token) = guard.as_ref() {
            if !token.expires_within(Utc::now(), TOKEN_REFRESH_MARGIN_SECONDS) {
                return Ok(token.token.clone());
            }
        }
        let token = self
            .auth
            .mint_installation_token(self.installation_id)
            .await?;
        let value = token.token.clone();
        *guard = Some(token);
        Ok(value)
    }

    fn repo_url(&self, repo: &RepoRef, suffix: &str) -> String {
        self.auth.http().api_url(&format!(
            "/repos/{}/{}/{}",
            repo.owner,
            repo.name,
            suffix.trim_start_matches('/')
        ))
    }

    fn is_trusted_url(&self, url: &str) -> bool {
        self.trusted_hosts
            .iter()
            .any(|base| url.starts_with(base.as_str()))
    }
}

#[async_trait]
impl GithubInstallationApi for GithubInstallationClient {
    fn installation_id(&self) -> u64 {
        self.installation_id
    }

    async fn installation_access_token(&self) -> Result<InstallationToken, GithubApiError> {
        let token = self
            .auth
            .mint_installation_token(self.installation_id)
            .await?;
        *self.cached_token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn download_repository_tarball(&self, repo: &RepoRef) -> Result<Vec<u8>, GithubApiError> {
        let token = self.bearer_token().await?;
        let url = self.repo_url(repo, "tarball");
        let http = self.auth.http();
        http.request_bytes("download repository tarball", || {
            http.client().get(url.as_str()).bearer_auth(&token)
        })
        .await
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GithubApiError> {
        let token = self.bearer_token().await?;
        let url = self.repo_url(repo, "pulls");
        let http = self.auth.http();
        http.request_json("create pull request", || {
            http.client()
                .post(url.as_str())
                .bearer_auth(&token)
                .json(request)
        })
        .await
    }

    async fn create_pull_request_review(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        request: &NewPullRequestReview,
    ) -> Result<CreatedReview, GithubApiError> {
        let token = self.bearer_token().await?;
        let url = self.repo_url(repo, &format!("pulls/{pull_number}/reviews"));
        let payload = json!({
            "event": request.event.as_str(),
            "body": request.body,
        });
        let http = self.auth.http();
        http.request_json("create pull request review", || {
            http.client()
                .post(url.as_str())
                .bearer_auth(&token)
                .json(&payload)
        })
        .await
    }

    async fn fetch_pull_request_diff(&self, diff_url: &str) -> Result<String, GithubApiError> {
        let token = if self.is_trusted_url(diff_url) {
            Some(self.bearer_token().await?)
        } else {
            None
        };
        let http = self.auth.http();
        let bytes = http
            .request_bytes("fetch pull request diff", || {
                let request = http
                    .client()
                    .get(diff_url)
                    .header(reqwest::header::ACCEPT, "application/vnd.github.diff");
                match token.as_deref() {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn download_workflow_run_logs(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<u8>, GithubApiError> {
        let token = self.bearer_token().await?;
        let url = self.repo_url(repo, &format!("actions/runs/{run_id}/logs"));
        let http = self.auth.http();
        http.request_bytes("download workflow run logs", || {
            http.client().get(url.as_str()).bearer_auth(&token)
        })
        .await
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        request: &NewIssue,
    ) -> Result<CreatedIssue, GithubApiError> {
        let token = self.bearer_token().await?;
        let url = self.repo_url(repo, "issues");
        let http = self.auth.http();
        http.request_json("create issue", || {
            http.client()
                .post(url.as_str())
                .bearer_auth(&token)
                .json(request)
        })
        .await
    }
}

/// Factory handing out one [`GithubInstallationClient`] per handler invocation.
pub struct GithubAppClientFactory {
    auth: Arc<GithubAppAuth>,
    trusted_hosts: Vec<String>,
}

impl GithubAppClientFactory {
    /// `git_base` is the web host (e.g. `https://github.com`) serving `diff_url`s.
    pub fn new(auth: Arc<GithubAppAuth>, git_base: &str) -> Self {
        let trusted_hosts = vec![
            format!("{}/", auth.http().api_base()),
            format!("{}/", git_base.trim_end_matches('/')),
        ];
        Self {
            auth,
            trusted_hosts,
        }
    }
}

impl InstallationClientFactory for GithubAppClientFactory {
    fn client_for_installation(
        &self,
        installation_id: u64,
    ) -> Result<Arc<dyn GithubInstallationApi>, GithubApiError> {
        Ok(Arc::new(GithubInstallationClient::new(
            self.auth.clone(),
            installation_id,
            self.trusted_hosts.clone(),
        )))
    }
}
