use std::time::{Duration, SystemTime, UNIX_EPOCH};

use codex_github::github_api_error::GithubApiError;
use codex_github::github_retry_policy::{
    AttemptFailure, RateLimitHint, RetryDecision, RetryPolicy,
};
use serde::de::DeserializeOwned;

use crate::app_config::RuntimeSettings;

#[derive(Clone)]
/// Retrying HTTP transport shared by the app-auth and installation clients.
pub struct GithubHttp {
    http: reqwest::Client,
    api_base: String,
    request_timeout: Duration,
    download_timeout: Duration,
    retry: RetryPolicy,
}

impl GithubHttp {
    pub fn new(settings: &RuntimeSettings) -> Result<Self, GithubApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("codex-github-app-agent"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );

        let request_timeout = Duration::from_millis(settings.request_timeout_ms.max(1));
        // No client-wide total timeout: downloads get their own budget per request.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|source| GithubApiError::Transport {
                operation: "client setup".to_string(),
                source,
            })?;
        Ok(Self {
            http: client,
            api_base: settings.github_api_base.trim_end_matches('/').to_string(),
            request_timeout,
            download_timeout: Duration::from_millis(
                settings.download_timeout_ms.max(settings.request_timeout_ms).max(1),
            ),
            retry: RetryPolicy::new(settings.retry_max_attempts, settings.retry_base_delay_ms),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Absolute API URL for a path such as `/repos/acme/widgets/pulls`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub async fn request_json<T, F>(
        &self,
        operation: &str,
        request_builder: F,
    ) -> Result<T, GithubApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self
            .send_with_retry(operation, self.request_timeout, request_builder)
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|error| GithubApiError::Decode {
                operation: operation.to_string(),
                message: error.to_string(),
            })
    }

    /// Like [`Self::request_json`] but under the download timeout, for
    /// archives and logs whose bodies can be large.
    pub async fn request_bytes<F>(
        &self,
        operation: &str,
        request_builder: F,
    ) -> Result<Vec<u8>, GithubApiError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self
            .send_with_retry(operation, self.download_timeout, request_builder)
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| GithubApiError::Transport {
                operation: operation.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        timeout: Duration,
        mut request_builder: F,
    ) -> Result<reqwest::Response, GithubApiError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let (failure, error) = match request_builder().timeout(timeout).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let hint = RateLimitHint::from_headers(response.headers(), unix_now_secs());
                    let body = response.text().await.unwrap_or_default();
                    (
                        AttemptFailure::Status { status, hint },
                        GithubApiError::from_status(operation, status, &body),
                    )
                }
                Err(source) => (
                    AttemptFailure::transport(&source),
                    GithubApiError::Transport {
                        operation: operation.to_string(),
                        source,
                    },
                ),
            };
            match self.retry.decide(attempt, failure) {
                RetryDecision::Retry { delay } => {
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying github api request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
