use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use codex_github_runtime::RuntimeSettings;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "codex-agent",
    about = "GitHub App webhook agent that turns issues, pull requests and failed runs into Codex work",
    version
)]
/// Operational flags. Credentials come from `APP_ID`, `PRIVATE_KEY`,
/// `WEBHOOK_SECRET`, `OPENAI_API_KEY` and `PORT`.
pub(crate) struct Cli {
    #[arg(
        long,
        env = "CODEX_AGENT_BIND_HOST",
        default_value = "0.0.0.0",
        help = "Interface the webhook server binds to"
    )]
    pub(crate) bind_host: String,

    #[arg(
        long,
        env = "CODEX_AGENT_GITHUB_API_BASE",
        default_value = "https://api.github.com",
        help = "GitHub REST API base URL"
    )]
    pub(crate) github_api_base: String,

    #[arg(
        long,
        env = "CODEX_AGENT_GITHUB_GIT_BASE",
        default_value = "https://github.com",
        help = "Host used for git fetch/push and trusted for pull request diff downloads"
    )]
    pub(crate) github_git_base: String,

    #[arg(
        long,
        env = "CODEX_AGENT_GENERATOR_BIN",
        default_value = "codex",
        help = "Code-generation CLI executable"
    )]
    pub(crate) generator_bin: String,

    #[arg(
        long,
        env = "CODEX_AGENT_GENERATOR_TIMEOUT_SECONDS",
        default_value_t = 1_800,
        help = "Generator run timeout in seconds; 0 disables the timeout"
    )]
    pub(crate) generator_timeout_seconds: u64,

    #[arg(
        long,
        env = "CODEX_AGENT_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Connect timeout and per-request timeout for GitHub API calls in milliseconds"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long,
        env = "CODEX_AGENT_DOWNLOAD_TIMEOUT_MS",
        default_value_t = 600_000,
        value_parser = parse_positive_u64,
        help = "Timeout for repository tarball, workflow log and diff downloads in milliseconds"
    )]
    pub(crate) download_timeout_ms: u64,

    #[arg(
        long,
        env = "CODEX_AGENT_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per GitHub API request on 429/5xx and transient transport errors"
    )]
    pub(crate) retry_max_attempts: usize,

    #[arg(
        long,
        env = "CODEX_AGENT_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay between GitHub API retries in milliseconds"
    )]
    pub(crate) retry_base_delay_ms: u64,

    #[arg(
        long,
        env = "CODEX_AGENT_WORKSPACE_ROOT",
        help = "Directory holding per-delivery workspaces (defaults to the system temp dir)"
    )]
    pub(crate) workspace_root: Option<PathBuf>,

    #[arg(
        long,
        env = "CODEX_AGENT_GIT_BIN",
        default_value = "git",
        help = "git executable"
    )]
    pub(crate) git_bin: String,

    #[arg(
        long,
        env = "CODEX_AGENT_TAR_BIN",
        default_value = "tar",
        help = "tar executable used to extract repository tarballs"
    )]
    pub(crate) tar_bin: String,

    #[arg(
        long,
        env = "CODEX_AGENT_SYNCHRONOUS_DISPATCH",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Run handlers before answering the webhook instead of on a background task"
    )]
    pub(crate) synchronous_dispatch: bool,

    #[arg(
        long,
        env = "CODEX_AGENT_PIPELINE_FAILURE_LABEL",
        default_value = "pipeline-failure",
        help = "Label applied to issues filed for failed workflow runs"
    )]
    pub(crate) pipeline_failure_label: String,
}

impl Cli {
    pub(crate) fn runtime_settings(&self) -> RuntimeSettings {
        let defaults = RuntimeSettings::default();
        RuntimeSettings {
            bind_host: self.bind_host.clone(),
            github_api_base: self.github_api_base.clone(),
            github_git_base: self.github_git_base.clone(),
            generator_executable: self.generator_bin.clone(),
            generator_timeout: (self.generator_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.generator_timeout_seconds)),
            request_timeout_ms: self.request_timeout_ms,
            download_timeout_ms: self.download_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or(defaults.workspace_root),
            git_executable: self.git_bin.clone(),
            tar_executable: self.tar_bin.clone(),
            synchronous_dispatch: self.synchronous_dispatch,
            pipeline_failure_label: self.pipeline_failure_label.clone(),
        }
    }
}
