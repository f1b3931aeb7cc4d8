//! Process configuration: required GitHub App credentials from the environment
//! plus the non-secret runtime settings supplied by the CLI layer.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const APP_ID_ENV: &str = "APP_ID";
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
pub const WEBHOOK_SECRET_ENV: &str = "WEBHOOK_SECRET";
pub const GENERATOR_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const PORT_ENV: &str = "PORT";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `ConfigError` values.
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVariable(&'static str),
    #[error("invalid {PORT_ENV} value '{0}': expected an integer between 1 and 65535")]
    InvalidPort(String),
}

#[derive(Clone, PartialEq, Eq)]
/// Credentials and listener port of the GitHub App, loaded once at startup.
pub struct AppConfig {
    pub app_id: String,
    pub private_key: String,
    pub webhook_secret: String,
    pub generator_api_key: String,
    pub port: u16,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("generator_api_key", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Load [`AppConfig`] from the process environment.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    load_app_config_from(|name| std::env::var(name).ok())
}

/// Load [`AppConfig`] through `lookup`, which maps a variable name to its value.
pub fn load_app_config_from<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |name: &'static str| {
        lookup(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVariable(name))
    };

    let app_id = required(APP_ID_ENV)?.trim().to_string();
    let private_key = normalize_private_key(&required(PRIVATE_KEY_ENV)?);
    let webhook_secret = required(WEBHOOK_SECRET_ENV)?;
    let generator_api_key = required(GENERATOR_API_KEY_ENV)?.trim().to_string();
    let port = match lookup(PORT_ENV).filter(|value| !value.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port > 0)
            .ok_or(ConfigError::InvalidPort(raw))?,
        None => DEFAULT_PORT,
    };

    Ok(AppConfig {
        app_id,
        private_key,
        webhook_secret,
        generator_api_key,
        port,
    })
}

/// Env files often carry PEM keys on one line with literal `\n` escapes.
fn normalize_private_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("\\n") && !trimmed.contains('\n') {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Non-secret operational settings; every field has a CLI flag and env var.
pub struct RuntimeSettings {
    pub bind_host: String,
    pub github_api_base: String,
    pub github_git_base: String,
    pub generator_executable: String,
    pub generator_timeout: Option<Duration>,
    /// Connect timeout and whole-request budget for JSON API calls.
    pub request_timeout_ms: u64,
    /// Whole-request budget for tarball, log and diff downloads.
    pub download_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub workspace_root: PathBuf,
    pub git_executable: String,
    pub tar_executable: String,
    pub synchronous_dispatch: bool,
    pub pipeline_failure_label: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            github_api_base: "https://api.github.com".to_string(),
            github_git_base: "https://github.com".to_string(),
            generator_executable: "codex".to_string(),
            generator_timeout: Some(Duration::from_secs(1_800)),
            request_timeout_ms: 30_000,
            download_timeout_ms: 600_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            workspace_root: std::env::temp_dir(),
            git_executable: "git".to_string(),
            tar_executable: "tar".to_string(),
            synchronous_dispatch: false,
            pipeline_failure_label: codex_github::codex_prompts::DEFAULT_PIPELINE_FAILURE_LABEL
                .to_string(),
        }
    }
}
