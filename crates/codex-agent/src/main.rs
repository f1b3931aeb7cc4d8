mod bootstrap_helpers;
mod cli_args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codex_github_runtime::codex_generator::GENERATOR_MAX_STDOUT_BYTES;
use codex_github_runtime::{
    load_app_config, run_webhook_server, AppConfig, CodexCliConfig, CodexCliGenerator,
    GithubAppAuth, GithubAppClientFactory, GithubHttp, HandlerContext, RuntimeSettings,
    WebhookDispatcher, WebhookServerState,
};

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = match load_app_config() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "invalid configuration");
            std::process::exit(1);
        }
    };
    run_agent(&config, &cli.runtime_settings()).await
}

async fn run_agent(config: &AppConfig, settings: &RuntimeSettings) -> Result<()> {
    let http = GithubHttp::new(settings).context("failed to build github http client")?;
    let auth = Arc::new(GithubAppAuth::new(config, http).context("failed to load github app key")?);
    let clients = Arc::new(GithubAppClientFactory::new(auth, &settings.github_git_base));
    let generator = Arc::new(CodexCliGenerator::new(CodexCliConfig {
        executable: settings.generator_executable.clone(),
        api_key: config.generator_api_key.clone(),
        timeout: settings.generator_timeout,
        max_stdout_bytes: GENERATOR_MAX_STDOUT_BYTES,
    }));
    let context = Arc::new(HandlerContext::new(settings, clients, generator));
    let state = Arc::new(WebhookServerState {
        webhook_secret: config.webhook_secret.clone(),
        dispatcher: WebhookDispatcher::new(context, settings.synchronous_dispatch),
    });
    tracing::info!(
        app_id = %config.app_id,
        generator = %settings.generator_executable,
        workspace_root = %settings.workspace_root.display(),
        "codex agent starting"
    );
    run_webhook_server(&settings.bind_host, config.port, state).await
}
