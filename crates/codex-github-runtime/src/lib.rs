//! Runtime for the Codex GitHub App: authentication, workspaces, git,
//! generator invocation, event handlers and the webhook server.

pub mod app_config;
pub mod codex_generator;
pub mod event_handlers;
pub mod git_ops;
pub mod github_api_client;
pub mod github_app_auth;
pub mod github_http;
pub mod installation_api;
mod process_helpers;
pub mod repo_workspace;
pub mod webhook_server;

#[cfg(test)]
mod test_support;

pub use app_config::{load_app_config, AppConfig, ConfigError, RuntimeSettings};
pub use codex_generator::{CodeGenerator, CodexCliConfig, CodexCliGenerator};
pub use event_handlers::{HandlerContext, HandlerOutcome};
pub use github_api_client::GithubAppClientFactory;
pub use github_app_auth::GithubAppAuth;
pub use github_http::GithubHttp;
pub use webhook_server::{
    build_webhook_router, run_webhook_server, serve_webhooks, WebhookDispatcher,
    WebhookServerState,
};
