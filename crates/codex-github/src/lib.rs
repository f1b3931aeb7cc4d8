//! Shared helpers for the Codex GitHub App webhook agent.
//! This crate provides the GitHub retry policy, webhook signature checks,
//! typed webhook payloads, and the prompt/naming rules consumed by the runtime.

pub mod codex_prompts;
pub mod github_api_error;
pub mod github_retry_policy;
pub mod webhook_payloads;
pub mod webhook_signature;
