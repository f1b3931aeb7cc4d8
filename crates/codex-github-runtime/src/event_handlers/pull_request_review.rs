use anyhow::{Context, Result};
use codex_github::codex_prompts::{review_body, review_event_for_output, review_prompt};
use codex_github::webhook_payloads::PullRequestPayload;
use tokio::sync::watch;

use super::{HandlerContext, HandlerOutcome};
use crate::codex_generator::GeneratorRequest;
use crate::installation_api::NewPullRequestReview;

/// Ask the generator to review the pull request diff and submit its verdict.
pub async fn handle_pull_request(
    ctx: &HandlerContext,
    payload: &PullRequestPayload,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<HandlerOutcome> {
    let pull = &payload.pull_request;
    let repo = payload.repository.repo_ref()?;
    let api = ctx.client_for(payload.installation.as_ref())?;

    let diff = api
        .fetch_pull_request_diff(&pull.diff_url)
        .await
        .with_context(|| format!("failed to fetch diff for {repo}#{}", pull.number))?;
    let output = ctx
        .generator
        .generate(GeneratorRequest {
            cwd: ctx.generator_cwd.clone(),
            prompt: review_prompt(&diff),
            cancel,
        })
        .await
        .with_context(|| format!("generator failed reviewing {repo}#{}", pull.number))?;

    let event = review_event_for_output(&output.stdout);
    api.create_pull_request_review(
        &repo,
        pull.number,
        &NewPullRequestReview {
            event,
            body: review_body(event, &output.stdout),
        },
    )
    .await?;
    tracing::info!(
        repo = %repo,
        pull_request = pull.number,
        event = event.as_str(),
        diff_bytes = diff.len(),
        "submitted pull request review"
    );
    Ok(HandlerOutcome::ReviewSubmitted {
        pull_number: pull.number,
        event,
    })
}
