use anyhow::{Context, Result};
use codex_github::codex_prompts::{
    is_codex_label, issue_branch_name, issue_commit_message, issue_prompt, pull_request_body,
    pull_request_title,
};
use codex_github::webhook_payloads::{IssuesLabeledPayload, RepoRef};
use tokio::sync::watch;

use super::{base_branch, HandlerContext, HandlerOutcome};
use crate::codex_generator::GeneratorRequest;
use crate::installation_api::{GithubInstallationApi, NewPullRequest};
use crate::repo_workspace::RepoWorkspace;

/// Run the generator over a snapshot of the repository and open a pull
/// request when it changed anything. Only the exact `codex` label triggers.
pub async fn handle_issue_labeled(
    ctx: &HandlerContext,
    payload: &IssuesLabeledPayload,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<HandlerOutcome> {
    let label_name = payload.label.as_ref().map(|label| label.name.as_str());
    if !label_name.is_some_and(is_codex_label) {
        return Ok(HandlerOutcome::ignored(format!(
            "label {:?} does not trigger codex",
            label_name.unwrap_or_default()
        )));
    }

    let repo = payload.repository.repo_ref()?;
    let api = ctx.client_for(payload.installation.as_ref())?;
    let workspace = ctx
        .workspaces
        .create_workspace(api.as_ref(), &repo)
        .await
        .with_context(|| format!("failed to prepare workspace for {repo}"))?;

    let result = solve_in_workspace(ctx, api.as_ref(), &repo, payload, &workspace, cancel).await;
    workspace.destroy();
    result
}

async fn solve_in_workspace(
    ctx: &HandlerContext,
    api: &dyn GithubInstallationApi,
    repo: &RepoRef,
    payload: &IssuesLabeledPayload,
    workspace: &RepoWorkspace,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<HandlerOutcome> {
    let issue = &payload.issue;
    let repo_dir = workspace.repo_dir();
    let base = base_branch(payload.repository.default_branch.as_deref());

    let fetch_token = api
        .installation_access_token()
        .await
        .context("failed to mint token for snapshot fetch")?;
    ctx.git
        .init_snapshot(
            repo_dir,
            &ctx.remote.authenticated_url(repo, &fetch_token.token),
            base,
        )
        .await
        .with_context(|| format!("failed to anchor snapshot of {repo} to {base}"))?;

    let output = ctx
        .generator
        .generate(GeneratorRequest {
            cwd: repo_dir.to_path_buf(),
            prompt: issue_prompt(issue.body.as_deref()),
            cancel,
        })
        .await
        .with_context(|| format!("generator failed for {repo}#{}", issue.number))?;
    tracing::debug!(
        repo = %repo,
        issue = issue.number,
        exit_code = ?output.exit_code,
        "generator finished for issue"
    );

    let branch = issue_branch_name(issue.number);
    ctx.git.configure_identity(repo_dir).await?;
    ctx.git.create_branch(repo_dir, &branch).await?;
    ctx.git.stage_all(repo_dir).await?;
    if !ctx.git.has_staged_changes(repo_dir).await? {
        tracing::info!(repo = %repo, issue = issue.number, "generator produced no changes");
        return Ok(HandlerOutcome::NoChanges);
    }
    ctx.git
        .commit(repo_dir, &issue_commit_message(issue.number))
        .await?;

    let push_token = api
        .installation_access_token()
        .await
        .context("failed to mint token for push")?;
    ctx.git
        .force_push(
            repo_dir,
            &ctx.remote.authenticated_url(repo, &push_token.token),
            &branch,
        )
        .await
        .with_context(|| format!("failed to push {branch} to {repo}"))?;

    let created = api
        .create_pull_request(
            repo,
            &NewPullRequest {
                head: branch.clone(),
                base: base.to_string(),
                title: pull_request_title(&issue.title),
                body: pull_request_body(issue.number),
            },
        )
        .await?;
    tracing::info!(
        repo = %repo,
        issue = issue.number,
        pull_request = created.number,
        branch = %branch,
        "opened pull request"
    );
    Ok(HandlerOutcome::PullRequestOpened {
        number: created.number,
        branch,
    })
}
