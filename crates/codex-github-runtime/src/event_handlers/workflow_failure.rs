use anyhow::{Context, Result};
use codex_github::codex_prompts::{workflow_failure_issue_title, workflow_failure_prompt};
use codex_github::webhook_payloads::WorkflowRunPayload;
use tokio::sync::watch;

use super::{HandlerContext, HandlerOutcome};
use crate::codex_generator::GeneratorRequest;
use crate::installation_api::NewIssue;

const FAILURE_CONCLUSION: &str = "failure";

/// Only failed runs are diagnosed; every other conclusion is ignored.
pub fn is_failed_run(payload: &WorkflowRunPayload) -> bool {
    payload.workflow_run.conclusion.as_deref() == Some(FAILURE_CONCLUSION)
}

/// Diagnose a failed workflow run from its logs and file the diagnosis as an issue.
pub async fn handle_workflow_run(
    ctx: &HandlerContext,
    payload: &WorkflowRunPayload,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<HandlerOutcome> {
    let run = &payload.workflow_run;
    if !is_failed_run(payload) {
        return Ok(HandlerOutcome::ignored(format!(
            "workflow run conclusion {:?} is not a failure",
            run.conclusion.as_deref().unwrap_or("none")
        )));
    }

    let repo = payload.repository.repo_ref()?;
    let api = ctx.client_for(payload.installation.as_ref())?;
    let log_bytes = api
        .download_workflow_run_logs(&repo, run.id)
        .await
        .with_context(|| format!("failed to download logs for {repo} run {}", run.id))?;
    let log_text = String::from_utf8_lossy(&log_bytes);

    let output = ctx
        .generator
        .generate(GeneratorRequest {
            cwd: ctx.generator_cwd.clone(),
            prompt: workflow_failure_prompt(&log_text),
            cancel,
        })
        .await
        .with_context(|| format!("generator failed diagnosing {repo} run {}", run.id))?;

    let created = api
        .create_issue(
            &repo,
            &NewIssue {
                title: workflow_failure_issue_title(run.id),
                body: output.stdout,
                labels: vec![ctx.pipeline_failure_label.clone()],
            },
        )
        .await?;
    tracing::info!(
        repo = %repo,
        run_id = run.id,
        workflow = run.name.as_deref().unwrap_or("unknown"),
        issue = created.number,
        "filed pipeline failure issue"
    );
    Ok(HandlerOutcome::IssueCreated {
        number: created.number,
    })
}
