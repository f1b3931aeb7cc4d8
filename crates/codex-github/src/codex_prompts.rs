//! Prompt templates and naming rules shared by the webhook event handlers.

/// Label that opts an issue into automated code generation.
pub const CODEX_TRIGGER_LABEL: &str = "codex";
pub const DEFAULT_ISSUE_PROMPT: &str = "solve this issue";
pub const APPROVE_REVIEW_VERDICT: &str = "APPROVE";
pub const APPROVE_REVIEW_BODY: &str = "✅ LGTM – approved by Codex.";
pub const DEFAULT_PIPELINE_FAILURE_LABEL: &str = "pipeline-failure";
/// Maximum number of log characters embedded in the CI diagnosis prompt.
pub const WORKFLOW_LOG_PROMPT_CHAR_LIMIT: usize = 50_000;
pub const ISSUE_BRANCH_PREFIX: &str = "codex/issue-";

pub fn is_codex_label(name: &str) -> bool {
    name == CODEX_TRIGGER_LABEL
}

/// Issue body used as the generation prompt, or the fallback when it is blank.
pub fn issue_prompt(body: Option<&str>) -> String {
    match body {
        Some(body) if !body.trim().is_empty() => body.to_string(),
        _ => DEFAULT_ISSUE_PROMPT.to_string(),
    }
}

/// Deterministic branch for an issue; reruns overwrite the same ref.
pub fn issue_branch_name(issue_number: u64) -> String {
    format!("{ISSUE_BRANCH_PREFIX}{issue_number}")
}

pub fn issue_commit_message(issue_number: u64) -> String {
    format!("Codex changes for #{issue_number}")
}

pub fn pull_request_title(issue_title: &str) -> String {
    format!("Codex: {issue_title}")
}

pub fn pull_request_body(issue_number: u64) -> String {
    format!("Closes #{issue_number}")
}

pub fn review_prompt(diff: &str) -> String {
    format!("Review this diff and reply \"{APPROVE_REVIEW_VERDICT}\" if perfect:\n{diff}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `ReviewEvent` values.
pub enum ReviewEvent {
    Approve,
    Comment,
}

impl ReviewEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Comment => "COMMENT",
        }
    }
}

/// Approve only when the generator answered with the bare verdict.
pub fn review_event_for_output(output: &str) -> ReviewEvent {
    if output.trim() == APPROVE_REVIEW_VERDICT {
        ReviewEvent::Approve
    } else {
        ReviewEvent::Comment
    }
}

/// Review body submitted alongside `event`.
pub fn review_body(event: ReviewEvent, output: &str) -> String {
    match event {
        ReviewEvent::Approve => APPROVE_REVIEW_BODY.to_string(),
        ReviewEvent::Comment => output.to_string(),
    }
}

/// Return at most the first `max_chars` characters of `text`.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub fn workflow_failure_prompt(log_text: &str) -> String {
    format!(
        "A CI run failed, diagnose briefly:\n{}",
        take_chars(log_text, WORKFLOW_LOG_PROMPT_CHAR_LIMIT)
    )
}

pub fn workflow_failure_issue_title(run_id: u64) -> String {
    format!("CI failed – run #{run_id}")
}
