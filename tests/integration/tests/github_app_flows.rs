#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use codex_github::webhook_signature::sign_webhook_payload;
use codex_github_runtime::codex_generator::GENERATOR_MAX_STDOUT_BYTES;
use codex_github_runtime::{
    serve_webhooks, AppConfig, CodexCliConfig, CodexCliGenerator, GithubAppAuth,
    GithubAppClientFactory, GithubHttp, HandlerContext, RuntimeSettings, WebhookDispatcher,
    WebhookServerState,
};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

const TEST_PRIVATE_KEY: &str =
    include_str!("../../../crates/codex-github-runtime/testdata/test-app-key.pem");
const WEBHOOK_SECRET: &str = "integration-secret";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@test"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\nset -eu\n{body}\n")).expect("write script");
    let mut permissions = std::fs::metadata(path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions).expect("chmod");
}

struct Agent {
    root: TempDir,
    base: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Agent {
    fn workspace_root(&self) -> PathBuf {
        self.root.path().join("workspaces")
    }

    fn remote(&self) -> PathBuf {
        self.root.path().join("git/acme/widgets.git")
    }

    async fn post(&self, event: &str, payload: &Value, signed: bool) -> reqwest::Response {
        let body = payload.to_string();
        let mut request = reqwest::Client::new()
            .post(format!("{}/api/github/webhooks", self.base))
            .header("x-github-event", event)
            .header("x-github-delivery", "integration-delivery");
        if signed {
            request = request.header(
                "x-hub-signature-256",
                sign_webhook_payload(body.as_bytes(), WEBHOOK_SECRET).expect("sign"),
            );
        }
        request.body(body).send().await.expect("send webhook")
    }
}

/// Seed `<root>/git/acme/widgets.git` and return a GitHub-shaped tarball of its `main`.
fn seed_repository(root: &Path) -> Vec<u8> {
    let source = root.join("source");
    std::fs::create_dir_all(&source).expect("source");
    git(&source, &["init", "-q", "-b", "main"]);
    std::fs::write(source.join("README.md"), "widgets\n").expect("readme");
    git(&source, &["add", "-A"]);
    git(&source, &["commit", "-q", "-m", "initial"]);
    let owner = root.join("git/acme");
    std::fs::create_dir_all(&owner).expect("owner");
    git(
        &owner,
        &["clone", "-q", "--bare", source.to_str().expect("utf8"), "widgets.git"],
    );

    let archive = root.join("widgets.tar.gz");
    git(
        &source,
        &[
            "archive",
            "--format=tar.gz",
            "--prefix=acme-widgets-0a1b2c3/",
            "-o",
            archive.to_str().expect("utf8"),
            "main",
        ],
    );
    std::fs::read(archive).expect("archive")
}

async fn start_agent(github: &MockServer, generator_script: &str) -> (Agent, Vec<u8>) {
    let root = tempfile::tempdir().expect("root");
    let tarball = seed_repository(root.path());
    let workspace_root = root.path().join("workspaces");
    std::fs::create_dir_all(&workspace_root).expect("workspaces");
    let generator = root.path().join("codex");
    write_script(&generator, generator_script);

    let config = AppConfig {
        app_id: "12345".to_string(),
        private_key: TEST_PRIVATE_KEY.to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        generator_api_key: "sk-integration".to_string(),
        port: 0,
    };
    let settings = RuntimeSettings {
        github_api_base: github.base_url(),
        github_git_base: root.path().join("git").display().to_string(),
        generator_executable: generator.display().to_string(),
        generator_timeout: Some(Duration::from_secs(30)),
        retry_base_delay_ms: 1,
        workspace_root,
        synchronous_dispatch: true,
        ..RuntimeSettings::default()
    };
    let auth = Arc::new(
        GithubAppAuth::new(&config, GithubHttp::new(&settings).expect("http")).expect("auth"),
    );
    let clients = Arc::new(GithubAppClientFactory::new(auth, &settings.github_git_base));
    let generator = Arc::new(CodexCliGenerator::new(CodexCliConfig {
        executable: settings.generator_executable.clone(),
        api_key: config.generator_api_key.clone(),
        timeout: settings.generator_timeout,
        max_stdout_bytes: GENERATOR_MAX_STDOUT_BYTES,
    }));
    let context = Arc::new(HandlerContext::new(&settings, clients, generator));
    let state = Arc::new(WebhookServerState {
        webhook_secret: config.webhook_secret.clone(),
        dispatcher: WebhookDispatcher::new(context, settings.synchronous_dispatch),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let _ = serve_webhooks(listener, state, std::future::pending()).await;
    });
    tokio::time::sleep(Duration::from_millis(25)).await;
    (
        Agent {
            root,
            base: format!("http://{addr}"),
            handle,
        },
        tarball,
    )
}

fn mock_access_token(github: &MockServer) -> httpmock::Mock<'_> {
    github.mock(|when, then| {
        when.method(POST).path("/app/installations/7/access_tokens");
        then.status(201)
            .json_body(json!({"token": "ghs_integration", "expires_at": "2099-01-01T00:00:00Z"}));
    })
}

#[tokio::test]
async fn integration_codex_labeled_issue_becomes_pull_request() {
    let github = MockServer::start();
    let (agent, tarball) = start_agent(
        &github,
        r#"[ "$4" = "Please fix X" ] || exit 9
[ "$OPENAI_API_KEY" = "sk-integration" ] || exit 8
printf 'fixed\n' > fix.txt
echo "applied fix""#,
    )
    .await;
    let token = mock_access_token(&github);
    let tarball_mock = github.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/tarball")
            .header("authorization", "Bearer ghs_integration");
        then.status(200).body(tarball.clone());
    });
    let pulls = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls")
            .json_body(json!({
                "head": "codex/issue-42",
                "base": "main",
                "title": "Codex: Fix bug",
                "body": "Closes #42"
            }));
        then.status(201)
            .json_body(json!({"number": 101, "html_url": "https://github.com/acme/widgets/pull/101"}));
    });

    let response = agent
        .post(
            "issues",
            &json!({
                "action": "labeled",
                "label": { "name": "codex" },
                "issue": { "number": 42, "title": "Fix bug", "body": "Please fix X" },
                "repository": { "full_name": "acme/widgets", "default_branch": "main" },
                "installation": { "id": 7 }
            }),
            true,
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["status"], "accepted");

    tarball_mock.assert();
    pulls.assert();
    assert_eq!(token.hits(), 3);
    assert_eq!(git(&agent.remote(), &["show", "codex/issue-42:fix.txt"]), "fixed");
    assert_eq!(
        git(&agent.remote(), &["rev-parse", "codex/issue-42^"]),
        git(&agent.remote(), &["rev-parse", "main"])
    );
    assert_eq!(
        std::fs::read_dir(agent.workspace_root()).expect("workspaces").count(),
        0
    );
    agent.handle.abort();
}

#[tokio::test]
async fn integration_issue_without_generated_changes_opens_no_pull_request() {
    let github = MockServer::start();
    let (agent, tarball) = start_agent(&github, "echo nothing to change").await;
    let _token = mock_access_token(&github);
    let _tarball = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/tarball");
        then.status(200).body(tarball.clone());
    });
    let pulls = github.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/pulls");
        then.status(201).json_body(json!({"number": 1}));
    });

    agent
        .post(
            "issues",
            &json!({
                "action": "labeled",
                "label": { "name": "codex" },
                "issue": { "number": 3, "title": "Noop", "body": null },
                "repository": { "full_name": "acme/widgets" },
                "installation": { "id": 7 }
            }),
            true,
        )
        .await;

    assert_eq!(pulls.hits(), 0);
    assert_eq!(
        std::fs::read_dir(agent.workspace_root()).expect("workspaces").count(),
        0
    );
    agent.handle.abort();
}

#[tokio::test]
async fn integration_pull_request_diff_is_reviewed_and_approved() {
    let github = MockServer::start();
    let (agent, _) = start_agent(
        &github,
        r#"case "$4" in
  *"+fn fixed"*) echo APPROVE ;;
  *) echo "missing diff" ;;
esac"#,
    )
    .await;
    let _token = mock_access_token(&github);
    let diff = github.mock(|when, then| {
        when.method(GET)
            .path("/acme/widgets/pull/5.diff")
            .header("authorization", "Bearer ghs_integration");
        then.status(200).body("diff --git a/lib.rs b/lib.rs\n+fn fixed() {}\n");
    });
    let review = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls/5/reviews")
            .json_body(json!({"event": "APPROVE", "body": "✅ LGTM – approved by Codex."}));
        then.status(200).json_body(json!({"id": 77}));
    });

    let response = agent
        .post(
            "pull_request",
            &json!({
                "action": "synchronize",
                "pull_request": { "number": 5, "diff_url": github.url("/acme/widgets/pull/5.diff") },
                "repository": { "full_name": "acme/widgets" },
                "installation": { "id": 7 }
            }),
            true,
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    diff.assert();
    review.assert();
    agent.handle.abort();
}

#[tokio::test]
async fn integration_failed_workflow_run_files_diagnosis_issue() {
    let github = MockServer::start();
    let (agent, _) = start_agent(
        &github,
        r#"case "$4" in
  "A CI run failed, diagnose briefly:"*"linker error"*) echo "Missing system library." ;;
  *) exit 4 ;;
esac"#,
    )
    .await;
    let _token = mock_access_token(&github);
    let logs = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/actions/runs/9001/logs");
        then.status(200).body("job build\nlinker error: cannot find -lssl\n");
    });
    let issue = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/issues")
            .json_body(json!({
                "title": "CI failed – run #9001",
                "body": "Missing system library.",
                "labels": ["pipeline-failure"]
            }));
        then.status(201).json_body(json!({"number": 12}));
    });

    agent
        .post(
            "workflow_run",
            &json!({
                "action": "completed",
                "workflow_run": { "id": 9001, "conclusion": "failure", "name": "ci" },
                "repository": { "full_name": "acme/widgets" },
                "installation": { "id": 7 }
            }),
            true,
        )
        .await;
    logs.assert();
    issue.assert();
    agent.handle.abort();
}

#[tokio::test]
async fn regression_unsigned_delivery_triggers_no_github_calls() {
    let github = MockServer::start();
    let (agent, _) = start_agent(&github, "echo APPROVE").await;
    let token = mock_access_token(&github);

    let response = agent
        .post(
            "pull_request",
            &json!({
                "action": "opened",
                "pull_request": { "number": 5, "diff_url": github.url("/acme/widgets/pull/5.diff") },
                "repository": { "full_name": "acme/widgets" },
                "installation": { "id": 7 }
            }),
            false,
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(token.hits(), 0);
    agent.handle.abort();
}
