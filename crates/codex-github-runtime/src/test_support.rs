//! Shared fixtures for runtime unit tests.

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use codex_github::github_api_error::GithubApiError;
use codex_github::webhook_payloads::RepoRef;

use crate::codex_generator::{CodeGenerator, GeneratorError, GeneratorOutput, GeneratorRequest};
use crate::installation_api::{
    CreatedIssue, CreatedPullRequest, CreatedReview, GithubInstallationApi,
    InstallationClientFactory, InstallationToken, NewIssue, NewPullRequest, NewPullRequestReview,
};

pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("../testdata/test-app-key.pem");

#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nset -eu\n{body}\n")).expect("write script");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod");
    path
}

pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
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

/// Bare remote at `<root>/<owner>/<name>.git` with one commit on `main`
/// containing `README.md`.
pub(crate) fn seed_bare_remote(root: &Path, owner: &str, name: &str) -> PathBuf {
    seed_bare_remote_with(root, owner, name, &[("README.md", "widgets\n")])
}

/// Bare remote whose single `main` commit holds exactly `files`.
pub(crate) fn seed_bare_remote_with(
    root: &Path,
    owner: &str,
    name: &str,
    files: &[(&str, &str)],
) -> PathBuf {
    let source = root.join(format!("{owner}-{name}-source"));
    std::fs::create_dir_all(&source).expect("source dir");
    git(&source, &["init", "-q", "-b", "main"]);
    for (relative, content) in files {
        let path = source.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent");
        }
        std::fs::write(path, content).expect("write file");
    }
    git(&source, &["add", "-A"]);
    git(&source, &["commit", "-q", "-m", "initial"]);
    let owner_dir = root.join(owner);
    std::fs::create_dir_all(&owner_dir).expect("owner dir");
    git(
        &owner_dir,
        &[
            "clone",
            "-q",
            "--bare",
            source.to_str().expect("utf8"),
            &format!("{name}.git"),
        ],
    );
    owner_dir.join(format!("{name}.git"))
}

/// `git archive` of `branch`, so `.gitattributes` export rules apply the way
/// the tarball endpoint applies them.
pub(crate) fn archive_branch(remote: &Path, branch: &str) -> Vec<u8> {
    let staging = tempfile::tempdir().expect("staging");
    let archive = staging.path().join("archive.tar.gz");
    git(
        remote,
        &[
            "archive",
            "--format=tar.gz",
            "--prefix=acme-widgets-0a1b2c3/",
            "-o",
            archive.to_str().expect("utf8"),
            branch,
        ],
    );
    std::fs::read(archive).expect("read archive")
}

/// gzip tarball shaped like GitHub's: one `<owner>-<repo>-<sha>/` top-level dir.
pub(crate) fn build_tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let staging = tempfile::tempdir().expect("staging");
    let top = staging.path().join("acme-widgets-0a1b2c3");
    for (relative, content) in files {
        let path = top.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent");
        }
        std::fs::write(path, content).expect("write file");
    }
    std::fs::create_dir_all(&top).expect("top dir");
    let archive = staging.path().join("archive.tar.gz");
    let status = StdCommand::new("tar")
        .args(["czf", archive.to_str().expect("utf8"), "-C"])
        .arg(staging.path())
        .arg("acme-widgets-0a1b2c3")
        .status()
        .expect("spawn tar");
    assert!(status.success(), "tar czf failed");
    std::fs::read(archive).expect("read archive")
}

pub(crate) fn widgets_repo() -> RepoRef {
    RepoRef {
        owner: "acme".to_string(),
        name: "widgets".to_string(),
    }
}

/// Recording in-memory [`GithubInstallationApi`].
#[derive(Default)]
pub(crate) struct FakeInstallationApi {
    pub(crate) tarball: Vec<u8>,
    pub(crate) diff: String,
    pub(crate) workflow_logs: Vec<u8>,
    pub(crate) fail_tarball: bool,
    pub(crate) fail_pull_request: bool,
    pub(crate) tokens_minted: AtomicUsize,
    pub(crate) diff_urls: Mutex<Vec<String>>,
    pub(crate) log_downloads: Mutex<Vec<(RepoRef, u64)>>,
    pub(crate) pull_requests: Mutex<Vec<(RepoRef, NewPullRequest)>>,
    pub(crate) reviews: Mutex<Vec<(RepoRef, u64, NewPullRequestReview)>>,
    pub(crate) issues: Mutex<Vec<(RepoRef, NewIssue)>>,
}

impl FakeInstallationApi {
    fn failure(operation: &str) -> GithubApiError {
        GithubApiError::Status {
            operation: operation.to_string(),
            status: 500,
            body: "boom".to_string(),
        }
    }
}

#[async_trait]
impl GithubInstallationApi for FakeInstallationApi {
    fn installation_id(&self) -> u64 {
        7
    }

    async fn installation_access_token(&self) -> Result<InstallationToken, GithubApiError> {
        let minted = self.tokens_minted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InstallationToken {
            token: format!("ghs_fake_{minted}"),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn download_repository_tarball(&self, _repo: &RepoRef) -> Result<Vec<u8>, GithubApiError> {
        if self.fail_tarball {
            return Err(Self::failure("download repository tarball"));
        }
        Ok(self.tarball.clone())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GithubApiError> {
        if self.fail_pull_request {
            return Err(Self::failure("create pull request"));
        }
        let mut pulls = self.pull_requests.lock().expect("pulls lock");
        pulls.push((repo.clone(), request.clone()));
        Ok(CreatedPullRequest {
            number: 100 + pulls.len() as u64,
            html_url: None,
        })
    }

    async fn create_pull_request_review(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        request: &NewPullRequestReview,
    ) -> Result<CreatedReview, GithubApiError> {
        let mut reviews = self.reviews.lock().expect("reviews lock");
        reviews.push((repo.clone(), pull_number, request.clone()));
        Ok(CreatedReview {
            id: reviews.len() as u64,
        })
    }

    async fn fetch_pull_request_diff(&self, diff_url: &str) -> Result<String, GithubApiError> {
        self.diff_urls
            .lock()
            .expect("diff lock")
            .push(diff_url.to_string());
        Ok(self.diff.clone())
    }

    async fn download_workflow_run_logs(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<u8>, GithubApiError> {
        self.log_downloads
            .lock()
            .expect("logs lock")
            .push((repo.clone(), run_id));
        Ok(self.workflow_logs.clone())
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        request: &NewIssue,
    ) -> Result<CreatedIssue, GithubApiError> {
        let mut issues = self.issues.lock().expect("issues lock");
        issues.push((repo.clone(), request.clone()));
        Ok(CreatedIssue {
            number: 500 + issues.len() as u64,
            html_url: None,
        })
    }
}

pub(crate) struct FakeClientFactory {
    pub(crate) api: Arc<FakeInstallationApi>,
    pub(crate) requested_installations: Mutex<Vec<u64>>,
}

impl FakeClientFactory {
    pub(crate) fn new(api: Arc<FakeInstallationApi>) -> Self {
        Self {
            api,
            requested_installations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requested(&self) -> Vec<u64> {
        self.requested_installations
            .lock()
            .expect("installations lock")
            .clone()
    }
}

impl InstallationClientFactory for FakeClientFactory {
    fn client_for_installation(
        &self,
        installation_id: u64,
    ) -> Result<Arc<dyn GithubInstallationApi>, GithubApiError> {
        self.requested_installations
            .lock()
            .expect("installations lock")
            .push(installation_id);
        Ok(self.api.clone())
    }
}

type GeneratorBehavior =
    dyn Fn(&GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> + Send + Sync;

/// In-process [`CodeGenerator`] whose effect on `cwd` is supplied by the test.
pub(crate) struct FakeGenerator {
    behavior: Box<GeneratorBehavior>,
    pub(crate) requests: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeGenerator {
    pub(crate) fn new<F>(behavior: F) -> Self
    where
        F: Fn(&GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> + Send + Sync + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::new(move |_| {
            Ok(GeneratorOutput {
                stdout: stdout.clone(),
                exit_code: Some(0),
                ..GeneratorOutput::default()
            })
        })
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    pub(crate) fn cwds(&self) -> Vec<PathBuf> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(cwd, _)| cwd.clone())
            .collect()
    }
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    async fn generate(&self, request: GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((request.cwd.clone(), request.prompt.clone()));
        (self.behavior)(&request)
    }
}

/// [`CodeGenerator`] that takes `delay` to answer and honours cancellation.
pub(crate) struct CancellableGenerator {
    delay: StdDuration,
    stdout: String,
    cancelled: AtomicUsize,
}

impl CancellableGenerator {
    pub(crate) fn new(delay: StdDuration, stdout: &str) -> Self {
        Self {
            delay,
            stdout: stdout.to_string(),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for CancellableGenerator {
    async fn generate(&self, request: GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        let cancel_rx = request.cancel;
        let cancel = async move {
            let Some(mut cancel_rx) = cancel_rx else {
                return std::future::pending().await;
            };
            while !*cancel_rx.borrow() {
                if cancel_rx.changed().await.is_err() {
                    return std::future::pending().await;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(GeneratorOutput {
                stdout: self.stdout.clone(),
                exit_code: Some(0),
                ..GeneratorOutput::default()
            }),
            _ = cancel => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(GeneratorError::Cancelled)
            }
        }
    }
}
