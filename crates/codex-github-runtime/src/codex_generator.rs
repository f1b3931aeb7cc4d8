//! Invocation of the external code-generation CLI.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use codex_github::codex_prompts::take_chars;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::app_config::GENERATOR_API_KEY_ENV;

/// Standard-output ceiling for one generator run.
pub const GENERATOR_MAX_STDOUT_BYTES: usize = 16 * 1024 * 1024;
const GENERATOR_MAX_STDERR_BYTES: usize = 64 * 1024;
const STDERR_LOG_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct GeneratorRequest {
    pub cwd: PathBuf,
    pub prompt: String,
    /// Flipping the channel to `true` abandons the in-flight run.
    pub cancel: Option<watch::Receiver<bool>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Captured result of one generator run. Failures are recorded, not raised.
pub struct GeneratorOutput {
    /// Whitespace-trimmed standard output.
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub spawn_error: Option<String>,
    pub stdout_truncated: bool,
}

impl GeneratorOutput {
    pub fn succeeded(&self) -> bool {
        self.spawn_error.is_none() && self.exit_code == Some(0) && !self.stdout_truncated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `GeneratorError` values.
pub enum GeneratorError {
    #[error("generator timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("generator run was cancelled")]
    Cancelled,
}

#[async_trait]
/// Trait contract for `CodeGenerator` behavior.
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: GeneratorRequest) -> Result<GeneratorOutput, GeneratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexCliConfig {
    pub executable: String,
    pub api_key: String,
    pub timeout: Option<Duration>,
    pub max_stdout_bytes: usize,
}

/// Runs `<executable> -q -a full-auto <prompt>` with the API key in its environment.
#[derive(Debug, Clone)]
pub struct CodexCliGenerator {
    config: CodexCliConfig,
}

impl CodexCliGenerator {
    pub fn new(config: CodexCliConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CodeGenerator for CodexCliGenerator {
    async fn generate(&self, request: GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        let mut command = Command::new(&self.config.executable);
        command.kill_on_drop(true);
        command.args(["-q", "-a", "full-auto"]);
        command.arg(&request.prompt);
        command.current_dir(&request.cwd);
        command.env(GENERATOR_API_KEY_ENV, &self.config.api_key);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = match spawn_with_text_file_busy_retry(&mut command).await {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!(
                    executable = %self.config.executable,
                    error = %error,
                    "failed to spawn generator"
                );
                return Ok(GeneratorOutput {
                    spawn_error: Some(format!(
                        "failed to spawn generator '{}': {error}",
                        self.config.executable
                    )),
                    ..GeneratorOutput::default()
                });
            }
        };

        let run = collect_child_output(child, self.config.max_stdout_bytes);
        let bounded = async {
            match self.config.timeout {
                Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                    GeneratorError::TimedOut {
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }
                }),
                None => Ok(run.await),
            }
        };
        let collected = tokio::select! {
            result = bounded => result?,
            _ = cancellation_signal(request.cancel) => return Err(GeneratorError::Cancelled),
        };

        let output = match collected {
            Ok(collected) => GeneratorOutput {
                stdout: String::from_utf8_lossy(&collected.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&collected.stderr).trim().to_string(),
                exit_code: collected.status.code(),
                spawn_error: None,
                stdout_truncated: collected.stdout_truncated,
            },
            Err(error) => GeneratorOutput {
                spawn_error: Some(format!("failed to collect generator output: {error}")),
                ..GeneratorOutput::default()
            },
        };
        if !output.succeeded() {
            tracing::warn!(
                exit_code = ?output.exit_code,
                stdout_truncated = output.stdout_truncated,
                stderr = %take_chars(&output.stderr, STDERR_LOG_CHARS),
                "generator did not complete cleanly; continuing with captured output"
            );
        }
        Ok(output)
    }
}

struct CollectedOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stdout_truncated: bool,
    stderr: Vec<u8>,
}

async fn collect_child_output(mut child: Child, max_stdout_bytes: usize) -> std::io::Result<CollectedOutput> {
    let stdout = child.stdout.take();
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_capped(stderr, GENERATOR_MAX_STDERR_BYTES)));

    let (stdout, stdout_truncated) = match stdout {
        Some(stdout) => read_capped(stdout, max_stdout_bytes).await?,
        None => (Vec::new(), false),
    };
    if stdout_truncated {
        // The child would otherwise block on a full pipe.
        let _ = child.start_kill();
    }
    let status = child.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task
            .await
            .ok()
            .and_then(Result::ok)
            .map(|(bytes, _)| bytes)
            .unwrap_or_default(),
        None => Vec::new(),
    };
    Ok(CollectedOutput {
        status,
        stdout,
        stdout_truncated,
        stderr,
    })
}

/// Read until EOF or `max_bytes`, reporting whether the stream went past the cap.
async fn read_capped<R>(reader: R, max_bytes: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    reader.take(limit).read_to_end(&mut buffer).await?;
    let truncated = buffer.len() > max_bytes;
    buffer.truncate(max_bytes);
    Ok((buffer, truncated))
}

async fn cancellation_signal(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut cancel_rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *cancel_rx.borrow() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn spawn_with_text_file_busy_retry(command: &mut Command) -> std::io::Result<Child> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0_u32;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error)
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES =>
            {
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(error) => return Err(error),
        }
    }
}
