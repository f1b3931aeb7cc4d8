use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `program` to completion in `cwd`, optionally streaming `stdin_bytes` to it.
/// Exit status is returned to the caller, never interpreted here.
pub(crate) async fn run_captured(
    mut command: Command,
    cwd: &Path,
    stdin_bytes: Option<Vec<u8>>,
) -> std::io::Result<Output> {
    command.current_dir(cwd);
    command.kill_on_drop(true);
    command.stdin(if stdin_bytes.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let writer = match (stdin_bytes, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
            // A child that exits early closes the pipe; its exit status reports why.
            let _ = stdin.write_all(&bytes).await;
            let _ = stdin.shutdown().await;
        })),
        _ => None,
    };
    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        let _ = writer.await;
    }
    Ok(output)
}

/// Render an exit status for error messages (`signal` when killed).
pub(crate) fn exit_status_label(output: &Output) -> String {
    output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Mask `x-access-token:<token>@` credentials embedded in remote URLs.
pub(crate) fn redact_credentials(text: &str) -> String {
    const MARKER: &str = "x-access-token:";
    let mut redacted = String::with_capacity(text.len());
    let mut cursor = text;
    while let Some(start) = cursor.find(MARKER) {
        let after_marker = &cursor[start + MARKER.len()..];
        redacted.push_str(&cursor[..start + MARKER.len()]);
        match after_marker.find('@') {
            Some(end) => {
                redacted.push_str("***");
                cursor = &after_marker[end..];
            }
            None => {
                cursor = after_marker;
            }
        }
    }
    redacted.push_str(cursor);
    redacted
}
