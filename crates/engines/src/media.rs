//! Media subprocess collaborators: ffprobe, ffmpeg, pdftotext.
//!
//! Each helper spawns the tool with piped output and `kill_on_drop`, so a
//! fired cancellation token tears the process down with the awaited future.

use crate::{EngineError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Probe the duration of a media file in seconds, when ffprobe can tell.
pub async fn probe_duration(source: &Path) -> Result<Option<f64>> {
    let output = run(
        "ffprobe",
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            &source.to_string_lossy(),
        ],
        None,
    )
    .await?;
    let text = String::from_utf8_lossy(&output);
    Ok(text.trim().parse::<f64>().ok())
}

/// Decode `source` into 16 kHz mono WAV at `dest`.
pub async fn extract_audio(source: &Path, dest: &Path, token: &CancellationToken) -> Result<()> {
    run(
        "ffmpeg",
        &[
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            &source.to_string_lossy(),
            "-vn",
            "-ar",
            "16000",
            "-ac",
            "1",
            "-y",
            &dest.to_string_lossy(),
        ],
        Some(token),
    )
    .await?;
    Ok(())
}

/// Extract plain text from a PDF via pdftotext.
pub async fn extract_pdf_text(source: &Path, token: &CancellationToken) -> Result<String> {
    let output = run(
        "pdftotext",
        &["-layout", &source.to_string_lossy(), "-"],
        Some(token),
    )
    .await?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Spawn a tool, wait for exit, and return its stdout.
///
/// A missing binary or non-zero exit is fatal (retry cannot fix either); a
/// fired token aborts the wait, and `kill_on_drop` reaps the child.
pub(crate) async fn run(
    tool: &str,
    args: &[&str],
    token: Option<&CancellationToken>,
) -> Result<Vec<u8>> {
    tracing::debug!(tool, ?args, "spawning subprocess");
    let mut command = Command::new(tool);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| EngineError::Fatal(format!("failed to spawn {tool}: {e}")))?;

    let output = match token {
        Some(token) => {
            tokio::select! {
                output = child.wait_with_output() => output,
                _ = token.cancelled() => {
                    tracing::info!(tool, "subprocess killed by cancellation");
                    return Err(EngineError::Cancelled);
                }
            }
        }
        None => child.wait_with_output().await,
    }
    .map_err(|e| EngineError::Fatal(format!("{tool} wait failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(400).collect::<String>();
        let tail: String = tail.chars().rev().collect();
        return Err(EngineError::Fatal(format!(
            "{tool} exited with {}: {}",
            output.status,
            tail.trim()
        )));
    }
    Ok(output.stdout)
}
