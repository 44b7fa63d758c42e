use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

use crate::command::FfmpegCommand;

/// Companion binary used to inspect input durations when ffmpeg itself has
/// been silenced with `-loglevel error`.
const FFPROBE: &str = "ffprobe";

/// Probe failures never cross the crate boundary; the caller treats the
/// duration as unresolved instead.
#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("ffprobe exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("unparseable ffprobe output: {0:?}")]
    Unparseable(String),
}

/// Resolve the total duration by probing each input that is a regular local
/// file (pipes, generated sources and URLs are skipped).
///
/// Durations are combined with `min` under `-shortest`, `max` otherwise.
/// Returns `None` when no input is probeable or any probe fails.
pub(crate) async fn probe_duration_ms(cmd: &FfmpegCommand) -> Option<u64> {
    let files: Vec<String> = cmd
        .inputs()
        .into_iter()
        .map(|input| input.path)
        .filter(|path| Path::new(path).is_file())
        .collect();
    if files.is_empty() {
        return None;
    }

    let mut durations = Vec::with_capacity(files.len());
    for file in &files {
        match probe_file(file).await {
            Ok(ms) => durations.push(ms),
            Err(err) => {
                tracing::warn!(%file, %err, "ffprobe failed, leaving duration unresolved");
                return None;
            }
        }
    }

    if cmd.has_shortest() {
        durations.into_iter().min()
    } else {
        durations.into_iter().max()
    }
}

/// Ask ffprobe for one file's duration in seconds, truncated to
/// milliseconds.
async fn probe_file(file: &str) -> Result<u64, ProbeError> {
    let output = Command::new(FFPROBE)
        .args([
            "-loglevel",
            "error",
            "-hide_banner",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file)
        .output()
        .await?;

    if !output.status.success() {
        return Err(ProbeError::Failed(output.status));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|_| ProbeError::Unparseable(text.trim().to_string()))?;
    Ok((seconds * 1000.0) as u64)
}
