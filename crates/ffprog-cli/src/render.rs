use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// One machine-readable progress record for `--json` mode.
#[derive(Debug, Serialize)]
struct ProgressRecord {
    progress: f64,
}

/// How progress updates are presented.
pub enum Renderer {
    /// Styled percentage bar on stderr.
    Bar(ProgressBar),
    /// Plain `N/100` lines on stdout (quiet mode, or stderr is not a TTY).
    Plain,
    /// JSON lines on stdout.
    Json,
}

impl Renderer {
    /// Pick a renderer: JSON when asked for, a bar on a terminal, plain
    /// lines otherwise.
    pub fn select(json: bool, quiet: bool) -> Self {
        if json {
            Renderer::Json
        } else if quiet || !std::io::stderr().is_terminal() {
            Renderer::Plain
        } else {
            Renderer::Bar(create_progress_bar())
        }
    }

    pub fn update(&self, pct: f64) {
        match self {
            Renderer::Bar(pb) => pb.set_position(pct.round() as u64),
            Renderer::Plain => println!("{pct}/100"),
            Renderer::Json => {
                if let Ok(line) = serde_json::to_string(&ProgressRecord { progress: pct }) {
                    println!("{line}");
                }
            }
        }
    }

    pub fn finish(&self) {
        if let Renderer::Bar(pb) = self {
            pb.finish_and_clear();
        }
    }
}

/// Create a styled percentage bar.
///
/// Uses one consistent style: `{spinner} [{bar}] {pos}/{len} {msg}`.
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message("transcoding");
    pb
}
