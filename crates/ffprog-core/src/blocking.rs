//! Blocking facade over the async supervisor.
//!
//! Mirrors the async surface for callers without a runtime: the progress
//! sequence is a std [`Iterator`] and every suspension happens inside an
//! owned current-thread runtime. The cleanup guarantees are identical —
//! dropping the iterator kills a still-running subprocess.

use std::process::ExitStatus;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::command::FfmpegCommand;
use crate::error::Result;
use crate::progress::ProgressStream;

/// Blocking counterpart of [`crate::FfmpegProgress`].
///
/// ```no_run
/// # fn demo() -> ffprog_core::Result<()> {
/// let mut ff = ffprog_core::blocking::FfmpegProgress::new(
///     ["ffmpeg", "-i", "in.mp4", "out.mp4"].map(String::from).to_vec(),
/// )?;
/// for update in ff.run()? {
///     println!("{}/100", update?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct FfmpegProgress {
    inner: crate::FfmpegProgress,
    runtime: Arc<Runtime>,
}

impl FfmpegProgress {
    /// Validate `tokens` as an ffmpeg invocation and build a blocking
    /// supervisor for it.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            inner: crate::FfmpegProgress::new(tokens)?,
            runtime: Arc::new(runtime),
        })
    }

    /// See [`crate::FfmpegProgress::dry_run`].
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.inner = self.inner.dry_run(dry_run);
        self
    }

    /// See [`crate::FfmpegProgress::duration_override`].
    pub fn duration_override(mut self, seconds: f64) -> Self {
        self.inner = self.inner.duration_override(seconds);
        self
    }

    /// See [`crate::FfmpegProgress::exclude_progress`].
    pub fn exclude_progress(mut self, exclude: bool) -> Self {
        self.inner = self.inner.exclude_progress(exclude);
        self
    }

    /// See [`crate::FfmpegProgress::env`].
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.env(key, value);
        self
    }

    /// See [`crate::FfmpegProgress::on_line`].
    pub fn on_line(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.inner = self.inner.on_line(callback);
        self
    }

    /// The validated command.
    pub fn command(&self) -> &FfmpegCommand {
        self.inner.command()
    }

    /// Diagnostic output accumulated so far, newline-joined.
    pub fn log(&self) -> String {
        self.inner.log()
    }

    /// Launch ffmpeg and return a blocking iterator over its progress.
    pub fn run(&mut self) -> Result<ProgressIter> {
        let stream = self.runtime.block_on(self.inner.stream())?;
        Ok(ProgressIter {
            stream,
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// See [`crate::FfmpegProgress::quit_gracefully`].
    pub fn quit_gracefully(&self) -> Result<ExitStatus> {
        self.runtime.block_on(self.inner.quit_gracefully())
    }

    /// See [`crate::FfmpegProgress::quit`].
    pub fn quit(&self) -> Result<ExitStatus> {
        self.runtime.block_on(self.inner.quit())
    }
}

/// Iterator over progress percentages; each `next` drives the async stream
/// on the owned runtime.
pub struct ProgressIter {
    // field order matters: the stream's drop guard runs while the runtime
    // is still alive
    stream: ProgressStream,
    runtime: Arc<Runtime>,
}

impl Iterator for ProgressIter {
    type Item = Result<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}
