use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::command::FfmpegCommand;
use crate::error::{Error, Result};
use crate::parse::{ProgressParser, SharedLog};
use crate::probe;

/// Observer invoked once per raw diagnostic line.
pub type LineCallback = Box<dyn FnMut(&str) + Send>;

/// Slot holding the live subprocess. Single writer (the active run);
/// emptied on every exit path: completion, drain failure, termination,
/// and the drop guards.
type ProcessSlot = Arc<Mutex<Option<Child>>>;

/// Supervises one ffmpeg run at a time and exposes its progress as a lazy,
/// ordered sequence of percentages.
///
/// ```no_run
/// # async fn demo() -> ffprog_core::Result<()> {
/// let mut ff = ffprog_core::FfmpegProgress::new(
///     ["ffmpeg", "-i", "in.mp4", "out.mp4"].map(String::from).to_vec(),
/// )?;
/// let mut progress = ff.stream().await?;
/// while let Some(update) = progress.next().await {
///     println!("{}/100", update?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct FfmpegProgress {
    cmd: FfmpegCommand,
    dry_run: bool,
    duration_override: Option<f64>,
    exclude_progress: bool,
    extra_env: HashMap<String, String>,
    callback: Option<LineCallback>,
    slot: ProcessSlot,
    log: SharedLog,
}

impl FfmpegProgress {
    /// Validate `tokens` as an ffmpeg invocation and build a supervisor
    /// for it.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        Ok(Self {
            cmd: FfmpegCommand::new(tokens)?,
            dry_run: false,
            duration_override: None,
            exclude_progress: false,
            extra_env: HashMap::new(),
            callback: None,
            slot: Arc::new(Mutex::new(None)),
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Prepare everything but never launch the subprocess; the stream
    /// yields no values. Inspect the prepared command via
    /// [`command`](Self::command).
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Fix the total duration (in seconds) for the whole run. In-stream
    /// duration announcements are ignored once set.
    pub fn duration_override(mut self, seconds: f64) -> Self {
        self.duration_override = Some(seconds);
        self
    }

    /// Keep elapsed-time marker lines out of the captured log.
    pub fn exclude_progress(mut self, exclude: bool) -> Self {
        self.exclude_progress = exclude;
        self
    }

    /// Extra environment variable handed to the subprocess at launch.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    /// Observe every raw diagnostic line. Called a lot; stdout and stderr
    /// are merged into one stream, so both show up here. The observer is
    /// handed to the next [`stream`](Self::stream) call and lives for that
    /// run.
    pub fn on_line(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The validated command.
    pub fn command(&self) -> &FfmpegCommand {
        &self.cmd
    }

    /// Diagnostic output accumulated so far, newline-joined. Readable at
    /// any point during or after a run.
    pub fn log(&self) -> String {
        self.log.lock().expect("log lock poisoned").join("\n")
    }

    /// Launch ffmpeg and return its progress sequence.
    ///
    /// The first yielded value is always 0; a successful run ends with 100;
    /// a failing run ends with [`Error::ProcessExecutionFailed`] instead.
    /// Only one subprocess is active per supervisor: starting a new stream
    /// while a previous run is still alive kills the old process first.
    pub async fn stream(&mut self) -> Result<ProgressStream> {
        kill_slot(&self.slot);
        self.log.lock().expect("log lock poisoned").clear();

        let mut parser = ProgressParser::new(
            self.cmd.inputs(),
            self.cmd.has_shortest(),
            self.duration_override,
            self.exclude_progress,
            Arc::clone(&self.log),
        );

        if self.dry_run {
            return Ok(ProgressStream::finished(
                parser,
                self.cmd.tokens().to_vec(),
                Arc::clone(&self.log),
            ));
        }

        // At error loglevel ffmpeg never announces input durations, so the
        // denominator has to come from ffprobe before the run starts.
        if self.duration_override.is_none() && self.cmd.uses_error_loglevel() {
            if let Some(ms) = probe::probe_duration_ms(&self.cmd).await {
                parser.seed_total(ms);
            }
        }

        let instrumented = self.cmd.instrumented();
        tracing::debug!(command = ?instrumented, "launching ffmpeg");

        let mut child = Command::new(&instrumented[0])
            .args(&instrumented[1..])
            .envs(&self.extra_env)
            // stdin isolation; the pipe doubles as the graceful-quit channel
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, lines) = mpsc::unbounded_channel();
        // safety: both pipes were requested above
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let readers = vec![
            spawn_line_reader(stdout, tx.clone()),
            spawn_line_reader(stderr, tx),
        ];

        *self.slot.lock().expect("slot lock poisoned") = Some(child);

        Ok(ProgressStream {
            phase: Phase::Starting,
            lines,
            readers,
            slot: Arc::clone(&self.slot),
            parser,
            callback: self.callback.take(),
            command: self.cmd.tokens().to_vec(),
            log: Arc::clone(&self.log),
        })
    }

    /// Ask ffmpeg to stop on its own terms by writing `q` to its stdin,
    /// then wait for it to exit. Returns the observed exit status.
    ///
    /// Fails with [`Error::NoActiveProcess`] when no run is in progress.
    /// The process handle is released either way.
    pub async fn quit_gracefully(&self) -> Result<ExitStatus> {
        let mut child = self.take_child()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(b"q").await?;
            stdin.shutdown().await?;
        }
        Ok(child.wait().await?)
    }

    /// Kill ffmpeg immediately and reap it. Returns the observed exit
    /// status.
    ///
    /// Fails with [`Error::NoActiveProcess`] when no run is in progress.
    pub async fn quit(&self) -> Result<ExitStatus> {
        let mut child = self.take_child()?;
        child.start_kill()?;
        Ok(child.wait().await?)
    }

    fn take_child(&self) -> Result<Child> {
        self.slot
            .lock()
            .expect("slot lock poisoned")
            .take()
            .ok_or(Error::NoActiveProcess)
    }
}

impl Drop for FfmpegProgress {
    fn drop(&mut self) {
        kill_slot(&self.slot);
    }
}

/// Force-kill whatever is still in the slot and empty it. Reaping happens
/// through tokio's `kill_on_drop` reaper.
fn kill_slot(slot: &ProcessSlot) {
    if let Ok(mut guard) = slot.lock() {
        if let Some(child) = guard.as_mut() {
            let _ = child.start_kill();
        }
        *guard = None;
    }
}

/// Forward trimmed lines from one subprocess pipe into the merged channel.
/// A send error means the consumer is gone; the reader just stops.
fn spawn_line_reader<R>(pipe: R, tx: UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    })
}

/// State machine for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Subprocess launched, initial 0 not yet emitted.
    Starting,
    /// Reading the merged diagnostic stream line by line.
    Streaming,
    /// Stream exhausted; waiting on the exit status.
    Draining,
    /// Exit 0 observed and the final 100 emitted.
    Completed,
    /// Non-zero exit (or a lost handle) surfaced as an error.
    Failed,
}

/// Lazy, ordered, single-consumer progress sequence for one run.
///
/// Dropping the stream force-kills a still-running subprocess, so breaking
/// out of the consuming loop early, or unwinding through it, never leaks an
/// ffmpeg process.
pub struct ProgressStream {
    phase: Phase,
    lines: UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    slot: ProcessSlot,
    parser: ProgressParser,
    callback: Option<LineCallback>,
    command: Vec<String>,
    log: SharedLog,
}

impl ProgressStream {
    /// Next progress value, or `None` once the run has finished (and in
    /// dry-run mode). The read from the merged diagnostic stream is the
    /// only suspension point.
    pub async fn next(&mut self) -> Option<Result<f64>> {
        loop {
            match self.phase {
                Phase::Starting => {
                    self.phase = Phase::Streaming;
                    return Some(Ok(0.0));
                }
                Phase::Streaming => match self.lines.recv().await {
                    Some(line) => {
                        if let Some(callback) = self.callback.as_mut() {
                            callback(&line);
                        }
                        if line.is_empty() && self.child_exited() {
                            self.phase = Phase::Draining;
                            continue;
                        }
                        if let Some(pct) = self.parser.push_line(&line) {
                            return Some(Ok(pct));
                        }
                    }
                    None => self.phase = Phase::Draining,
                },
                Phase::Draining => return Some(self.drain().await),
                Phase::Completed | Phase::Failed => return None,
            }
        }
    }

    /// A stream that is already finished (dry-run): yields nothing.
    fn finished(parser: ProgressParser, command: Vec<String>, log: SharedLog) -> Self {
        let (_, lines) = mpsc::unbounded_channel();
        Self {
            phase: Phase::Completed,
            lines,
            readers: Vec::new(),
            slot: Arc::new(Mutex::new(None)),
            parser,
            callback: None,
            command,
            log,
        }
    }

    /// True when the subprocess has already exited or the handle is gone.
    fn child_exited(&self) -> bool {
        let mut guard = self.slot.lock().expect("slot lock poisoned");
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// Reap the subprocess and translate its exit status into the final
    /// sequence element. The handle is released on every path.
    async fn drain(&mut self) -> Result<f64> {
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        let child = self.slot.lock().expect("slot lock poisoned").take();
        let status = match child {
            Some(mut child) => match child.wait().await {
                Ok(status) => Some(status),
                Err(err) => {
                    self.phase = Phase::Failed;
                    return Err(err.into());
                }
            },
            None => None,
        };

        if status.is_some_and(|s| s.success()) {
            self.phase = Phase::Completed;
            Ok(100.0)
        } else {
            self.phase = Phase::Failed;
            Err(Error::ProcessExecutionFailed {
                command: self.command.clone(),
                log: self.log.lock().expect("log lock poisoned").join("\n"),
            })
        }
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        kill_slot(&self.slot);
        for reader in &self.readers {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_yields_no_values() {
        let mut ff = FfmpegProgress::new(
            ["ffmpeg", "-i", "in.mp4", "out.mp4"].map(String::from).to_vec(),
        )
        .unwrap()
        .dry_run(true);
        let mut stream = ff.stream().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_quit_without_run_is_no_active_process() {
        let ff = FfmpegProgress::new(
            ["ffmpeg", "-i", "in.mp4", "out.mp4"].map(String::from).to_vec(),
        )
        .unwrap();
        assert!(matches!(ff.quit().await, Err(Error::NoActiveProcess)));
        assert!(matches!(
            ff.quit_gracefully().await,
            Err(Error::NoActiveProcess)
        ));
    }

    #[test]
    fn test_invalid_command_is_rejected_before_launch() {
        match FfmpegProgress::new(vec!["sox".to_string()]) {
            Err(Error::InvalidCommand(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("sox should not pass as ffmpeg"),
        }
    }
}
