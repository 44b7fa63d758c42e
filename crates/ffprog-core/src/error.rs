use std::io;

use thiserror::Error;

/// Errors produced by the progress supervisor.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied token sequence is not an ffmpeg invocation.
    #[error("not an ffmpeg command: {0}")]
    InvalidCommand(String),

    /// ffmpeg exited with a non-zero status, or its handle disappeared
    /// before the run finished. Carries the original command and the full
    /// accumulated diagnostic output.
    #[error("error running command {command:?}: {log}")]
    ProcessExecutionFailed { command: Vec<String>, log: String },

    /// A lifecycle operation was invoked while no run was in progress.
    #[error("no process found, did you run the command?")]
    NoActiveProcess,

    /// Failed to spawn or communicate with the subprocess.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
