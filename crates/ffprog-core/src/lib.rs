//! Core library for ffprog-rs: wrap an ffmpeg invocation, follow its
//! diagnostic stream, and expose transcoding progress as a lazy sequence of
//! percentages, with graceful and forced cancellation.
//!
//! The entry point is [`FfmpegProgress`] (async) or
//! [`blocking::FfmpegProgress`]. A run always yields 0 first and, on
//! success, 100 last; a failing run ends with
//! [`Error::ProcessExecutionFailed`] carrying the command and the full
//! ffmpeg log instead.

pub mod blocking;
pub mod command;
pub mod error;
mod parse;
mod probe;
mod progress;

pub use command::{FfmpegCommand, InputSpec};
pub use error::{Error, Result};
pub use progress::{FfmpegProgress, LineCallback, ProgressStream};
