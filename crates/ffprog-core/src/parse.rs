use std::sync::{Arc, Mutex, LazyLock};

use regex::Regex;

use crate::command::InputSpec;

/// Diagnostic lines accumulated for one run, shared between the parser and
/// the supervisor so the log is readable while the subprocess is alive.
pub(crate) type SharedLog = Arc<Mutex<Vec<String>>>;

/// Sentinel duration for an explicitly looped still image.
///
/// A `-loop 1` image has no natural end, so it must never become the
/// limiting duration under `-shortest`, nor meaningfully cap the maximum.
/// As an `f64` divisor the resulting percentage rounds to 0.
pub(crate) const LOOPED_IMAGE_DURATION_MS: u64 = u64::MAX;

/// Regex for ffmpeg's per-input duration announcement.
///
/// Matches lines like:
///   `  Duration: 00:01:05.50, start: 0.000000, bitrate: 1371 kb/s`
///
/// Captures: (1) hours, (2) minutes, (3) seconds, (4) hundredths.
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid regex")
});

/// Regex for the elapsed-time marker emitted by `-progress -`.
///
/// Matches lines like:
///   `out_time=00:00:41.12`
///
/// ffmpeg pads the fraction to microseconds; the fixed two-digit capture
/// reads the leading hundredths, matching the duration announcement scale.
static OUT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(r"out_time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid regex")
});

/// Convert the four fixed-width capture fields to milliseconds.
///
/// The fraction field is taken at the scale the pattern captures
/// (hundredths) and added as-is, not rescaled.
fn captured_ms(caps: &regex::Captures<'_>) -> u64 {
    let field = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
    ((field(1) * 60 + field(2)) * 60 + field(3)) * 1000 + field(4)
}

/// Percentage of `elapsed` against `total`, rounded to two decimals and
/// clamped to [0, 100].
fn percentage(elapsed_ms: u64, total_ms: u64) -> f64 {
    let pct = elapsed_ms as f64 / total_ms as f64 * 100.0;
    ((pct * 100.0).round() / 100.0).clamp(0.0, 100.0)
}

/// Incremental per-line parser state for one run.
///
/// Tracks the accumulated diagnostic log, the index of the input the next
/// duration announcement belongs to, and the reconciled total duration.
/// Pure with respect to the subprocess: tests drive it with synthetic
/// lines.
pub(crate) struct ProgressParser {
    inputs: Vec<InputSpec>,
    shortest: bool,
    exclude_progress: bool,
    /// Caller-fixed denominator; announcements are ignored while set.
    override_ms: Option<u64>,
    total_ms: Option<u64>,
    input_idx: usize,
    prev_line: Option<String>,
    log: SharedLog,
}

impl ProgressParser {
    pub(crate) fn new(
        inputs: Vec<InputSpec>,
        shortest: bool,
        override_secs: Option<f64>,
        exclude_progress: bool,
        log: SharedLog,
    ) -> Self {
        let override_ms = override_secs.map(|secs| (secs * 1000.0) as u64);
        Self {
            inputs,
            shortest,
            exclude_progress,
            override_ms,
            total_ms: override_ms,
            input_idx: 0,
            prev_line: None,
            log,
        }
    }

    /// Seed the denominator from a source outside the stream (the ffprobe
    /// fallback). No-op when an explicit override is in effect.
    pub(crate) fn seed_total(&mut self, ms: u64) {
        if self.override_ms.is_none() {
            self.total_ms = Some(ms);
        }
    }

    /// Feed one trimmed diagnostic line.
    ///
    /// Returns a percentage when the line is an elapsed-time marker and the
    /// total duration is known; duration announcements and everything else
    /// return `None`. Unrecognized lines are not an error.
    pub(crate) fn push_line(&mut self, line: &str) -> Option<f64> {
        let is_marker = OUT_TIME_RE.is_match(line);
        if !(self.exclude_progress && is_marker) {
            self.log.lock().expect("log lock poisoned").push(line.to_string());
        }

        let emitted = if let Some(caps) = DURATION_RE.captures(line) {
            if self.override_ms.is_none() {
                self.fold_duration(captured_ms(&caps));
            }
            None
        } else if is_marker {
            match (OUT_TIME_RE.captures(line), self.total_ms) {
                (Some(caps), Some(total)) if total > 0 => {
                    Some(percentage(captured_ms(&caps), total))
                }
                _ => None,
            }
        } else {
            None
        };

        self.prev_line = Some(line.to_string());
        emitted
    }

    /// Fold one announced input duration into the running total.
    ///
    /// Announcements arrive one per input, in input order, and the total is
    /// updated immediately: under `-shortest` it can transiently
    /// over-estimate until the shortest input has been announced (matching
    /// ffmpeg's own announcement ordering).
    fn fold_duration(&mut self, parsed_ms: u64) {
        let mut duration = parsed_ms;
        // ffmpeg names the demuxer on the line right before the
        // announcement; `image2` plus `-loop 1` means this input never ends.
        if let Some(input) = self.inputs.get(self.input_idx) {
            if input.is_looped()
                && self.prev_line.as_deref().is_some_and(|l| l.contains("image2"))
            {
                duration = LOOPED_IMAGE_DURATION_MS;
            }
        }

        self.total_ms = Some(match self.total_ms {
            Some(total) if self.shortest => total.min(duration),
            Some(total) => total.max(duration),
            None => duration,
        });
        self.input_idx += 1;
        tracing::debug!(total_ms = ?self.total_ms, input = self.input_idx, "folded duration announcement");
    }
}
