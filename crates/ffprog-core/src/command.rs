use std::path::Path;

use crate::error::{Error, Result};

/// Binary name the first command token must resolve to.
pub const FFMPEG: &str = "ffmpeg";

/// One input file together with the option tokens that precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    /// Option tokens between the previous input (or the program name) and
    /// this input's `-i` flag, e.g. `["-f", "lavfi"]` or `["-loop", "1"]`.
    pub options: Vec<String>,
    /// The input path or URL exactly as given on the command line.
    pub path: String,
}

impl InputSpec {
    /// Whether this input was given `-loop 1` (an explicitly looped source).
    pub fn is_looped(&self) -> bool {
        self.options
            .windows(2)
            .any(|pair| pair[0] == "-loop" && pair[1] == "1")
    }
}

/// A validated ffmpeg invocation as an ordered, immutable token sequence.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    tokens: Vec<String>,
}

impl FfmpegCommand {
    /// Validate `tokens` as an ffmpeg command.
    ///
    /// The first token must be `ffmpeg` or a path whose file name is
    /// `ffmpeg` (an `.exe` suffix is accepted on any platform).
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let Some(program) = tokens.first() else {
            return Err(Error::InvalidCommand("empty command".into()));
        };
        let name = Path::new(program)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        if name != FFMPEG {
            return Err(Error::InvalidCommand(format!(
                "expected `{FFMPEG}` as the first token, got `{program}`"
            )));
        }
        Ok(Self { tokens })
    }

    /// All tokens in original order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The program token (first token, possibly a path).
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// The command rewritten to emit machine-readable progress markers on
    /// stdout while suppressing the interactive status line.
    ///
    /// `-progress - -nostats` is inserted directly after the program name;
    /// every other token keeps its original relative order.
    pub fn instrumented(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.tokens.len() + 3);
        out.push(self.tokens[0].clone());
        out.extend(["-progress", "-", "-nostats"].map(String::from));
        out.extend(self.tokens[1..].iter().cloned());
        out
    }

    /// Collect every input together with the options preceding it.
    ///
    /// For `ffmpeg -i a.mp4 -i b.mp4 out.mp4` this yields two specs with no
    /// options; for `ffmpeg -f lavfi -i color=black -loop 1 -i img.png ...`
    /// the first spec carries `["-f", "lavfi"]` and the second
    /// `["-loop", "1"]`. Order matches the order of appearance, which is
    /// how duration announcements are matched back to their input.
    pub fn inputs(&self) -> Vec<InputSpec> {
        let mut inputs = Vec::new();
        let mut prev = 1;
        let mut i = 1;
        while i < self.tokens.len() {
            if self.tokens[i] == "-i" && i + 1 < self.tokens.len() {
                inputs.push(InputSpec {
                    options: self.tokens[prev..i].to_vec(),
                    path: self.tokens[i + 1].clone(),
                });
                prev = i + 2;
                i += 2;
            } else {
                i += 1;
            }
        }
        inputs
    }

    /// Whether the command caps diagnostics at errors only
    /// (`-loglevel error`), which suppresses the in-stream `Duration:`
    /// announcements and forces the ffprobe fallback.
    pub fn uses_error_loglevel(&self) -> bool {
        self.tokens
            .windows(2)
            .any(|pair| pair[0] == "-loglevel" && pair[1] == "error")
    }

    /// Whether `-shortest` bounds the run by the shortest input.
    pub fn has_shortest(&self) -> bool {
        self.tokens.iter().any(|t| t == "-shortest")
    }
}
