use clap::Parser;

/// ffprog: run any ffmpeg command and follow its progress.
///
/// The wrapped ffmpeg command is taken verbatim as trailing arguments.
/// Do not quote it.
#[derive(Parser, Debug)]
#[command(name = "ffprog", version, about, long_about = None)]
pub struct Cli {
    /// Total duration of the media in seconds (overrides detection)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Print the instrumented ffmpeg command and exit
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Suppress the progress bar and the final ffmpeg log; print plain
    /// `N/100` lines instead
    #[arg(short, long, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit progress as JSON lines on stdout
    #[arg(long)]
    pub json: bool,

    /// Keep progress marker lines out of the captured ffmpeg log
    #[arg(long)]
    pub no_progress_log: bool,

    /// Show debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// The ffmpeg command to run, e.g. `ffmpeg -i in.mp4 out.mp4`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub ffmpeg_command: Vec<String>,
}
