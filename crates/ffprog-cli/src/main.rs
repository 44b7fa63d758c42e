mod cli;
mod render;

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use ffprog_core::FfmpegProgress;
use render::Renderer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut ff = match build_supervisor(&cli) {
        Ok(ff) => ff,
        Err(e) => {
            eprintln!("{} {}", "ERROR".red().bold(), e);
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("{}", ff.command().instrumented().join(" "));
        return Ok(());
    }

    let renderer = Renderer::select(cli.json, cli.quiet);
    let mut stream = match ff.stream().await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} {}", "FAILED".red().bold(), e);
            std::process::exit(1);
        }
    };

    while let Some(update) = stream.next().await {
        match update {
            Ok(pct) => renderer.update(pct),
            Err(e) => {
                renderer.finish();
                eprintln!("\n{} {}", "FAILED".red().bold(), e);
                std::process::exit(1);
            }
        }
    }
    renderer.finish();

    if !cli.quiet && !cli.json {
        // the run's full ffmpeg output, the way ffmpeg would have shown it
        println!("{}", ff.log());
    }
    Ok(())
}

fn build_supervisor(cli: &Cli) -> ffprog_core::Result<FfmpegProgress> {
    let mut ff = FfmpegProgress::new(cli.ffmpeg_command.clone())?
        .dry_run(cli.dry_run)
        .exclude_progress(cli.no_progress_log);
    if let Some(seconds) = cli.duration {
        ff = ff.duration_override(seconds);
    }
    Ok(ff)
}

/// Log to stderr; level defaults to `warn` (`debug` with --verbose) and can
/// be overridden via `FFPROG_LOG` or `RUST_LOG`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("FFPROG_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}
