//! End-to-end tests for the progress supervisor against a stub ffmpeg.
//!
//! The stub is a small shell script that reproduces the two output
//! patterns the real tool emits (duration announcements on stderr,
//! elapsed-time markers on stdout), so the full launch → stream → drain
//! lifecycle runs without a media toolchain.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};

use ffprog_core::{Error, FfmpegProgress, blocking};
use tempfile::TempDir;

/// Announces a 1s duration, ticks to 100% and exits (code from $STUB_EXIT).
const FAST_STUB: &str = r#"#!/usr/bin/env bash
if [ -n "$STUB_PIDFILE" ]; then echo $$ > "$STUB_PIDFILE"; fi
echo "ffmpeg version 6.0-stub Copyright (c) the stub authors" >&2
echo "Input #0, mov,mp4, from 'in.mp4':" >&2
echo "  Duration: 00:00:01.00, start: 0.000000, bitrate: 64 kb/s" >&2
# let the announcement reach the reader before any marker, as ffmpeg would
sleep 0.3
echo "out_time=00:00:00.25"
echo "progress=continue"
echo "out_time=00:00:00.50"
echo "progress=continue"
echo "out_time=00:00:01.00"
echo "progress=end"
exit "${STUB_EXIT:-0}"
"#;

/// Emits markers but never announces a duration.
const SILENT_STUB: &str = r#"#!/usr/bin/env bash
echo "Input #0, lavfi, from 'testsrc=d=10':" >&2
echo "out_time=00:00:00.25"
echo "out_time=00:00:00.50"
echo "out_time=00:00:01.00"
echo "progress=end"
exit 0
"#;

/// Runs for up to ~10s, ticking progress and watching stdin for `q`.
const SLOW_STUB: &str = r#"#!/usr/bin/env bash
if [ -n "$STUB_PIDFILE" ]; then echo $$ > "$STUB_PIDFILE"; fi
echo "Input #0, mov,mp4, from 'in.mp4':" >&2
echo "  Duration: 00:01:40.00, start: 0.000000, bitrate: 128 kb/s" >&2
sleep 0.2
for i in $(seq 1 200); do
  printf 'out_time=00:00:%02d.00\n' $(( i < 99 ? i : 99 ))
  if read -t 0.05 c; then
    if [ "$c" = "q" ]; then exit 0; fi
  elif [ "$c" = "q" ]; then
    exit 0
  fi
done
exit 0
"#;

fn write_stub(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("ffmpeg");
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn stub_cmd(stub: &Path, rest: &[&str]) -> Vec<String> {
    let mut tokens = vec![stub.to_string_lossy().into_owned()];
    tokens.extend(rest.iter().map(|s| s.to_string()));
    tokens
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    // a reaped-but-unwaited child shows up as zombie; that counts as dead
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat.contains(") Z "),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn read_pid(pidfile: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = fs::read_to_string(pidfile) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    panic!("stub never wrote its pidfile");
}

#[cfg(target_os = "linux")]
async fn assert_dies(pid: u32) {
    for _ in 0..150 {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("process {pid} still running");
}

#[tokio::test]
async fn test_successful_run_emits_zero_to_hundred() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"])).unwrap();

    let mut stream = ff.stream().await.unwrap();
    let mut values = Vec::new();
    while let Some(update) = stream.next().await {
        values.push(update.unwrap());
    }

    assert_eq!(values.first(), Some(&0.0));
    assert_eq!(values.last(), Some(&100.0));
    assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(values.contains(&25.0));
    assert!(values.contains(&50.0));

    // the handle is released on completion
    assert!(matches!(ff.quit().await, Err(Error::NoActiveProcess)));
}

#[tokio::test]
async fn test_unknown_duration_yields_endpoints_only() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SILENT_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"])).unwrap();

    let mut stream = ff.stream().await.unwrap();
    let mut values = Vec::new();
    while let Some(update) = stream.next().await {
        values.push(update.unwrap());
    }

    assert!(values.iter().all(|v| *v == 0.0 || *v == 100.0));
    assert!(values.contains(&0.0));
    assert!(values.contains(&100.0));
}

#[tokio::test]
async fn test_duration_override_yields_intermediate_values() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SILENT_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]))
        .unwrap()
        .duration_override(1.0);

    let mut stream = ff.stream().await.unwrap();
    let mut distinct = Vec::new();
    while let Some(update) = stream.next().await {
        let value = update.unwrap();
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }

    assert!(distinct.len() > 2, "expected intermediate values, got {distinct:?}");
}

#[tokio::test]
async fn test_failing_run_surfaces_command_and_log() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let tokens = stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]);
    let mut ff = FfmpegProgress::new(tokens.clone())
        .unwrap()
        .env("STUB_EXIT", "3");

    let mut stream = ff.stream().await.unwrap();
    let mut error = None;
    while let Some(update) = stream.next().await {
        match update {
            Ok(_) => {}
            Err(err) => {
                error = Some(err);
                break;
            }
        }
    }

    match error.expect("run should fail") {
        Error::ProcessExecutionFailed { command, log } => {
            assert_eq!(command, tokens);
            assert!(log.contains("Duration:"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_log_is_readable_mid_run_and_after() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"])).unwrap();

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        if update.unwrap() > 0.0 {
            assert!(!ff.log().is_empty());
            break;
        }
    }
    drop(stream);

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        update.unwrap();
    }
    assert!(ff.log().contains("Duration:"));
    assert!(ff.log().contains("out_time="));
}

#[tokio::test]
async fn test_exclude_progress_filters_markers_from_log() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]))
        .unwrap()
        .exclude_progress(true);

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        update.unwrap();
    }

    assert!(ff.log().contains("Duration:"));
    assert!(!ff.log().contains("out_time="));
}

#[tokio::test]
async fn test_line_callback_sees_raw_lines() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]))
        .unwrap()
        .on_line(move |line| sink.lock().unwrap().push(line.to_string()));

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        update.unwrap();
    }

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|l| l.contains("Duration:")));
    assert!(seen.iter().any(|l| l.contains("out_time=")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forced_quit_kills_the_process() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SLOW_STUB);
    let pidfile = dir.path().join("pid");
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]))
        .unwrap()
        .env("STUB_PIDFILE", pidfile.to_string_lossy());

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        if update.unwrap() > 0.0 {
            break;
        }
    }

    let status = ff.quit().await.unwrap();
    assert!(!status.success());
    assert_eq!(status.signal(), Some(9));

    #[cfg(target_os = "linux")]
    assert_dies(read_pid(&pidfile)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_graceful_quit_lets_the_process_finish() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SLOW_STUB);
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"])).unwrap();

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        if update.unwrap() > 0.0 {
            break;
        }
    }

    let status = ff.quit_gracefully().await.unwrap();
    assert!(status.success());
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_early_break_never_leaks_the_process() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SLOW_STUB);
    let pidfile = dir.path().join("pid");
    let mut ff = FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]))
        .unwrap()
        .env("STUB_PIDFILE", pidfile.to_string_lossy());

    let mut stream = ff.stream().await.unwrap();
    while let Some(update) = stream.next().await {
        if update.unwrap() > 0.0 {
            break;
        }
    }
    drop(stream);

    assert_dies(read_pid(&pidfile)).await;
    assert!(matches!(ff.quit().await, Err(Error::NoActiveProcess)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_consumer_panic_never_leaks_the_process() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), SLOW_STUB);
    let pidfile = dir.path().join("pid");
    let tokens = stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"]);

    let pidfile_env = pidfile.to_string_lossy().into_owned();
    let consumer = std::thread::spawn(move || {
        let mut ff = blocking::FfmpegProgress::new(tokens)
            .unwrap()
            .env("STUB_PIDFILE", pidfile_env);
        for update in ff.run().unwrap() {
            if update.unwrap() > 0.0 {
                panic!("consumer exploded");
            }
        }
    });
    assert!(consumer.join().is_err());

    let pid = read_pid(&pidfile);
    for _ in 0..150 {
        if !process_alive(pid) {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    panic!("process {pid} still running");
}

#[test]
fn test_blocking_iterator_full_sequence() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), FAST_STUB);
    let mut ff =
        blocking::FfmpegProgress::new(stub_cmd(&stub, &["-i", "in.mp4", "out.mp4"])).unwrap();

    let values: Vec<f64> = ff.run().unwrap().map(|update| update.unwrap()).collect();

    assert_eq!(values.first(), Some(&0.0));
    assert_eq!(values.last(), Some(&100.0));
    assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_blocking_quit_without_run() {
    let ff = blocking::FfmpegProgress::new(
        ["ffmpeg", "-i", "in.mp4", "out.mp4"].map(String::from).to_vec(),
    )
    .unwrap();
    assert!(matches!(ff.quit(), Err(Error::NoActiveProcess)));
}
