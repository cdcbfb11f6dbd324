//! Integration tests for the linefan CLI.
//!
//! These tests run the real binary end-to-end: workers are actual shell
//! commands, and dispatched lines are verified by reassembling the files
//! the workers write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the linefan binary with a deterministic worker shell.
fn linefan() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("linefan").unwrap();
    cmd.env("SHELL", "/bin/sh");
    cmd
}

/// Path to the built binary, for tests that manage the process by hand.
fn linefan_bin() -> std::path::PathBuf {
    #[allow(deprecated)]
    assert_cmd::cargo::cargo_bin("linefan")
}

/// Worker command that copies its stdin into a file unique to that worker.
fn sink_command(dir: &Path) -> String {
    format!("cat > {}/$$.out", dir.display())
}

/// Read back everything the sink workers wrote.
fn collect_outputs(dir: &Path) -> Vec<String> {
    let mut outputs = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "out") {
            outputs.push(std::fs::read_to_string(&path).unwrap());
        }
    }
    outputs
}

/// Multiset of newline-terminated units in `text` (a final unterminated
/// unit counts as well).
fn line_counts(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for line in text.split_inclusive('\n') {
        *counts.entry(line.to_string()).or_insert(0usize) += 1;
    }
    counts
}

/// Assert that the worker outputs together are an exact reassembly of the
/// input: same bytes overall, and every written unit is a whole input line.
fn assert_reassembles(outputs: &[String], input: &str) {
    let total: usize = outputs.iter().map(String::len).sum();
    assert_eq!(total, input.len(), "workers wrote a different byte count");

    let mut seen = BTreeMap::new();
    for output in outputs {
        for (line, n) in line_counts(output) {
            *seen.entry(line).or_insert(0usize) += n;
        }
    }
    assert_eq!(seen, line_counts(input), "workers wrote different lines");
}

/// Wait until `count` files with the given extension exist under `dir`.
fn wait_for_files(dir: &Path, ext: &str, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let found = std::fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .is_ok_and(|e| e.path().extension().is_some_and(|x| x == ext))
            })
            .count();
        if found >= count {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "expected {} .{} files under {:?}",
            count,
            ext,
            dir
        );
        thread::sleep(Duration::from_millis(20));
    }
}

/// Poll a hand-spawned child for exit, killing it if the deadline passes.
fn wait_with_deadline(
    child: &mut std::process::Child,
    timeout: Duration,
) -> std::process::ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("linefan did not exit before the deadline");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Input of `count` distinct newline-terminated lines, roughly 31 bytes each.
fn numbered_lines(count: usize) -> String {
    let mut out = String::with_capacity(count * 32);
    for i in 0..count {
        out.push_str(&format!("task-{i:05}-abcdefghijklmnopqrs\n"));
    }
    out
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays() {
    linefan()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Distribute lines of input"))
        .stdout(predicate::str::contains("--mapper"))
        .stdout(predicate::str::contains("--file"));
}

#[test]
fn test_version_displays() {
    linefan()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("linefan"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains("worker shell: /bin/sh"));
}

// ============================================================================
// Stdin Dispatch Tests
// ============================================================================

#[test]
fn test_lines_fan_out_across_two_workers() {
    let dir = tempdir().unwrap();
    let input = "a\nbb\nccc\n";

    linefan()
        .args(["-m", "2", &sink_command(dir.path())])
        .write_stdin(input)
        .assert()
        .success();

    let outputs = collect_outputs(dir.path());
    assert_eq!(outputs.len(), 2, "each worker should create its own file");
    assert_reassembles(&outputs, input);
}

#[test]
fn test_single_worker_preserves_order() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("all.out");
    let input = "1\n2\n3\n";

    linefan()
        .args(["-m", "1", &format!("cat > {}", out_path.display())])
        .write_stdin(input)
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), input);
}

#[test]
fn test_unterminated_tail_is_delivered() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("all.out");

    linefan()
        .args(["-m", "1", &format!("cat > {}", out_path.display())])
        .write_stdin("x\ny")
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "x\ny");
}

#[test]
fn test_worker_stdout_is_inherited() {
    // The worker writes to its own stdout, which is the parent's stdout.
    linefan()
        .args(["-m", "1", "tr a-z A-Z"])
        .write_stdin("hello\n")
        .assert()
        .success()
        .stdout("HELLO\n");
}

#[test]
fn test_explicit_dash_reads_stdin() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("all.out");

    linefan()
        .args(["-f", "-", "-m", "1", &format!("cat > {}", out_path.display())])
        .write_stdin("dash\n")
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "dash\n");
}

#[test]
fn test_empty_stdin_completes() {
    linefan()
        .args(["-m", "2", "cat >/dev/null"])
        .write_stdin("")
        .assert()
        .success();
}

// ============================================================================
// File Input Tests
// ============================================================================

#[test]
fn test_file_input_dispatches_lines() {
    let dir = tempdir().unwrap();
    let input = "alpha\nbeta\ngamma\ndelta\n";
    let input_path = dir.path().join("input.txt");
    std::fs::write(&input_path, input).unwrap();

    linefan()
        .args([
            "-f",
            input_path.to_str().unwrap(),
            "-m",
            "2",
            &sink_command(dir.path()),
        ])
        .assert()
        .success();

    assert_reassembles(&collect_outputs(dir.path()), input);
}

#[test]
fn test_missing_input_file_fails() {
    linefan()
        .args(["-f", "/definitely/not/here.txt", "-m", "1", "cat"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("Failed to open input file"))
        .stderr(predicate::str::contains("/definitely/not/here.txt"));
}

// ============================================================================
// No-Input Tests
// ============================================================================

#[test]
fn test_none_input_runs_workers_without_data() {
    let dir = tempdir().unwrap();

    // Workers start, see EOF on stdin immediately, and still run the command.
    linefan()
        .args([
            "-f",
            "none",
            "-m",
            "2",
            &format!("echo ok > {}/$$.out", dir.path().display()),
        ])
        .write_stdin("ignored\n")
        .assert()
        .success();

    let outputs = collect_outputs(dir.path());
    assert_eq!(outputs.len(), 2);
    for output in &outputs {
        assert_eq!(output, "ok\n");
    }
}

#[test]
fn test_none_input_is_case_insensitive() {
    linefan()
        .args(["-f", "NONE", "-m", "1", "true"])
        .assert()
        .success();
}

// ============================================================================
// Usage Error Tests
// ============================================================================

#[test]
fn test_missing_command_exits_one() {
    linefan()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_zero_workers_rejected() {
    linefan()
        .args(["-m", "0", "cat"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    linefan()
        .args(["-v", "-q", "cat"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Signal Handling Tests
// ============================================================================

/// Start linefan with idle workers holding their pipes, deliver `sig`, and
/// check the forwarding shutdown path: exit code 1, no hang.
fn shutdown_on(sig: Signal) {
    let dir = tempdir().unwrap();
    let worker = format!("echo up > {}/$$.up; cat >/dev/null", dir.path().display());

    let mut child = std::process::Command::new(linefan_bin())
        .args(["-m", "2", &worker])
        .env("SHELL", "/bin/sh")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Keep stdin open so dispatch is still waiting for input when the
    // signal arrives.
    let stdin = child.stdin.take();

    // Both workers running implies the handlers were installed first.
    wait_for_files(dir.path(), "up", 2);

    signal::kill(Pid::from_raw(child.id() as i32), sig).unwrap();
    let status = wait_with_deadline(&mut child, Duration::from_secs(10));
    drop(stdin);

    assert_eq!(status.code(), Some(1), "signal shutdown should exit 1");
}

#[test]
fn test_sigterm_forwards_and_exits_one() {
    shutdown_on(Signal::SIGTERM);
}

#[test]
fn test_sigint_forwards_and_exits_one() {
    shutdown_on(Signal::SIGINT);
}

// ============================================================================
// Worker Failure Tests
// ============================================================================

#[test]
fn test_input_remaining_after_pool_dies_fails() {
    // One worker that consumes almost nothing, fed far more than the pipe
    // buffers and the read-ahead can absorb. Once the worker exits, the
    // remaining input has nowhere to go.
    let payload = numbered_lines(24 * 1024);

    let mut child = std::process::Command::new(linefan_bin())
        .args(["-m", "1", "head -c 2 >/dev/null"])
        .env("SHELL", "/bin/sh")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // The write fails with a broken pipe once linefan gives up; that is the
    // expected way for this feed to end.
    let mut stdin = child.stdin.take().unwrap();
    let _ = stdin.write_all(payload.as_bytes());
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("No workers left"),
        "stderr was: {}",
        stderr
    );
}

// ============================================================================
// Large Input Tests
// ============================================================================

#[test]
fn test_oversized_line_is_delivered_whole() {
    // A single line bigger than both the read chunk and the pipe buffer:
    // the read side must grow its buffer, and the write side must push the
    // unit through many partial writes without corrupting it.
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("all.out");
    let mut input = "x".repeat(300_000);
    input.push('\n');
    input.push_str("tail\n");

    linefan()
        .args(["-m", "1", &format!("cat > {}", out_path.display())])
        .write_stdin(input.clone())
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), input);
}

#[test]
fn test_large_input_reassembles_across_four_workers() {
    let dir = tempdir().unwrap();
    let input = numbered_lines(10_000);

    linefan()
        .args(["-m", "4", &sink_command(dir.path())])
        .write_stdin(input.clone())
        .assert()
        .success();

    let outputs = collect_outputs(dir.path());
    assert_eq!(outputs.len(), 4);
    assert_reassembles(&outputs, &input);
}
