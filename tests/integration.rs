/// Integration test suite: drives the compiled `fsmirror` binary against temp directories.
///
/// All tests invoke the binary via subprocess. The `CARGO_BIN_EXE_fsmirror` environment
/// variable is set by Cargo during `cargo test` to point at the binary for the current profile.
///
/// Live watching is covered by the dispatcher's unit tests, which feed events through the same
/// handlers the `watch` command uses; the subprocess tests here stick to the deterministic
/// one-shot commands (`sync`, `snapshot`) and argument validation.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fsmirror"))
}

/// Run an fsmirror command in `cwd` and assert it exits successfully.
/// Returns stdout as a String.
fn run_success(cwd: &Path, args: &[&str]) -> String {
    let out = Command::new(binary())
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("failed to invoke fsmirror binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        out.status.success(),
        "command {:?} failed with status {:?}\nstdout: {}\nstderr: {}",
        args,
        out.status,
        stdout,
        stderr
    );
    stdout
}

/// Run an fsmirror command in `cwd` and assert it exits with a non-zero status.
/// Returns (stdout, stderr) as Strings.
fn run_failure(cwd: &Path, args: &[&str]) -> (String, String) {
    let out = Command::new(binary())
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("failed to invoke fsmirror binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        !out.status.success(),
        "command {:?} expected to fail but exited successfully\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    (stdout, stderr)
}

/// Workspace with a populated `test/testsrc` tree.
fn seeded_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("test/testsrc");
    fs::create_dir_all(src.join("dir/sub")).unwrap();
    fs::write(src.join("test.txt"), "hello").unwrap();
    fs::write(src.join("dir/sub/deep.txt"), "nested content").unwrap();
    fs::write(src.join(".hidden"), "secret").unwrap();
    dir
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

/// test_sync_mirrors_tree — relative roots are resolved against the working directory.
#[test]
fn test_sync_mirrors_tree() {
    let ws = seeded_workspace();
    run_success(ws.path(), &["sync", "-w", "test/testsrc:test/testdes"]);

    let des = ws.path().join("test/testdes");
    assert_eq!(fs::read_to_string(des.join("test.txt")).unwrap(), "hello");
    assert_eq!(
        fs::read_to_string(des.join("dir/sub/deep.txt")).unwrap(),
        "nested content"
    );
    assert!(!des.join(".hidden").exists(), "hidden files are skipped by default");
}

/// test_sync_include_hidden — --include-hidden mirrors dot-files as well.
#[test]
fn test_sync_include_hidden() {
    let ws = seeded_workspace();
    run_success(
        ws.path(),
        &["sync", "--watch", "test/testsrc:test/testdes", "--include-hidden"],
    );
    assert!(ws.path().join("test/testdes/.hidden").exists());
}

/// test_sync_json_output — --json prints a parseable summary with entry counts.
#[test]
fn test_sync_json_output() {
    let ws = seeded_workspace();
    let stdout = run_success(ws.path(), &["sync", "-w", "test/testsrc:out", "--json"]);

    let summary: serde_json::Value =
        serde_json::from_str(&stdout).expect("sync --json should print valid JSON");
    assert_eq!(summary["files"], 2);
    assert_eq!(summary["directories"], 2);
    assert_eq!(summary["bytes"], 19);
}

/// test_sync_respects_config_exclude — fsmirror.toml in the source root is honoured.
#[test]
fn test_sync_respects_config_exclude() {
    let ws = seeded_workspace();
    let src = ws.path().join("test/testsrc");
    fs::write(src.join("scratch.tmp"), "x").unwrap();
    fs::write(src.join("fsmirror.toml"), "exclude = [\"*.tmp\"]\n").unwrap();

    run_success(ws.path(), &["sync", "-w", "test/testsrc:out"]);
    assert!(!ws.path().join("out/scratch.tmp").exists());
    assert!(ws.path().join("out/test.txt").exists());
}

/// test_sync_preserves_modes — file and directory permission bits carry over.
#[cfg(unix)]
#[test]
fn test_sync_preserves_modes() {
    let ws = seeded_workspace();
    let src = ws.path().join("test/testsrc");
    fs::set_permissions(src.join("test.txt"), fs::Permissions::from_mode(0o751)).unwrap();
    fs::set_permissions(src.join("dir"), fs::Permissions::from_mode(0o710)).unwrap();

    run_success(ws.path(), &["sync", "-w", "test/testsrc:out"]);

    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode(&ws.path().join("out/test.txt")), 0o751);
    assert_eq!(mode(&ws.path().join("out/dir")), 0o710);
}

/// test_sync_is_idempotent — a second run leaves an identical tree.
#[test]
fn test_sync_is_idempotent() {
    let ws = seeded_workspace();
    run_success(ws.path(), &["sync", "-w", "test/testsrc:out"]);
    let first = run_success(ws.path(), &["snapshot", "out", "--json"]);
    run_success(ws.path(), &["sync", "-w", "test/testsrc:out"]);
    let second = run_success(ws.path(), &["snapshot", "out", "--json"]);
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// snapshot
// ---------------------------------------------------------------------------

/// test_snapshot_matches_after_sync — source and mirror snapshots are identical.
#[test]
fn test_snapshot_matches_after_sync() {
    let ws = seeded_workspace();
    run_success(ws.path(), &["sync", "-w", "test/testsrc:out"]);

    let src = run_success(ws.path(), &["snapshot", "test/testsrc", "--json"]);
    let des = run_success(ws.path(), &["snapshot", "out", "--json"]);
    assert_eq!(src, des);
}

/// test_snapshot_text_lists_entries — text mode prints one line per entry.
#[test]
fn test_snapshot_text_lists_entries() {
    let ws = seeded_workspace();
    let stdout = run_success(ws.path(), &["snapshot", "test/testsrc"]);
    assert!(stdout.contains("dir/sub/deep.txt"), "stdout: {stdout}");
    assert!(stdout.contains("test.txt"), "stdout: {stdout}");
    assert_eq!(stdout.lines().count(), 4);
}

// ---------------------------------------------------------------------------
// argument validation
// ---------------------------------------------------------------------------

/// test_malformed_pair_rejected — SOURCE:DESTINATION without a colon is a usage error.
#[test]
fn test_malformed_pair_rejected() {
    let ws = seeded_workspace();
    let (_, stderr) = run_failure(ws.path(), &["sync", "-w", "test/testsrc"]);
    assert!(stderr.contains("SOURCE:DESTINATION"), "stderr: {stderr}");
}

/// test_nested_destination_rejected — mirroring into the watched tree would feed back on itself.
#[test]
fn test_nested_destination_rejected() {
    let ws = seeded_workspace();
    let (_, stderr) = run_failure(ws.path(), &["sync", "-w", "test/testsrc:test/testsrc/copy"]);
    assert!(stderr.contains("must not contain"), "stderr: {stderr}");
}

/// test_missing_source_rejected — a missing source aborts before anything is created.
#[test]
fn test_missing_source_rejected() {
    let ws = seeded_workspace();
    run_failure(ws.path(), &["watch", "-w", "nope:out"]);
    assert!(!ws.path().join("out").exists());
}
