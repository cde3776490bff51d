//! Integration tests for the devenv CLI
//!
//! Drive the binary against `file://` backup bases in temporary directories.
//! None of these need `jj` installed.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run devenv with an isolated home and no ambient configuration
fn run_devenv(args: &[&str], home: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devenv"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("DEVENV_CONFIG")
        .env_remove("DEVENV_BASE")
        .env_remove("DEVENV_MACHINE")
        .env_remove("DEVENV_USER")
        .env_remove("DEVENV_TIMEOUT")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute devenv")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn file_base(dir: &Path) -> String {
    format!("file://{}", dir.display())
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    let output = run_devenv(&["--help"], home.path());

    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["manifest", "backup", "restore", "list-backups"] {
        assert!(out.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_list_backups_empty_base() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let base = file_base(store.path());

    let output = run_devenv(&["list-backups", "--base", &base, "--machine", "laptop"], home.path());

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).trim().is_empty());
    assert!(stderr(&output).contains("No backups found for laptop"));
}

#[test]
fn test_list_backups_flags_incomplete() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let complete = store.path().join("laptop/2026-10-15");
    fs::create_dir_all(&complete).unwrap();
    fs::write(complete.join("manifest.json"), "{}").unwrap();
    let partial = store.path().join("laptop/2026-10-16/files");
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("notes.txt"), "half done").unwrap();
    let base = file_base(store.path());

    let output = run_devenv(&["list-backups", "--base", &base, "--machine", "laptop"], home.path());

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let names: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(names, vec!["2026-10-15", "2026-10-16"]);
    assert!(stderr(&output).contains("2026-10-16 is incomplete"));
}

#[test]
fn test_list_backups_rejects_unknown_scheme() {
    let home = TempDir::new().unwrap();
    let output = run_devenv(&["list-backups", "--base", "ftp://host/backups"], home.path());

    assert!(!output.status.success());
    assert!(stderr(&output).contains("unsupported scheme"));
}

#[test]
fn test_restore_missing_backup_fails() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let base = file_base(store.path());

    let output = run_devenv(
        &["restore", "--base", &base, "--machine", "laptop", "--name", "2026-10-16"],
        home.path(),
    );

    assert!(!output.status.success());
    assert!(stderr(&output).contains("has no manifest"));
}

#[test]
fn test_restore_without_name_lists_backups() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let backup = store.path().join("laptop/2026-10-16");
    fs::create_dir_all(&backup).unwrap();
    fs::write(backup.join("manifest.json"), "{}").unwrap();
    let base = file_base(store.path());

    let output = run_devenv(&["restore", "--base", &base, "--machine", "laptop"], home.path());

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "2026-10-16");
    assert!(stderr(&output).contains("--name"));
}

#[test]
fn test_restore_rejects_invalid_manifest_file() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("manifest.json");
    fs::write(&manifest, "not json").unwrap();

    let output = run_devenv(
        &["restore", "--manifest-file", manifest.to_str().unwrap()],
        home.path(),
    );

    assert!(!output.status.success());
    assert!(stderr(&output).contains("not valid JSON"));
}

#[test]
fn test_restore_empty_local_manifest_succeeds() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("manifest.json");
    fs::write(
        &manifest,
        r#"{
  "version": 3,
  "machine": "laptop",
  "hostname": "laptop",
  "captured_at": "2026-10-16T09:00:00Z",
  "root_dir": "/home/dev",
  "created_by": "devenv",
  "repositories": [],
  "files": [],
  "symlinks": []
}"#,
    )
    .unwrap();

    let output = run_devenv(
        &[
            "restore",
            "--manifest-file",
            manifest.to_str().unwrap(),
            "--root",
            home.path().to_str().unwrap(),
        ],
        home.path(),
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("Restore completed"));
}

#[test]
fn test_backup_rejects_unsafe_name() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let base = file_base(store.path());

    let output = run_devenv(&["backup", "--base", &base, "--name", "../escape"], home.path());

    assert!(!output.status.success());
    assert!(stderr(&output).contains("backup name"));
    assert!(fs::read_dir(store.path()).unwrap().next().is_none());
}
