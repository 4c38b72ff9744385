//! Exercises the re-exec sandbox child through the real binary: a command
//! whose allow-list does not include a path must not be able to read it.

#![cfg(target_os = "linux")]

use chronicle::sandbox::{SandboxedCommand, SANDBOX_EXEC_SUBCOMMAND};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn system_paths() -> Vec<PathBuf> {
    ["/usr/lib", "/usr/lib64", "/lib", "/lib64", "/etc/ld.so.cache"]
        .into_iter()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .collect()
}

fn run_sandboxed(command: SandboxedCommand) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_chronicle"))
        .arg(SANDBOX_EXEC_SUBCOMMAND)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let mut record = vec![];
    command.write_to(&mut record).unwrap();
    child.stdin.take().unwrap().write_all(&record).unwrap();

    child.wait_with_output().unwrap()
}

#[test]
fn reads_outside_the_allow_list_are_denied() {
    if !chronicle::sandbox::landlock::is_supported() {
        eprintln!("landlock unsupported on this kernel, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let task_dir = dir.path().join("task");
    let other_dir = dir.path().join("other");
    fs::create_dir_all(&task_dir).unwrap();
    fs::create_dir_all(&other_dir).unwrap();
    fs::write(task_dir.join("readable.txt"), "readable").unwrap();
    fs::write(other_dir.join("secret.txt"), "secret").unwrap();

    let mut allow_paths = vec![task_dir.clone()];
    allow_paths.extend(system_paths());

    // Reading inside the allow-list works.
    let allowed = run_sandboxed(SandboxedCommand {
        name: "/bin/cat".to_string(),
        args: vec!["readable.txt".to_string()],
        dir: task_dir.clone(),
        env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        allow_paths: allow_paths.clone(),
        allow_write_paths: vec![],
    });
    assert!(allowed.status.success(), "stderr: {}", String::from_utf8_lossy(&allowed.stderr));
    assert_eq!(allowed.stdout, b"readable");

    // Reading a sibling outside the allow-list is denied.
    let denied = run_sandboxed(SandboxedCommand {
        name: "/bin/cat".to_string(),
        args: vec!["../other/secret.txt".to_string()],
        dir: task_dir,
        env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        allow_paths,
        allow_write_paths: vec![],
    });
    assert!(!denied.status.success());
    assert!(denied.stdout.is_empty());
}

#[test]
fn write_rights_are_limited_to_declared_output_directories() {
    if !chronicle::sandbox::landlock::is_supported() {
        eprintln!("landlock unsupported on this kernel, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let task_dir = dir.path().join("task");
    let out_dir = task_dir.join("out");
    fs::create_dir_all(&out_dir).unwrap();

    let mut allow_paths = vec![task_dir.clone()];
    allow_paths.extend(system_paths());

    // Writing into the declared output directory succeeds.
    let write_ok = run_sandboxed(SandboxedCommand {
        name: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), "echo artifact > out/result.txt".to_string()],
        dir: task_dir.clone(),
        env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        allow_paths: allow_paths.clone(),
        allow_write_paths: vec![out_dir.clone()],
    });
    assert!(write_ok.status.success(), "stderr: {}", String::from_utf8_lossy(&write_ok.stderr));
    assert_eq!(fs::read_to_string(out_dir.join("result.txt")).unwrap().trim(), "artifact");

    // Writing next to the sources, outside the write allow-list, fails.
    let write_denied = run_sandboxed(SandboxedCommand {
        name: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), "echo oops > stray.txt".to_string()],
        dir: task_dir.clone(),
        env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        allow_paths,
        allow_write_paths: vec![out_dir],
    });
    assert!(!write_denied.status.success());
    assert!(!task_dir.join("stray.txt").exists());
}
