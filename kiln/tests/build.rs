//! End-to-end manifest-driven build tests (spec §11.4): these drive the
//! compiled `kiln` binary directly rather than its internal modules, since
//! a binary-only crate exposes nothing to unit-test from outside.

use std::fs;
use std::process::Command;

fn kiln_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
}

#[test]
fn check_succeeds_on_a_well_formed_project() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Kiln.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.kl"), "fn main() void {}\n").unwrap();

    let output = kiln_cmd().arg("check").arg(dir.path()).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn check_fails_on_a_program_with_a_type_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Kiln.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.kl"), "fn main() void { i32 x = true; }\n").unwrap();

    let output = kiln_cmd().arg("check").arg(dir.path()).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn missing_manifest_is_reported_as_a_host_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = kiln_cmd().arg("check").arg(dir.path()).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Kiln.toml"));
}

#[test]
fn build_emits_a_library_bundle_with_the_right_magic() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Kiln.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.kl"), "fn add(i32 a, i32 b) i32 { return a + b; }\n").unwrap();

    let bundle_path = dir.path().join("demo.kbundle");
    let output = kiln_cmd()
        .arg("build")
        .arg(dir.path())
        .arg("--emit-library")
        .arg(&bundle_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let bytes = fs::read(&bundle_path).unwrap();
    assert_eq!(&bytes[0..4], b"TLIB");
}

#[test]
fn build_does_not_emit_a_bundle_when_the_project_has_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Kiln.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.kl"), "fn f() i32 { if 1 { return 0; } }\n").unwrap();

    let bundle_path = dir.path().join("demo.kbundle");
    let output = kiln_cmd()
        .arg("build")
        .arg(dir.path())
        .arg("--emit-library")
        .arg(&bundle_path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(!bundle_path.exists());
}
