//! Startup behaviour of the `eaul` binary.

use std::process::Command;

#[test]
fn missing_inputs_print_usage_and_fail() {
    let source = tempfile::tempdir().expect("tempdir");

    let output = Command::new(env!("CARGO_BIN_EXE_eaul"))
        .arg(source.path())
        .output()
        .expect("run eaul");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage:"), "stderr: {}", stderr);
    assert!(stderr.contains("--help"), "stderr: {}", stderr);
    assert!(stderr.contains("Base graph directory"), "stderr: {}", stderr);
}
