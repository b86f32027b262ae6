#![allow(dead_code)]

use assert_cmd::Command;
use std::process::Output;
use std::time::Duration;

/// Assert that a command output contains text (case-insensitive)
pub fn assert_output_contains(output: &Output, expected: &str) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{stdout}{stderr}");

    assert!(
        combined.to_lowercase().contains(&expected.to_lowercase()),
        "Expected output to contain '{expected}'\nActual stdout: {stdout}\nActual stderr: {stderr}"
    );
}

/// Assert that a command succeeded and contains expected text. Returns stdout.
pub fn assert_success_with_output(mut cmd: Command, expected: &str) -> String {
    let output = cmd.output().expect("Failed to execute command");
    assert!(
        output.status.success(),
        "Command failed with non-zero exit code, stdout: {}, stderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert_output_contains(&output, expected);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Assert that a command failed with expected error message
pub fn assert_failure_with_error(mut cmd: Command, expected_error: &str) {
    let output = cmd.output().expect("Failed to execute command");
    assert!(
        !output.status.success(),
        "Expected command to fail but it succeeded: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    assert_output_contains(&output, expected_error);
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
