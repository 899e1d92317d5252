//! Uses the single integration test approach.
//!
//! One test binary runs everything in parallel and keeps the number of binaries to build
//! and link down.

mod common;
mod endpoint;
mod monitors;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt as _;

use common::{get_free_port, spawn_agent_with_args, spawn_agent_with_config, wait_for_listening};

#[test]
fn test_agent_binary_runs() {
    let mut guard = spawn_agent_with_args(&["--help"]);
    let status = guard.0.wait().expect("failed to wait");
    assert!(status.success(), "--help should exit successfully");
}

#[test]
fn test_missing_config_is_fatal() {
    let mut guard = spawn_agent_with_args(&[
        "service",
        "--config",
        "/nonexistent/autobridge_missing.toml",
    ]);
    let status = guard.0.wait().expect("failed to wait");
    assert!(!status.success(), "startup without a config should fail");
}

#[tokio::test]
async fn test_agent_config_loads() {
    let port = get_free_port();
    let mut guard = spawn_agent_with_config(
        port,
        &format!(
            r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        "#
        ),
    );
    wait_for_listening(port, 5).await;
    drop(guard.0.kill());
    let status = guard.0.wait().expect("failed to wait on child");
    #[cfg(unix)]
    assert!(
        status.success() || status.signal() == Some(9),
        "Process did not start or exit as expected"
    );
    #[cfg(not(unix))]
    assert!(
        status.success() || status.code() == Some(1),
        "Process did not start or exit as expected"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_shuts_down_gracefully() {
    let port = get_free_port();
    let mut guard = spawn_agent_with_config(
        port,
        &format!(
            r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        "#
        ),
    );
    wait_for_listening(port, 5).await;
    // The signal handler is installed once the accept loop first runs.
    tokio::time::sleep(core::time::Duration::from_millis(300)).await;
    let pid = guard.0.id().to_string();
    let kill = std::process::Command::new("kill")
        .args(["-TERM", &pid])
        .status()
        .expect("failed to run kill");
    assert!(kill.success(), "kill -TERM failed");
    let status = guard.0.wait().expect("failed to wait on child");
    assert!(status.success(), "agent should exit cleanly on SIGTERM: {status:?}");
}
