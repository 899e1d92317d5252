//! Common utilities for integration tests.
//!
//! Spawning the agent binary, managing ports and temp files, and talking to the endpoint.

use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
};

pub fn get_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

pub fn get_agent_bin() -> &'static str {
    env!("CARGO_BIN_EXE_agent")
}

/// A fresh path in the temp dir, unique per test and port.
pub fn temp_path(name: &str, port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("autobridge_it_{name}_{port}"))
}

/// Writes `config_toml` to a temp file and spawns the agent service with it.
pub fn spawn_agent_with_config(port: u16, config_toml: &str) -> KillOnDrop {
    let tmp = temp_path("config.toml", port);
    std::fs::write(&tmp, config_toml).expect("failed to write config");
    spawn_agent_with_args(&["service", "--config", tmp.to_str().unwrap()])
}

/// Spawns the agent binary with the given args.
pub fn spawn_agent_with_args(args: &[&str]) -> KillOnDrop {
    let child = Command::new(get_agent_bin())
        .env("AUTOBRIDGE_INTEGRATION_TEST", "1")
        .args(args)
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to start agent");
    KillOnDrop(child)
}

/// Config with a speech device appending spoken text to `spoken_file`.
pub fn speech_config(port: u16, spoken_file: &Path) -> String {
    format!(
        r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        sample_interval_ms = 50

        [devices.speechSynthesizer]
        kind = "speech"
        command = 'echo "$1" >> {}'
        "#,
        spoken_file.display()
    )
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
        if start.elapsed() > Duration::from_secs(timeout_secs) {
            panic!("server did not start within timeout");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Polls `path` until it contains `needle`, returning the file contents.
pub async fn wait_for_file_containing(path: &Path, needle: &str, timeout_secs: u64) -> String {
    let start = Instant::now();
    loop {
        if let Ok(contents) = std::fs::read_to_string(path)
            && contents.contains(needle)
        {
            return contents;
        }
        if start.elapsed() > Duration::from_secs(timeout_secs) {
            panic!("{} did not contain {needle:?} within timeout", path.display());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Sends raw bytes to the endpoint and returns the full response.
pub async fn send_raw(port: u16, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("failed to connect to agent");
    stream.write_all(raw).await.expect("failed to send session");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("failed to read response");
    response
}
