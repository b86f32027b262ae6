#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;

pub const PQ_BIN: &str = env!("CARGO_BIN_EXE_pq");

const PROXY_VARS: &[&str] = &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"];

/// Isolated environment for driving the `pq` binary.
/// Every session started inside it is stopped when it is dropped.
pub struct PqTestEnvironment {
    temp_dir: TempDir,
    home_dir: PathBuf,
    session_dir: PathBuf,
    profiles_dir: PathBuf,
}

impl PqTestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let home_dir = temp_dir.path().join("home");
        let session_dir = temp_dir.path().join("sessions");
        let profiles_dir = temp_dir.path().join("profiles");

        std::fs::create_dir_all(home_dir.join(".pq")).expect("Failed to create home dir");
        std::fs::create_dir_all(&profiles_dir).expect("Failed to create profiles dir");

        // Debug builds on a loaded machine can be slow to bind.
        std::fs::write(
            home_dir.join(".pq").join("config.toml"),
            "[session]\nsocket_ready_timeout_ms = 10000\nrequest_timeout_ms = 5000\n",
        )
        .expect("Failed to write config");

        Self {
            temp_dir,
            home_dir,
            session_dir,
            profiles_dir,
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.session_dir.join(format!("{id}.json"))
    }

    pub fn socket_path(&self, id: &str) -> PathBuf {
        self.session_dir.join(format!("{id}.sock"))
    }

    /// Create a pq command with the isolated environment applied
    pub fn pq_cmd(&self) -> Command {
        let mut cmd = Command::new(PQ_BIN);
        cmd.env("HOME", &self.home_dir)
            .env("PQ_SESSION_DIR", &self.session_dir)
            .env_remove("XDG_RUNTIME_DIR")
            .env_remove("PQ_LOG")
            .env("NO_PROXY", "127.0.0.1,localhost")
            .current_dir(self.temp_dir.path())
            .timeout(Duration::from_secs(30));
        for var in PROXY_VARS {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Same environment, as a tokio command for concurrent launches
    pub fn pq_async_cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(PQ_BIN);
        cmd.env("HOME", &self.home_dir)
            .env("PQ_SESSION_DIR", &self.session_dir)
            .env_remove("XDG_RUNTIME_DIR")
            .env_remove("PQ_LOG")
            .env("NO_PROXY", "127.0.0.1,localhost")
            .current_dir(self.temp_dir.path())
            .kill_on_drop(true);
        for var in PROXY_VARS {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Write a profile file and return its path as a string
    pub fn write_profile(&self, name: &str, contents: &str) -> String {
        let path = self.profiles_dir.join(name);
        std::fs::write(&path, contents).expect("Failed to write profile");
        path.to_string_lossy().into_owned()
    }

    pub fn execute_cmd(&self, args: &[&str]) -> Output {
        self.pq_cmd()
            .args(args)
            .output()
            .expect("Failed to execute command")
    }

    pub fn assert_cmd_success(&self, args: &[&str], expected_output: &str) -> String {
        use crate::common::assertions::assert_success_with_output;
        let mut cmd = self.pq_cmd();
        cmd.args(args);
        assert_success_with_output(cmd, expected_output)
    }

    pub fn assert_cmd_failure(&self, args: &[&str], expected_error: &str) {
        use crate::common::assertions::assert_failure_with_error;
        let mut cmd = self.pq_cmd();
        cmd.args(args);
        assert_failure_with_error(cmd, expected_error);
    }

    /// Load a profile into a named session
    pub fn load_session(&self, profile: &str, session: &str) {
        self.assert_cmd_success(
            &["load", profile, "--session", session],
            &format!("Session started: {session}"),
        );
    }

    pub fn current_session(&self) -> Option<String> {
        std::fs::read_to_string(self.session_dir.join("current.txt"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn read_metadata(&self, id: &str) -> Option<serde_json::Value> {
        let contents = std::fs::read_to_string(self.metadata_path(id)).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Session files (`*.json`, `*.sock`) present in the session directory
    pub fn session_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.session_dir) else {
            return Vec::new();
        };

        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".json") || name.ends_with(".sock"))
            .collect();
        files.sort();
        files
    }
}

impl Drop for PqTestEnvironment {
    fn drop(&mut self) {
        let _ = std::process::Command::new(PQ_BIN)
            .args(["stop", "--all"])
            .env("HOME", &self.home_dir)
            .env("PQ_SESSION_DIR", &self.session_dir)
            .output();
    }
}
