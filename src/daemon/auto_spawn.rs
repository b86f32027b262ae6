use crate::daemon::server::EXIT_ALREADY_RUNNING;
use crate::error::{ProfileQueryError, Result};
use crate::logging::log_warning;
use crate::session::SessionRegistry;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Starts session daemons as detached copies of the current executable and
/// waits for them to become reachable.
pub struct DaemonSpawner {
    executable: PathBuf,
    registry: SessionRegistry,
    ready_timeout: Duration,
    verbose: bool,
}

impl DaemonSpawner {
    pub fn new(registry: SessionRegistry, ready_timeout: Duration, verbose: bool) -> Result<Self> {
        let executable = std::env::current_exe().map_err(|e| {
            ProfileQueryError::DaemonSpawnFailed(format!("Failed to get current executable: {e}"))
        })?;
        Ok(Self::with_executable(executable, registry, ready_timeout, verbose))
    }

    pub fn with_executable(
        executable: PathBuf,
        registry: SessionRegistry,
        ready_timeout: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            executable,
            registry,
            ready_timeout,
            verbose,
        }
    }

    /// Create command for daemon process (extracted for testing)
    pub fn create_daemon_command(&self, session_id: &str, profile_path: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("daemon-process")
            .arg("--session")
            .arg(session_id)
            .arg("--profile")
            .arg(profile_path)
            .arg("--session-dir")
            .arg(self.registry.directory().root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: a Ctrl+C aimed at the launcher must not reach the daemon.
            .process_group(0)
            .kill_on_drop(false);

        if self.verbose {
            cmd.arg("--verbose");
        }

        cmd
    }

    /// Spawn a daemon for `session_id` and wait until it has claimed its
    /// metadata and bound its socket. Returns the daemon's pid.
    pub async fn spawn(&self, session_id: &str, profile_path: &str) -> Result<u32> {
        let mut child = self
            .create_daemon_command(session_id, profile_path)
            .spawn()
            .map_err(|e| {
                ProfileQueryError::DaemonSpawnFailed(format!("Failed to spawn daemon process: {e}"))
            })?;

        let pid = child.id().ok_or_else(|| {
            ProfileQueryError::DaemonSpawnFailed("daemon exited immediately".to_string())
        })?;
        debug!("Daemon for session {} spawned with PID {}", session_id, pid);

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(match status.code() {
                    Some(EXIT_ALREADY_RUNNING) => {
                        ProfileQueryError::AlreadyRunning(session_id.to_string())
                    }
                    _ => ProfileQueryError::DaemonSpawnFailed(format!(
                        "daemon exited with {status} before its socket was ready"
                    )),
                });
            }

            if self.is_socket_ready(session_id, pid).await {
                debug!("Session {} socket ready after spawn", session_id);
                return Ok(pid);
            }

            if Instant::now() >= deadline {
                self.abandon(&mut child, session_id, pid).await;
                return Err(ProfileQueryError::DaemonSpawnTimeout(session_id.to_string()));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Kill a daemon that missed the ready deadline and drop whatever files it
    /// already claimed, so a later load can reuse the id.
    async fn abandon(&self, child: &mut tokio::process::Child, session_id: &str, pid: u32) {
        if let Err(e) = child.start_kill() {
            log_warning(
                "spawner",
                &format!("Failed to kill unresponsive daemon pid {pid}: {e}"),
                Some(session_id),
            );
        }
        let _ = child.wait().await;

        if let Err(e) = self.registry.remove_owned(session_id, pid).await {
            log_warning(
                "spawner",
                &format!("Failed to clean up after daemon pid {pid}: {e}"),
                Some(session_id),
            );
        }
    }

    /// Metadata written by this very daemon, plus a bound socket.
    async fn is_socket_ready(&self, session_id: &str, pid: u32) -> bool {
        let owned_by_child = matches!(
            self.registry.read_metadata(session_id).await,
            Ok(Some(meta)) if meta.pid == pid
        );

        owned_by_child
            && tokio::fs::try_exists(self.registry.directory().socket_path(session_id))
                .await
                .unwrap_or(false)
    }
}
