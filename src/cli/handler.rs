use crate::cli::client::DaemonClient;
use crate::cli::commands::{
    CliArgs, CliResult, Commands, DaemonResponse, ProfileAction, SessionRow, format_session_list,
};
use crate::config::GlobalConfig;
use crate::daemon::DaemonSpawner;
use crate::error::{ProfileQueryError, Result};
use crate::logging::{log_debug, log_warning};
use crate::profile::is_remote_source;
use crate::session::directory::validate_session_id;
use crate::session::{
    SessionRegistry, SessionState, generate_session_id, is_process_running, terminate_process,
};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Main CLI handler: resolves sessions on disk and talks to their daemons
pub struct CliHandler {
    registry: SessionRegistry,
    socket_ready_timeout: Duration,
    control_timeout: Duration,
    pub verbose: bool,
}

impl CliHandler {
    pub fn new(registry: SessionRegistry, config: &GlobalConfig) -> Self {
        Self {
            registry,
            socket_ready_timeout: config.socket_ready_timeout(),
            control_timeout: config.request_timeout(),
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Main entry point for handling CLI commands
    pub async fn handle_command(&self, args: CliArgs) -> Result<CliResult> {
        match args.command {
            Commands::Load {
                path,
                session,
                reuse,
            } => self.load(&path, session.as_deref(), reuse).await,
            Commands::Profile { action } => self.profile(&action).await,
            Commands::Stop { session, all } => self.stop(session.as_deref(), all).await,
            Commands::ListSessions => self.list_sessions().await,
        }
    }

    fn client(&self, session_id: &str) -> DaemonClient {
        DaemonClient::new(session_id, self.registry.directory().socket_path(session_id))
            .with_timeout(self.control_timeout)
    }

    async fn load(&self, path: &str, session: Option<&str>, reuse: bool) -> Result<CliResult> {
        let profile_path = resolve_profile_path(path).await?;
        println!("Loading profile from {profile_path}");

        let session_id = match session {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => generate_session_id(),
        };

        match self.registry.validate_session(&session_id).await? {
            SessionState::Missing => {}
            SessionState::Stale(_) => {
                log_debug(
                    "cli",
                    &format!("Removing stale files for session {session_id}"),
                    None,
                );
                self.registry.remove_if_stale(&session_id).await?;
            }
            SessionState::Alive(meta) | SessionState::Starting(meta) => {
                if !(reuse && meta.profile_path == profile_path) {
                    return Err(ProfileQueryError::AlreadyRunning(session_id));
                }
                self.wait_until_alive(&session_id).await?;
                return self.send_load(&session_id, &profile_path, session.is_none()).await;
            }
        }

        let spawner = DaemonSpawner::new(
            self.registry.clone(),
            self.socket_ready_timeout,
            self.verbose,
        )?;
        let pid = spawner.spawn(&session_id, &profile_path).await?;
        log_debug(
            "cli",
            &format!("Session {session_id} daemon ready to accept (pid {pid})"),
            None,
        );

        self.send_load(&session_id, &profile_path, session.is_none())
            .await
    }

    async fn send_load(
        &self,
        session_id: &str,
        profile_path: &str,
        make_current: bool,
    ) -> Result<CliResult> {
        match self.client(session_id).load(profile_path).await? {
            DaemonResponse::Loaded { session_id, .. } => {
                if make_current {
                    self.registry.set_current(&session_id).await?;
                }
                Ok(CliResult::Success(format!("Session started: {session_id}")))
            }
            other => Ok(other.into()),
        }
    }

    /// A session that is still in its startup phase gets the socket-ready
    /// window to bind its socket.
    async fn wait_until_alive(&self, session_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.socket_ready_timeout;
        loop {
            match self.registry.validate_session(session_id).await? {
                SessionState::Alive(_) => return Ok(()),
                SessionState::Starting(_) if Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                SessionState::Starting(_) => {
                    return Err(ProfileQueryError::DaemonSpawnTimeout(session_id.to_string()));
                }
                SessionState::Stale(_) | SessionState::Missing => {
                    return Err(ProfileQueryError::SessionNotReachable(session_id.to_string()));
                }
            }
        }
    }

    async fn profile(&self, action: &ProfileAction) -> Result<CliResult> {
        let session_id = self.registry.resolve_session_id(action.session()).await?;

        match self.registry.validate_session(&session_id).await? {
            SessionState::Alive(_) => {}
            SessionState::Starting(_) => self.wait_until_alive(&session_id).await?,
            SessionState::Stale(_) => {
                log_debug(
                    "cli",
                    &format!("Session {session_id} is stale, cleaning up"),
                    None,
                );
                self.registry.remove_if_stale(&session_id).await?;
                self.registry.clear_current_if(&session_id).await?;
                return Err(ProfileQueryError::NoActiveSession);
            }
            SessionState::Missing => {
                self.registry.clear_current_if(&session_id).await?;
                return Err(ProfileQueryError::NoActiveSession);
            }
        }

        let response = self
            .client(&session_id)
            .query(action.query_command(), Vec::new())
            .await?;
        Ok(response.into())
    }

    async fn stop(&self, session: Option<&str>, all: bool) -> Result<CliResult> {
        if all {
            let sessions = self.registry.list_sessions().await?;
            if sessions.is_empty() {
                return Ok(CliResult::Success("No active sessions".to_string()));
            }

            let mut lines = Vec::with_capacity(sessions.len());
            let mut failed = false;
            for meta in sessions {
                match self.stop_session(&meta.id).await {
                    Ok(line) => lines.push(line),
                    Err(e) => {
                        log_warning(
                            "cli",
                            &format!("Failed to stop session {}: {e}", meta.id),
                            None,
                        );
                        lines.push(format!("Failed to stop session {}: {e}", meta.id));
                        failed = true;
                    }
                }
            }

            let summary = lines.join("\n");
            return Ok(if failed {
                CliResult::Error(summary)
            } else {
                CliResult::Success(summary)
            });
        }

        let session_id = match self.registry.resolve_session_id(session).await {
            Ok(id) => id,
            Err(ProfileQueryError::NoActiveSession) => {
                return Ok(CliResult::Success("No active session".to_string()));
            }
            Err(e) => return Err(e),
        };

        Ok(CliResult::Success(self.stop_session(&session_id).await?))
    }

    async fn stop_session(&self, session_id: &str) -> Result<String> {
        let message = match self.registry.validate_session(session_id).await? {
            SessionState::Missing => format!("Session '{session_id}' is not running"),
            SessionState::Stale(_) => {
                if self.registry.remove_if_stale(session_id).await? {
                    format!("Removed stale session: {session_id}")
                } else {
                    format!("Session '{session_id}' is no longer stale; left in place")
                }
            }
            SessionState::Alive(meta) | SessionState::Starting(meta) => {
                match self.client(session_id).stop().await {
                    Ok(DaemonResponse::Stopped { .. }) => {}
                    outcome => {
                        log_warning(
                            "cli",
                            &format!(
                                "Session {session_id} did not confirm stop ({outcome:?}), terminating pid {}",
                                meta.pid
                            ),
                            None,
                        );
                        if is_process_running(meta.pid) {
                            terminate_process(meta.pid);
                        }
                        self.registry.remove_owned(session_id, meta.pid).await?;
                    }
                }
                format!("Stopped session: {session_id}")
            }
        };

        self.registry.clear_current_if(session_id).await?;
        Ok(message)
    }

    async fn list_sessions(&self) -> Result<CliResult> {
        let removed = self.registry.cleanup_stale().await?;
        if !removed.is_empty() {
            log_debug(
                "cli",
                &format!("Cleaned up stale sessions: {}", removed.join(", ")),
                None,
            );
        }

        let mut rows = Vec::new();
        for meta in self.registry.list_sessions().await? {
            let status = match self.client(&meta.id).ping().await {
                Ok(pong) => pong.status.to_string(),
                Err(_) => meta.status.to_string(),
            };
            rows.push(SessionRow {
                id: meta.id,
                status,
                profile_path: meta.profile_path,
            });
        }

        Ok(CliResult::Success(format_session_list(&rows)))
    }
}

/// Make a local profile path absolute and check it exists. URLs pass through.
pub async fn resolve_profile_path(path: &str) -> Result<String> {
    if is_remote_source(path) {
        return Ok(path.to_string());
    }

    let absolute = tokio::fs::canonicalize(Path::new(path))
        .await
        .map_err(|_| ProfileQueryError::FileNotFound(path.to_string()))?;

    if !absolute.is_file() {
        return Err(ProfileQueryError::FileNotFound(path.to_string()));
    }

    Ok(absolute.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonServer, ServerConfig};
    use crate::profile::fixtures::sample_profile;
    use crate::profile::loader::MockProfileLoader;
    use crate::profile::DefaultQueryEngine;
    use crate::session::{SessionDirectory, SessionMetadata, SessionStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn handler(temp_dir: &TempDir) -> CliHandler {
        let registry = SessionRegistry::new(SessionDirectory::new(temp_dir.path().join("sessions")));
        CliHandler::new(registry, &GlobalConfig::default())
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    async fn write_stale(handler: &CliHandler, id: &str) {
        let dir = handler.registry.directory();
        let meta = SessionMetadata::starting(id, dir.socket_path(id), dead_pid(), "/p.json")
            .with_status(SessionStatus::Ready);
        handler.registry.claim_session(&meta).await.unwrap();
        std::fs::write(dir.socket_path(id), b"").unwrap();
    }

    async fn serve(
        handler: &CliHandler,
        id: &str,
        profile_path: &str,
    ) -> tokio::task::JoinHandle<Result<crate::daemon::DaemonExit>> {
        let mut loader = MockProfileLoader::new();
        loader.expect_load().returning(|_| Ok(sample_profile()));
        let config = ServerConfig {
            session_id: id.to_string(),
            profile_path: profile_path.to_string(),
            session_dir: handler.registry.directory().root().to_path_buf(),
            idle_timeout: None,
            shutdown_grace: Duration::from_millis(500),
        };
        let server = DaemonServer::start(config, Arc::new(loader), Arc::new(DefaultQueryEngine::new()))
            .await
            .unwrap();
        tokio::spawn(server.run())
    }

    fn success(result: CliResult) -> String {
        match result {
            CliResult::Success(msg) => msg,
            CliResult::Error(msg) => panic!("Expected success, got error: {msg}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_profile_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("p.json");
        std::fs::write(&file, "{}").unwrap();

        let resolved = resolve_profile_path(file.to_str().unwrap()).await.unwrap();
        assert!(Path::new(&resolved).is_absolute());

        let missing = resolve_profile_path("/definitely/missing.json").await;
        match missing {
            Err(e) => assert_eq!(e.to_string(), "File not found: /definitely/missing.json"),
            Ok(path) => panic!("Expected FileNotFound, got {path}"),
        }

        let url = resolve_profile_path("https://example.com/p.json").await.unwrap();
        assert_eq!(url, "https://example.com/p.json");
    }

    #[tokio::test]
    async fn test_load_missing_file_fails_without_spawning() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);

        let result = handler.load("/definitely/missing.json", None, false).await;
        assert!(matches!(result, Err(ProfileQueryError::FileNotFound(_))));
        assert!(handler.registry.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_without_current_session() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);

        let action = ProfileAction::Info { session: None };
        let result = handler.profile(&action).await;
        assert!(matches!(result, Err(ProfileQueryError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_profile_on_stale_session_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);
        write_stale(&handler, "gone").await;
        handler.registry.set_current("gone").await.unwrap();

        let action = ProfileAction::Info { session: None };
        let result = handler.profile(&action).await;
        assert!(matches!(result, Err(ProfileQueryError::NoActiveSession)));

        let dir = handler.registry.directory();
        assert!(!dir.metadata_path("gone").exists());
        assert!(!dir.socket_path("gone").exists());
        assert_eq!(handler.registry.read_current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);

        let msg = success(handler.stop(None, false).await.unwrap());
        assert_eq!(msg, "No active session");

        let msg = success(handler.stop(Some("nobody"), false).await.unwrap());
        assert!(msg.contains("not running"));

        let msg = success(handler.stop(None, true).await.unwrap());
        assert_eq!(msg, "No active sessions");
    }

    #[tokio::test]
    async fn test_list_sessions_removes_stale() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);
        write_stale(&handler, "old").await;

        let msg = success(handler.list_sessions().await.unwrap());
        assert_eq!(msg, "Found 0 running sessions");
        assert!(!handler.registry.directory().metadata_path("old").exists());
    }

    #[tokio::test]
    async fn test_query_stop_and_list_against_running_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);
        let daemon = serve(&handler, "live", "/profiles/sample.json").await;

        let listing = success(handler.list_sessions().await.unwrap());
        assert!(listing.starts_with("Found 1 running sessions"));
        assert!(listing.contains("live"));

        let info = ProfileAction::Info {
            session: Some("live".to_string()),
        };
        let output = success(handler.profile(&info).await.unwrap());
        assert!(output.contains("This profile contains 3 threads across 2 processes."));

        let msg = success(handler.stop(Some("live"), false).await.unwrap());
        assert_eq!(msg, "Stopped session: live");
        daemon.await.unwrap().unwrap();

        let result = handler.profile(&info).await;
        assert!(matches!(result, Err(ProfileQueryError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_load_into_live_session_is_rejected_unless_reused() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);
        let file = temp_dir.path().join("p.json");
        std::fs::write(&file, "{}").unwrap();
        let profile_path = resolve_profile_path(file.to_str().unwrap()).await.unwrap();
        let daemon = serve(&handler, "busy", &profile_path).await;

        let result = handler.load(&profile_path, Some("busy"), false).await;
        assert!(matches!(result, Err(ProfileQueryError::AlreadyRunning(_))));

        let msg = success(handler.load(&profile_path, Some("busy"), true).await.unwrap());
        assert_eq!(msg, "Session started: busy");
        assert_eq!(handler.registry.read_current().await.unwrap(), None);

        handler.stop(Some("busy"), false).await.unwrap();
        daemon.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_all_continues_past_a_failing_session() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir);
        write_stale(&handler, "broken").await;
        // A directory where the lock file belongs makes every cleanup of "broken" fail
        let lock_path = handler.registry.directory().lock_path("broken");
        std::fs::remove_file(&lock_path).unwrap();
        std::fs::create_dir(&lock_path).unwrap();
        let daemon = serve(&handler, "healthy", "/profiles/sample.json").await;

        let result = handler.stop(None, true).await.unwrap();
        let summary = match result {
            CliResult::Error(msg) => msg,
            CliResult::Success(msg) => panic!("Expected a partial failure, got: {msg}"),
        };
        assert!(summary.contains("Failed to stop session broken"));
        assert!(summary.contains("Stopped session: healthy"));

        daemon.await.unwrap().unwrap();
        assert_eq!(
            handler.registry.validate_session("healthy").await.unwrap(),
            SessionState::Missing
        );
        assert!(handler.registry.directory().metadata_path("broken").exists());
    }
}
