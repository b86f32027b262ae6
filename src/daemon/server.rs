use crate::cli::commands::{DaemonRequest, DaemonResponse, PingResponse};
use crate::config::GlobalConfig;
use crate::daemon::connection::ConnectionHandler;
use crate::daemon::idle::{ActivityTracker, spawn_idle_watchdog};
use crate::daemon::readiness::{LoadFailure, LoadState, ReadinessGate};
use crate::error::{ProfileQueryError, Result};
use crate::ipc;
use crate::logging::{log_error, log_info, log_session_event, log_warning};
use crate::profile::{DefaultQueryEngine, JsonProfileLoader, Profile, ProfileLoader, QueryEngine};
use crate::session::{SessionDirectory, SessionMetadata, SessionRegistry, SessionStatus};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::unix::SocketAddr;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Exit status of a daemon whose session id was already taken by a live daemon.
pub const EXIT_ALREADY_RUNNING: i32 = 3;

/// Configuration for one session daemon
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub session_id: String,
    pub profile_path: String,
    pub session_dir: PathBuf,
    pub idle_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn from_global(
        session_id: impl Into<String>,
        profile_path: impl Into<String>,
        session_dir: PathBuf,
        global_config: &GlobalConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            profile_path: profile_path.into(),
            session_dir,
            idle_timeout: global_config.idle_timeout(),
            shutdown_grace: global_config.shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    StopRequest,
    Signal,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    Stopped(ShutdownReason),
    LoadFailed,
}

impl DaemonExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonExit::Stopped(_) => 0,
            DaemonExit::LoadFailed => 1,
        }
    }
}

/// Daemon serving one profile for one session.
///
/// [`DaemonServer::start`] does everything that must happen before the
/// launcher may connect (claim the metadata file, bind the socket) and
/// never touches the profile. [`DaemonServer::run`] accepts connections
/// while the profile loads in the background.
pub struct DaemonServer {
    pub config: ServerConfig,
    registry: SessionRegistry,
    listener: UnixListener,
    metadata: SessionMetadata,
    loader: Arc<dyn ProfileLoader>,
    engine: Arc<dyn QueryEngine>,
    gate: ReadinessGate,
    activity: ActivityTracker,
    start_time: Instant,
    shutdown_tx: mpsc::Sender<ShutdownReason>,
    shutdown_rx: mpsc::Receiver<ShutdownReason>,
}

impl DaemonServer {
    pub async fn start(
        config: ServerConfig,
        loader: Arc<dyn ProfileLoader>,
        engine: Arc<dyn QueryEngine>,
    ) -> Result<Self> {
        let directory = SessionDirectory::new(&config.session_dir);
        let registry = SessionRegistry::new(directory.clone());
        let socket_path = directory.socket_path(&config.session_id);

        let metadata = SessionMetadata::starting(
            &config.session_id,
            socket_path.clone(),
            std::process::id(),
            &config.profile_path,
        );

        registry.claim_session(&metadata).await?;

        // The claim makes this id ours, so a leftover socket file can go.
        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => log_warning(
                "daemon",
                &format!("Removed leftover socket {}", socket_path.display()),
                None,
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                let _ = registry
                    .remove_owned(&config.session_id, metadata.pid)
                    .await;
                return Err(e.into());
            }
        }

        let listener = match ipc::bind(&socket_path) {
            Ok(listener) => listener,
            Err(e) => {
                log_error("daemon", &format!("Socket bind failed: {e}"), None);
                let _ = registry
                    .remove_owned(&config.session_id, metadata.pid)
                    .await;
                return Err(e);
            }
        };

        log_session_event(
            &config.session_id,
            "socket_ready",
            &format!("pid {} listening on {}", metadata.pid, socket_path.display()),
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(4);

        Ok(Self {
            config,
            registry,
            listener,
            metadata,
            loader,
            engine,
            gate: ReadinessGate::new(),
            activity: ActivityTracker::new(),
            start_time: Instant::now(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Sender that triggers the same shutdown path as a `Stop` request.
    pub fn shutdown_sender(&self) -> mpsc::Sender<ShutdownReason> {
        self.shutdown_tx.clone()
    }

    fn clone_handles(&self) -> ServerHandles {
        ServerHandles {
            session_id: self.config.session_id.clone(),
            profile_path: self.config.profile_path.clone(),
            pid: self.metadata.pid,
            registry: self.registry.clone(),
            engine: Arc::clone(&self.engine),
            gate: self.gate.clone(),
            activity: self.activity.clone(),
            start_time: self.start_time,
            shutdown_tx: self.shutdown_tx.clone(),
            failure_reported: Arc::new(Notify::new()),
        }
    }

    /// Serve until stopped or until the load fails.
    pub async fn run(self) -> Result<DaemonExit> {
        let handles = self.clone_handles();
        let DaemonServer {
            config,
            listener,
            metadata,
            loader,
            activity,
            mut shutdown_rx,
            ..
        } = self;

        let (idle_tx, mut idle_rx) = mpsc::channel::<()>(1);
        let idle_watchdog = config.idle_timeout.map(|timeout| {
            spawn_idle_watchdog(config.session_id.clone(), activity.clone(), timeout, idle_tx)
        });

        let mut load_task: JoinHandle<Result<Profile>> = {
            let loader = Arc::clone(&loader);
            let source = config.profile_path.clone();
            tokio::spawn(async move { loader.load(&source).await })
        };
        let mut load_pending = true;
        log_session_event(&config.session_id, "loading", &config.profile_path);

        let mut connections = JoinSet::new();

        let exit = loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    handles.dispatch(accept_result, &mut connections);
                }

                outcome = &mut load_task, if load_pending => {
                    load_pending = false;
                    let outcome = outcome
                        .map_err(|e| ProfileQueryError::ParseError(format!("loader task failed: {e}")))
                        .and_then(|result| result);

                    match outcome {
                        Ok(profile) => handles.on_load_ready(profile, &metadata).await,
                        Err(e) => {
                            handles.on_load_failed(&e, &metadata).await;
                            break DaemonExit::LoadFailed;
                        }
                    }
                }

                Some(reason) = shutdown_rx.recv() => {
                    break DaemonExit::Stopped(reason);
                }

                Some(()) = idle_rx.recv() => {
                    break DaemonExit::Stopped(ShutdownReason::Idle);
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        if exit == DaemonExit::LoadFailed {
            // Keep the socket open until the launcher that asked for this load
            // has collected the failure, or the grace period runs out.
            let linger = tokio::time::sleep(config.shutdown_grace);
            tokio::pin!(linger);
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        handles.dispatch(accept_result, &mut connections);
                    }
                    _ = handles.failure_reported.notified() => break,
                    Some(_) = shutdown_rx.recv() => break,
                    _ = &mut linger => break,
                }
            }
            handles.remove_files().await;
        }

        drop(listener);
        if load_pending {
            load_task.abort();
        }
        if let Some(watchdog) = idle_watchdog {
            watchdog.abort();
        }

        if let DaemonExit::Stopped(reason) = exit {
            handles.release_session(reason).await;
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
            log_warning(
                "daemon",
                &format!(
                    "Aborting {} connection(s) still open after {}ms",
                    connections.len(),
                    config.shutdown_grace.as_millis()
                ),
                None,
            );
            connections.abort_all();
        }

        log_session_event(&config.session_id, "exited", &format!("{exit:?}"));
        Ok(exit)
    }
}

/// Handles for spawned connection tasks
#[derive(Clone)]
struct ServerHandles {
    session_id: String,
    profile_path: String,
    pid: u32,
    registry: SessionRegistry,
    engine: Arc<dyn QueryEngine>,
    gate: ReadinessGate,
    activity: ActivityTracker,
    start_time: Instant,
    shutdown_tx: mpsc::Sender<ShutdownReason>,
    failure_reported: Arc<Notify>,
}

impl ServerHandles {
    fn dispatch(
        &self,
        accept_result: std::io::Result<(UnixStream, SocketAddr)>,
        connections: &mut JoinSet<()>,
    ) {
        let stream = match accept_result {
            Ok((stream, _)) => stream,
            Err(e) => {
                log_error("daemon", &format!("Error accepting connection: {e}"), None);
                return;
            }
        };

        let handles = self.clone();
        connections.spawn(async move {
            let result = ConnectionHandler::handle_connection(stream, |request| {
                handles.process_request(request)
            })
            .await;
            if let Err(e) = result {
                log_error("daemon", &format!("Error handling connection: {e}"), None);
            }
        });
    }

    async fn process_request(&self, request: DaemonRequest) -> Result<DaemonResponse> {
        // Pings come from `list-sessions` and must not keep an idle daemon alive.
        let _activity = match request {
            DaemonRequest::Ping => None,
            _ => Some(self.activity.begin_request().await),
        };

        match request {
            DaemonRequest::Load { profile_path } => self.load(profile_path).await,
            DaemonRequest::Query { command, args } => self.query(command, args).await,
            DaemonRequest::Stop => Ok(self.stop().await),
            DaemonRequest::Ping => Ok(self.ping()),
        }
    }

    async fn load(&self, profile_path: String) -> Result<DaemonResponse> {
        if profile_path != self.profile_path {
            return Ok(DaemonResponse::error(
                "PROFILE_MISMATCH",
                format!(
                    "Session '{}' serves {}, not {}",
                    self.session_id, self.profile_path, profile_path
                ),
            ));
        }

        match self.gate.wait_resolved().await {
            LoadState::Ready(_) => Ok(DaemonResponse::Loaded {
                session_id: self.session_id.clone(),
                profile_path: self.profile_path.clone(),
            }),
            LoadState::Failed(failure) => {
                let response = self.report_failure(&failure).await;
                self.failure_reported.notify_one();
                Ok(response)
            }
            LoadState::Stopped | LoadState::Loading => Ok(self.stopped_response()),
        }
    }

    async fn query(&self, command: String, args: Vec<String>) -> Result<DaemonResponse> {
        let profile = match self.gate.wait_resolved().await {
            LoadState::Ready(profile) => profile,
            LoadState::Failed(failure) => return Ok(self.report_failure(&failure).await),
            LoadState::Stopped | LoadState::Loading => return Ok(self.stopped_response()),
        };

        let engine = Arc::clone(&self.engine);
        let output = tokio::task::spawn_blocking(move || engine.run_query(&profile, &command, &args))
            .await
            .map_err(|e| ProfileQueryError::QueryError(format!("query task failed: {e}")))??;

        Ok(DaemonResponse::QueryResult { output })
    }

    /// Files go first so that a launcher seeing `Stopped` never finds them.
    async fn stop(&self) -> DaemonResponse {
        log_info(
            "daemon",
            &format!("Stop requested for session {}", self.session_id),
            None,
        );
        self.release_session(ShutdownReason::StopRequest).await;
        let _ = self.shutdown_tx.send(ShutdownReason::StopRequest).await;

        DaemonResponse::Stopped {
            session_id: self.session_id.clone(),
        }
    }

    fn ping(&self) -> DaemonResponse {
        DaemonResponse::Pong(PingResponse {
            session_id: self.session_id.clone(),
            pid: self.pid,
            status: self.gate.current().phase(),
            profile_path: self.profile_path.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        })
    }

    fn stopped_response(&self) -> DaemonResponse {
        DaemonResponse::error(
            "DAEMON_STOPPED",
            format!("Session '{}' is shutting down", self.session_id),
        )
    }

    async fn remove_files(&self) {
        if let Err(e) = self.registry.remove_owned(&self.session_id, self.pid).await {
            log_error(
                "daemon",
                &format!("Failed to remove files for session {}: {e}", self.session_id),
                None,
            );
        }
    }

    /// A failed session must be gone from disk before anyone hears about the failure.
    async fn report_failure(&self, failure: &LoadFailure) -> DaemonResponse {
        self.remove_files().await;
        DaemonResponse::error(
            &failure.kind,
            ProfileQueryError::ProfileLoadFailed(failure.cause.clone()).to_string(),
        )
    }

    /// Remove the session files and release every waiter. Safe to repeat.
    async fn release_session(&self, reason: ShutdownReason) {
        self.remove_files().await;
        self.gate.mark_stopped();
        log_session_event(&self.session_id, "stopped", &format!("{reason:?}"));
    }

    async fn on_load_ready(&self, profile: Profile, metadata: &SessionMetadata) {
        if !self.gate.current().is_loading() {
            return;
        }

        let ready = metadata.clone().with_status(SessionStatus::Ready);
        if let Err(e) = self.registry.write_metadata(&ready).await {
            log_error(
                "daemon",
                &format!("Failed to record ready status: {e}"),
                Some(self.session_id.as_str()),
            );
        }

        let thread_count = profile.threads.len();
        self.gate.mark_ready(Arc::new(profile));
        log_session_event(
            &self.session_id,
            "ready",
            &format!("{thread_count} threads from {}", self.profile_path),
        );
    }

    async fn on_load_failed(&self, error: &ProfileQueryError, metadata: &SessionMetadata) {
        let cause = error.to_string();
        log_error(
            "daemon",
            &format!("Profile load failed: {cause}"),
            Some(self.session_id.as_str()),
        );

        let failed = metadata.clone().with_error(&cause);
        if let Err(e) = self.registry.write_metadata(&failed).await {
            log_warning(
                "daemon",
                &format!("Failed to record failed status: {e}"),
                Some(self.session_id.as_str()),
            );
        }

        self.gate.mark_failed(error.error_code(), cause);
    }
}

/// Body of `pq daemon-process`. Returns the process exit code.
pub async fn run_daemon(config: ServerConfig) -> i32 {
    let session_id = config.session_id.clone();
    let loader: Arc<dyn ProfileLoader> = Arc::new(JsonProfileLoader::new());
    let engine: Arc<dyn QueryEngine> = Arc::new(DefaultQueryEngine::new());

    let server = match DaemonServer::start(config, loader, engine).await {
        Ok(server) => server,
        Err(ProfileQueryError::AlreadyRunning(id)) => {
            log_warning("daemon", &format!("Session '{id}' is already running"), None);
            return EXIT_ALREADY_RUNNING;
        }
        Err(e) => {
            log_error("daemon", &format!("Failed to start daemon: {e}"), Some(session_id.as_str()));
            return 1;
        }
    };

    let shutdown_tx = server.shutdown_sender();
    tokio::spawn(async move {
        if wait_for_termination_signal().await {
            let _ = shutdown_tx.send(ShutdownReason::Signal).await;
        }
    });

    match server.run().await {
        Ok(exit) => exit.exit_code(),
        Err(e) => {
            log_error("daemon", &format!("Daemon server error: {e}"), Some(session_id.as_str()));
            1
        }
    }
}

async fn wait_for_termination_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            log_error("daemon", &format!("Failed to listen for SIGTERM: {e}"), None);
            return false;
        }
    };

    tokio::select! {
        _ = terminate.recv() => log_info("daemon", "Received SIGTERM, shutting down", None),
        _ = tokio::signal::ctrl_c() => log_info("daemon", "Received SIGINT, shutting down", None),
    }
    true
}
