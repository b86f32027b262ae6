use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fmt;

/// pq - query performance profiles through a persistent per-session daemon
#[derive(Parser, Debug)]
#[command(name = "pq")]
#[command(about = "Load a profile once, then query it repeatedly from the command line")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct CliArgs {
    /// Enable verbose output (debug logs on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a session daemon and load a profile into it
    Load {
        /// Path or http(s) URL of the profile
        path: String,
        /// Session id (generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// Reuse a running session with this id if it already serves the same profile
        #[arg(long, requires = "session")]
        reuse: bool,
    },

    /// Query the profile loaded in a session
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Stop one session (default: the current one) or all sessions
    Stop {
        /// Session to stop
        #[arg(short, long, conflicts_with = "all")]
        session: Option<String>,
        /// Stop every session in the session directory
        #[arg(long)]
        all: bool,
    },

    /// List running sessions
    ListSessions,
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// Summary of the loaded profile
    Info {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Per-thread sample counts
    Threads {
        #[arg(short, long)]
        session: Option<String>,
    },
}

impl ProfileAction {
    pub fn query_command(&self) -> &'static str {
        match self {
            ProfileAction::Info { .. } => "info",
            ProfileAction::Threads { .. } => "threads",
        }
    }

    pub fn session(&self) -> Option<&str> {
        match self {
            ProfileAction::Info { session } | ProfileAction::Threads { session } => {
                session.as_deref()
            }
        }
    }
}

/// Request types for daemon communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    /// Wait for the profile load to resolve and report the outcome.
    Load { profile_path: String },
    /// Run a query against the loaded profile.
    Query { command: String, args: Vec<String> },
    Stop,
    Ping,
}

/// Daemon-side phase reported by `Ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonPhase {
    Loading,
    Ready,
    Failed,
    Stopping,
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonPhase::Loading => write!(f, "loading"),
            DaemonPhase::Ready => write!(f, "ready"),
            DaemonPhase::Failed => write!(f, "failed"),
            DaemonPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Response types for daemon communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    Loaded {
        session_id: String,
        profile_path: String,
    },
    QueryResult {
        output: String,
    },
    Stopped {
        session_id: String,
    },
    Pong(PingResponse),
    Error {
        kind: String,
        message: String,
    },
}

impl DaemonResponse {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        DaemonResponse::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub session_id: String,
    pub pid: u32,
    pub status: DaemonPhase,
    pub profile_path: String,
    pub uptime_secs: u64,
}

/// CLI command execution result
#[derive(Debug)]
pub enum CliResult {
    Success(String),
    Error(String),
}

impl fmt::Display for CliResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliResult::Success(msg) => write!(f, "{msg}"),
            CliResult::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl From<DaemonResponse> for CliResult {
    fn from(response: DaemonResponse) -> Self {
        match response {
            DaemonResponse::Loaded { session_id, .. } => {
                CliResult::Success(format!("Session started: {session_id}"))
            }
            DaemonResponse::QueryResult { output } => CliResult::Success(output),
            DaemonResponse::Stopped { session_id } => {
                CliResult::Success(format!("Stopped session: {session_id}"))
            }
            DaemonResponse::Pong(pong) => CliResult::Success(format!(
                "Session {} (pid {}) is {}",
                pong.session_id, pong.pid, pong.status
            )),
            DaemonResponse::Error { message, .. } => CliResult::Error(message),
        }
    }
}

/// One row of `list-sessions` output.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub status: String,
    pub profile_path: String,
}

pub fn format_session_list(rows: &[SessionRow]) -> String {
    let mut output = format!("Found {} running sessions", rows.len());
    let id_width = rows.iter().map(|r| r.id.len()).max().unwrap_or(0);
    for row in rows {
        output.push_str(&format!(
            "\n  {:<id_width$}  {:<8}  {}",
            row.id, row.status, row.profile_path
        ));
    }
    output
}
