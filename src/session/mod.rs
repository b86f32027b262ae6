pub mod directory;
pub mod liveness;
pub mod registry;

pub use directory::SessionDirectory;
pub use liveness::{is_process_running, terminate_process};
pub use registry::{SessionRegistry, SessionState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Phase tracking recorded in a session's metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Ready,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-session record written by the daemon and read by launchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: String,
    pub socket_path: PathBuf,
    pub pid: u32,
    pub profile_path: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionMetadata {
    pub fn starting(
        id: impl Into<String>,
        socket_path: PathBuf,
        pid: u32,
        profile_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            socket_path,
            pid,
            profile_path: profile_path.into(),
            status: SessionStatus::Starting,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.status = SessionStatus::Failed;
        self.error = Some(error.into());
        self
    }
}

/// Generate a fresh session id.
pub fn generate_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
