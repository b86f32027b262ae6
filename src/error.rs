use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileQueryError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse profile: {0}")]
    ParseError(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session '{0}' is not reachable")]
    SessionNotReachable(String),

    #[error("Timed out waiting for daemon of session '{0}' to create its socket")]
    DaemonSpawnTimeout(String),

    #[error("Failed to start daemon: {0}")]
    DaemonSpawnFailed(String),

    #[error("Session '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Invalid session id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidSessionId(String),

    #[error("Daemon for session '{0}' exited before replying")]
    DaemonDied(String),

    #[error("Profile load failed: {0}")]
    ProfileLoadFailed(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<toml::de::Error> for ProfileQueryError {
    fn from(error: toml::de::Error) -> Self {
        ProfileQueryError::ConfigError(error.to_string())
    }
}

impl ProfileQueryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ProfileQueryError::FileNotFound(_) => "FILE_NOT_FOUND",
            ProfileQueryError::ParseError(_) => "PARSE_ERROR",
            ProfileQueryError::NoActiveSession => "NO_ACTIVE_SESSION",
            ProfileQueryError::SessionNotReachable(_) => "SESSION_NOT_REACHABLE",
            ProfileQueryError::DaemonSpawnTimeout(_) => "DAEMON_SPAWN_TIMEOUT",
            ProfileQueryError::DaemonSpawnFailed(_) => "DAEMON_SPAWN_FAILED",
            ProfileQueryError::AlreadyRunning(_) => "ALREADY_RUNNING",
            ProfileQueryError::InvalidSessionId(_) => "INVALID_SESSION_ID",
            ProfileQueryError::DaemonDied(_) => "DAEMON_DIED",
            ProfileQueryError::ProfileLoadFailed(_) => "PROFILE_LOAD_FAILED",
            ProfileQueryError::QueryError(_) => "QUERY_ERROR",
            ProfileQueryError::ConfigError(_) => "CONFIG_ERROR",
            ProfileQueryError::ConnectionError(_) => "CONNECTION_ERROR",
            ProfileQueryError::ProtocolError(_) => "PROTOCOL_ERROR",
            ProfileQueryError::HttpError(_) => "HTTP_ERROR",
            ProfileQueryError::IoError(_) => "IO_ERROR",
            ProfileQueryError::JsonError(_) => "JSON_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProfileQueryError>;
