use crate::error::{ProfileQueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that redirects all session files.
pub const SESSION_DIR_ENV: &str = "PQ_SESSION_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub dir: Option<String>, // If None, uses $XDG_RUNTIME_DIR/pq or ~/.pq/sessions
    #[serde(default = "default_socket_ready_timeout_ms")]
    pub socket_ready_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64, // 0 disables idle shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: None,
            socket_ready_timeout_ms: default_socket_ready_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_enabled: default_file_enabled(),
        }
    }
}

impl GlobalConfig {
    pub async fn load() -> Result<Self> {
        let config_dir = get_config_dir()?;
        Self::load_from_path(&config_dir.join("config.toml")).await
    }

    pub async fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.socket_ready_timeout_ms == 0 {
            return Err(ProfileQueryError::ConfigError(
                "session.socket_ready_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.session.request_timeout_ms == 0 {
            return Err(ProfileQueryError::ConfigError(
                "session.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ProfileQueryError::ConfigError(format!(
                "Invalid logging level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Resolve the session directory.
    ///
    /// Precedence: `PQ_SESSION_DIR`, then `session.dir`, then
    /// `$XDG_RUNTIME_DIR/pq`, then `~/.pq/sessions`.
    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(SESSION_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        if let Some(dir) = &self.session.dir {
            return Ok(PathBuf::from(dir));
        }

        if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(runtime_dir).join("pq"));
        }

        Ok(get_config_dir()?.join("sessions"))
    }

    pub fn socket_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.session.socket_ready_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.session.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.daemon.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.daemon.shutdown_grace_ms)
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let home_dir = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| {
            ProfileQueryError::ConfigError("Could not determine home directory".to_string())
        })?;

    Ok(PathBuf::from(home_dir).join(".pq"))
}

// Default value functions for serde
fn default_socket_ready_timeout_ms() -> u64 {
    2000
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_idle_timeout_secs() -> u64 {
    1800 // 30 minutes
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_file_enabled() -> bool {
    true
}
