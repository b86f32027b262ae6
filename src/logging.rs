use crate::config::GlobalConfig;
use crate::error::{ProfileQueryError, Result};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

/// Environment variable holding a tracing filter directive; wins over the config level.
pub const LOG_ENV: &str = "PQ_LOG";

static LOGGER_INIT: Once = Once::new();

/// Initialize the logging system for a specific component
fn init_component_logging(
    config: &GlobalConfig,
    log_dir: &Path,
    component: &str,
    log_to_stderr: bool,
) -> Result<()> {
    let mut init_result = Ok(());

    LOGGER_INIT.call_once(|| {
        init_result = init_component_logging_internal(config, log_dir, component, log_to_stderr);
    });

    init_result
}

/// Internal logging initialization (only called once)
fn init_component_logging_internal(
    config: &GlobalConfig,
    log_dir: &Path,
    component: &str,
    log_to_stderr: bool,
) -> Result<()> {
    let log_level = config.logging.level.to_lowercase();
    let file_name = format!("{component}.log");

    if config.logging.file_enabled {
        std::fs::create_dir_all(log_dir).map_err(|e| {
            ProfileQueryError::ConfigError(format!("Failed to create log directory: {e}"))
        })?;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&log_level))
        .map_err(|e| {
            ProfileQueryError::ConfigError(format!("Invalid log level '{log_level}': {e}"))
        })?;

    let registry = Registry::default().with(filter);

    let file_layer = config.logging.file_enabled.then(|| {
        let file_appender = tracing_appender::rolling::never(log_dir, &file_name);
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    // Stdout carries command output, so the console layer always writes to stderr.
    let stderr_layer = log_to_stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    registry
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ProfileQueryError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!("{} logging initialized with level: {}", component, log_level);
    if config.logging.file_enabled {
        info!("Log file: {}", log_dir.join(&file_name).display());
    }

    Ok(())
}

/// Initialize logging for a session daemon. Never writes to the console.
pub fn init_daemon_logging(config: &GlobalConfig, log_dir: &Path, session_id: &str) -> Result<()> {
    init_component_logging(config, log_dir, session_id, false)?;
    info!("Daemon logging initialized for session '{}'", session_id);
    Ok(())
}

/// Initialize logging for CLI commands
pub fn init_cli_logging(config: &GlobalConfig, log_dir: &Path, verbose: bool) -> Result<()> {
    let mut cli_config = config.clone();

    if verbose {
        cli_config.logging.level = "debug".to_string();
    } else if !matches!(
        cli_config.logging.level.to_lowercase().as_str(),
        "debug" | "trace"
    ) {
        cli_config.logging.level = "info".to_string();
    }

    init_component_logging(&cli_config, log_dir, "cli", verbose)?;
    debug!("CLI logging initialized");
    Ok(())
}

/// Log a structured message for session lifecycle operations
pub fn log_session_event(session_id: &str, event: &str, details: &str) {
    info!(target: "session", session = session_id, event = event, details = details);
}

/// Log an error with context
pub fn log_error(component: &str, error: &str, context: Option<&str>) {
    if let Some(ctx) = context {
        error!(component = component, error = error, context = ctx);
    } else {
        error!(component = component, error = error);
    }
}

/// Log a warning with context
pub fn log_warning(component: &str, warning: &str, context: Option<&str>) {
    if let Some(ctx) = context {
        warn!(component = component, warning = warning, context = ctx);
    } else {
        warn!(component = component, warning = warning);
    }
}

/// Log debug information
pub fn log_debug(component: &str, message: &str, context: Option<&str>) {
    if let Some(ctx) = context {
        debug!(component = component, message = message, context = ctx);
    } else {
        debug!(component = component, message = message);
    }
}

/// Log info information
pub fn log_info(component: &str, message: &str, context: Option<&str>) {
    if let Some(ctx) = context {
        info!(component = component, message = message, context = ctx);
    } else {
        info!(component = component, message = message);
    }
}
