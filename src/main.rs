use clap::Parser;
use profile_query::cli::{CliArgs, CliHandler, CliResult};
use profile_query::config::GlobalConfig;
use profile_query::daemon::{ServerConfig, run_daemon};
use profile_query::logging;
use profile_query::session::{SessionDirectory, SessionRegistry};
use std::path::PathBuf;
use std::process;
use tracing::info;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Check if this is a daemon process invocation
    if args.len() > 1 && args[1] == "daemon-process" {
        let code = run_daemon_process(args).await;
        process::exit(code);
    }

    let args = CliArgs::parse();

    let global_config = match GlobalConfig::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to load global configuration, using defaults: {e}");
            GlobalConfig::default()
        }
    };

    let session_dir = match global_config.session_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let directory = SessionDirectory::new(session_dir);

    if let Err(e) = logging::init_cli_logging(&global_config, &directory.log_dir(), args.verbose) {
        eprintln!("Warning: Failed to initialize logging: {e}");
    }

    let handler = CliHandler::new(SessionRegistry::new(directory), &global_config)
        .with_verbose(args.verbose);

    let result = match handler.handle_command(args).await {
        Ok(result) => result,
        Err(e) => CliResult::Error(e.to_string()),
    };

    match result {
        CliResult::Success(msg) => {
            println!("{msg}");
            process::exit(0);
        }
        error @ CliResult::Error(_) => {
            eprintln!("{error}");
            process::exit(1);
        }
    }
}

/// Run a session daemon. Returns the process exit code.
async fn run_daemon_process(args: Vec<String>) -> i32 {
    let mut session_id: Option<String> = None;
    let mut profile_path: Option<String> = None;
    let mut session_dir: Option<PathBuf> = None;
    let mut verbose = false;

    // Skip program name and "daemon-process"
    let mut iter = args.into_iter().skip(2);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--session" | "--profile" | "--session-dir" => {
                let Some(value) = iter.next() else {
                    eprintln!("Error: {arg} requires a value");
                    return 1;
                };
                match arg.as_str() {
                    "--session" => session_id = Some(value),
                    "--profile" => profile_path = Some(value),
                    _ => session_dir = Some(PathBuf::from(value)),
                }
            }
            "--verbose" => verbose = true,
            _ => {
                eprintln!("Error: Unknown daemon argument: {arg}");
                return 1;
            }
        }
    }

    let (Some(session_id), Some(profile_path)) = (session_id, profile_path) else {
        eprintln!("Error: daemon-process requires --session and --profile");
        return 1;
    };

    let mut global_config = match GlobalConfig::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to load global configuration, using defaults: {e}");
            GlobalConfig::default()
        }
    };
    if verbose {
        global_config.logging.level = "debug".to_string();
    }

    let session_dir = match session_dir.map_or_else(|| global_config.session_dir(), Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let log_dir = SessionDirectory::new(&session_dir).log_dir();
    if let Err(e) = logging::init_daemon_logging(&global_config, &log_dir, &session_id) {
        eprintln!("Failed to initialize daemon logging: {e}");
    }

    info!(
        "Starting daemon for session {} with profile {}",
        session_id, profile_path
    );

    let config = ServerConfig::from_global(session_id, profile_path, session_dir, &global_config);
    run_daemon(config).await
}
