pub mod auto_spawn;
pub mod connection;
pub mod idle;
pub mod readiness;
pub mod server;

pub use auto_spawn::DaemonSpawner;
pub use connection::ConnectionHandler;
pub use readiness::{LoadFailure, LoadState, ReadinessGate};
pub use server::{
    DaemonExit, DaemonServer, EXIT_ALREADY_RUNNING, ServerConfig, ShutdownReason, run_daemon,
};
