pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod profile;
pub mod session;

pub use error::{ProfileQueryError, Result};
