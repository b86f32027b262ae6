pub mod client;
pub mod commands;
pub mod handler;

pub use client::*;
pub use commands::*;
pub use handler::*;