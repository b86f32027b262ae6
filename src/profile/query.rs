use crate::error::{ProfileQueryError, Result};
use crate::profile::Profile;
use std::fmt::Write as _;

/// Runs a named query against a loaded profile and renders the result as text.
pub trait QueryEngine: Send + Sync {
    fn run_query(&self, profile: &Profile, command: &str, args: &[String]) -> Result<String>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultQueryEngine;

impl DefaultQueryEngine {
    pub const COMMANDS: &'static [&'static str] = &["info", "threads"];

    pub fn new() -> Self {
        Self
    }

    fn info(&self, profile: &Profile) -> String {
        let thread_count = profile.threads.len();
        let process_count = profile.process_count();

        let mut out = String::new();
        let _ = writeln!(out, "Profile: {}", profile.source);
        let _ = writeln!(out, "Product: {}", profile.product);
        let _ = writeln!(
            out,
            "This profile contains {} {} across {} {}.",
            thread_count,
            plural(thread_count, "thread", "threads"),
            process_count,
            plural(process_count, "process", "processes"),
        );
        if let Some(interval) = profile.interval_ms {
            let _ = writeln!(out, "Sampling interval: {interval} ms");
        }
        let _ = write!(out, "Total samples: {}", profile.total_samples());
        out
    }

    fn threads(&self, profile: &Profile) -> String {
        if profile.threads.is_empty() {
            return "No threads in profile".to_string();
        }

        let mut out = String::new();
        let _ = writeln!(out, "{:<4} {:<24} {:<24} {:>8}", "#", "THREAD", "PROCESS", "SAMPLES");
        for (index, thread) in profile.threads.iter().enumerate() {
            let process = match (&thread.process_name, &thread.pid) {
                (Some(name), Some(pid)) => format!("{name} ({pid})"),
                (Some(name), None) => name.clone(),
                (None, Some(pid)) => format!("pid {pid}"),
                (None, None) => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{:<4} {:<24} {:<24} {:>8}",
                index, thread.name, process, thread.sample_count
            );
        }
        out.trim_end().to_string()
    }
}

impl QueryEngine for DefaultQueryEngine {
    fn run_query(&self, profile: &Profile, command: &str, args: &[String]) -> Result<String> {
        if !args.is_empty() {
            return Err(ProfileQueryError::QueryError(format!(
                "'{command}' takes no arguments"
            )));
        }

        match command {
            "info" => Ok(self.info(profile)),
            "threads" => Ok(self.threads(profile)),
            other => Err(ProfileQueryError::QueryError(format!(
                "Unknown query command '{other}' (available: {})",
                Self::COMMANDS.join(", ")
            ))),
        }
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}
