//! In-memory profile model plus the loader and query-engine seams the daemon
//! is written against.

pub mod loader;
pub mod query;

pub use loader::{JsonProfileLoader, ProfileLoader, is_remote_source, parse_profile};
pub use query::{DefaultQueryEngine, QueryEngine};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub name: String,
    pub process_name: Option<String>,
    pub pid: Option<String>,
    pub sample_count: u64,
}

/// A parsed profile. Owned by exactly one daemon for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub source: String,
    pub product: String,
    pub interval_ms: Option<f64>,
    pub start_time: Option<f64>,
    pub threads: Vec<ThreadSummary>,
}

impl Profile {
    pub fn total_samples(&self) -> u64 {
        self.threads.iter().map(|t| t.sample_count).sum()
    }

    /// Number of distinct processes, keyed by pid or process name.
    pub fn process_count(&self) -> usize {
        let processes: BTreeSet<&str> = self
            .threads
            .iter()
            .filter_map(|t| t.pid.as_deref().or(t.process_name.as_deref()))
            .collect();

        match processes.len() {
            0 if !self.threads.is_empty() => 1,
            n => n,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn sample_profile() -> Profile {
        Profile {
            source: "/profiles/sample.json".to_string(),
            product: "Firefox".to_string(),
            interval_ms: Some(1.0),
            start_time: Some(1_700_000_000_000.0),
            threads: vec![
                ThreadSummary {
                    name: "GeckoMain".to_string(),
                    process_name: Some("Parent Process".to_string()),
                    pid: Some("100".to_string()),
                    sample_count: 120,
                },
                ThreadSummary {
                    name: "Renderer".to_string(),
                    process_name: Some("Parent Process".to_string()),
                    pid: Some("100".to_string()),
                    sample_count: 30,
                },
                ThreadSummary {
                    name: "GeckoMain".to_string(),
                    process_name: Some("Web Content".to_string()),
                    pid: Some("200".to_string()),
                    sample_count: 50,
                },
            ],
        }
    }
}
