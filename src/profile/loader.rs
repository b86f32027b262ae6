use crate::error::{ProfileQueryError, Result};
use crate::profile::{Profile, ThreadSummary};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

/// Turns a profile path or URL into an in-memory [`Profile`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    async fn load(&self, source: &str) -> Result<Profile>;
}

pub fn is_remote_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Loads Firefox-Profiler style JSON profiles (processed or Gecko format)
/// from disk or over HTTP.
#[derive(Debug, Default, Clone)]
pub struct JsonProfileLoader;

impl JsonProfileLoader {
    pub fn new() -> Self {
        Self
    }

    async fn read_source(&self, source: &str) -> Result<Vec<u8>> {
        if is_remote_source(source) {
            debug!("Fetching profile from {}", source);
            let response = reqwest::get(source).await?.error_for_status()?;
            return Ok(response.bytes().await?.to_vec());
        }

        match tokio::fs::read(source).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProfileQueryError::FileNotFound(source.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ProfileLoader for JsonProfileLoader {
    async fn load(&self, source: &str) -> Result<Profile> {
        let bytes = self.read_source(source).await?;
        info!("Read {} bytes from {}", bytes.len(), source);

        // Large profiles take seconds to parse; keep the runtime threads free.
        let owned_source = source.to_string();
        let profile = tokio::task::spawn_blocking(move || parse_profile(&bytes, &owned_source))
            .await
            .map_err(|e| ProfileQueryError::ParseError(format!("parser task failed: {e}")))??;

        info!(
            "Parsed profile with {} threads from {}",
            profile.threads.len(),
            source
        );
        Ok(profile)
    }
}

/// Parse profile JSON into a [`Profile`].
pub fn parse_profile(bytes: &[u8], source: &str) -> Result<Profile> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        return Err(ProfileQueryError::ParseError(
            "gzip-compressed profiles are not supported, decompress the file first".to_string(),
        ));
    }

    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| ProfileQueryError::ParseError(e.to_string()))?;

    let meta = root
        .get("meta")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing 'meta' object"))?;

    if root.get("threads").and_then(Value::as_array).is_none() {
        return Err(invalid("missing 'threads' array"));
    }

    let mut threads = Vec::new();
    collect_threads(&root, &mut threads);

    Ok(Profile {
        source: source.to_string(),
        product: meta
            .get("product")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        interval_ms: meta.get("interval").and_then(Value::as_f64),
        start_time: meta.get("startTime").and_then(Value::as_f64),
        threads,
    })
}

fn invalid(reason: &str) -> ProfileQueryError {
    ProfileQueryError::ParseError(format!("invalid profile: {reason}"))
}

// Gecko profiles nest child processes under "processes", each with its own "threads".
fn collect_threads(node: &Value, out: &mut Vec<ThreadSummary>) {
    if let Some(threads) = node.get("threads").and_then(Value::as_array) {
        out.extend(threads.iter().map(thread_summary));
    }

    if let Some(processes) = node.get("processes").and_then(Value::as_array) {
        for process in processes {
            collect_threads(process, out);
        }
    }
}

fn thread_summary(thread: &Value) -> ThreadSummary {
    let pid = match thread.get("pid") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let samples = thread.get("samples");
    let sample_count = samples
        .and_then(|s| s.get("length"))
        .and_then(Value::as_u64)
        .or_else(|| {
            samples
                .and_then(|s| s.get("data"))
                .and_then(Value::as_array)
                .map(|data| data.len() as u64)
        })
        .unwrap_or(0);

    ThreadSummary {
        name: thread
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string(),
        process_name: thread
            .get("processName")
            .and_then(Value::as_str)
            .map(str::to_string),
        pid,
        sample_count,
    }
}
