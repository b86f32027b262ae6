use crate::cli::commands::DaemonPhase;
use crate::profile::Profile;
use std::sync::Arc;
use tokio::sync::watch;

/// Why the load failed, as reported to every waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    /// Stable error code, e.g. `PARSE_ERROR`.
    pub kind: String,
    pub cause: String,
}

/// Outcome of the daemon's single profile load.
#[derive(Debug, Clone)]
pub enum LoadState {
    Loading,
    Ready(Arc<Profile>),
    Failed(LoadFailure),
    Stopped,
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn phase(&self) -> DaemonPhase {
        match self {
            LoadState::Loading => DaemonPhase::Loading,
            LoadState::Ready(_) => DaemonPhase::Ready,
            LoadState::Failed(_) => DaemonPhase::Failed,
            LoadState::Stopped => DaemonPhase::Stopping,
        }
    }
}

/// Single-writer gate that request handlers wait on until the load resolves.
///
/// The first transition out of `Loading` wins. `Stopped` may still replace
/// `Ready` or `Failed` so that late waiters see the shutdown.
#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<LoadState>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoadState::Loading);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> LoadState {
        self.tx.borrow().clone()
    }

    pub fn mark_ready(&self, profile: Arc<Profile>) -> bool {
        self.resolve(LoadState::Ready(profile))
    }

    pub fn mark_failed(&self, kind: &str, cause: impl Into<String>) -> bool {
        self.resolve(LoadState::Failed(LoadFailure {
            kind: kind.to_string(),
            cause: cause.into(),
        }))
    }

    pub fn mark_stopped(&self) {
        self.tx.send_replace(LoadState::Stopped);
    }

    fn resolve(&self, next: LoadState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_loading() {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the state is anything but `Loading` and return it.
    pub async fn wait_resolved(&self) -> LoadState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            // The sender lives as long as any gate clone, including ours.
            Err(_) => LoadState::Stopped,
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
