use crate::logging::log_info;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};

#[derive(Debug, Clone)]
pub struct ActivityInfo {
    pub last_activity_time: Instant,
}

impl ActivityInfo {
    pub fn new() -> Self {
        Self {
            last_activity_time: Instant::now(),
        }
    }

    pub fn update(&mut self) {
        self.last_activity_time = Instant::now();
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity_time.elapsed() > timeout
    }
}

impl Default for ActivityInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared record of request activity for one daemon.
///
/// A request counts as activity both when it arrives and while it is being
/// served, so a `Load` that waits on a slow parse never looks idle.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    info: Arc<RwLock<ActivityInfo>>,
    in_flight: Arc<AtomicUsize>,
}

/// Marks one request as in flight until dropped.
pub struct RequestGuard {
    tracker: ActivityTracker,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin_request(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.info.write().await.update();
        RequestGuard {
            tracker: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn is_idle(&self, timeout: Duration) -> bool {
        self.in_flight() == 0 && self.info.read().await.is_inactive(timeout)
    }
}

/// Send on `shutdown_tx` once the daemon has been idle for `timeout`.
pub fn spawn_idle_watchdog(
    session_id: String,
    tracker: ActivityTracker,
    timeout: Duration,
    shutdown_tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    let check_every = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(5));

    tokio::spawn(async move {
        let mut ticker = interval(check_every);
        loop {
            ticker.tick().await;
            if tracker.is_idle(timeout).await {
                log_info(
                    "daemon",
                    &format!(
                        "Session {session_id} idle for {}s, shutting down",
                        timeout.as_secs()
                    ),
                    None,
                );
                let _ = shutdown_tx.send(()).await;
                break;
            }
        }
    })
}
