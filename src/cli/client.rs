use crate::cli::commands::{DaemonRequest, DaemonResponse, PingResponse};
use crate::error::{ProfileQueryError, Result};
use crate::ipc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::time::timeout;

/// Client for one session daemon's socket.
///
/// `Load` and `Query` wait as long as the daemon needs; parsing a large
/// profile can take far longer than any sensible fixed timeout. `Stop` and
/// `Ping` use `control_timeout`.
pub struct DaemonClient {
    pub session_id: String,
    pub socket_path: PathBuf,
    pub control_timeout: Duration,
}

impl DaemonClient {
    pub fn new(session_id: impl Into<String>, socket_path: PathBuf) -> Self {
        Self {
            session_id: session_id.into(),
            socket_path,
            control_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Send a request and wait for the reply. A connection that closes
    /// without a reply means the daemon died mid-request.
    pub async fn send_request(&self, request: DaemonRequest) -> Result<DaemonResponse> {
        let stream = ipc::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        ipc::write_message(&mut write_half, &request).await?;

        let mut reader = BufReader::new(read_half);
        match ipc::read_message::<_, DaemonResponse>(&mut reader).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) | Err(ProfileQueryError::ConnectionError(_)) => {
                Err(ProfileQueryError::DaemonDied(self.session_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn send_with_timeout(&self, request: DaemonRequest) -> Result<DaemonResponse> {
        timeout(self.control_timeout, self.send_request(request))
            .await
            .map_err(|_| ProfileQueryError::SessionNotReachable(self.session_id.clone()))?
    }

    pub async fn load(&self, profile_path: &str) -> Result<DaemonResponse> {
        self.send_request(DaemonRequest::Load {
            profile_path: profile_path.to_string(),
        })
        .await
    }

    pub async fn query(&self, command: &str, args: Vec<String>) -> Result<DaemonResponse> {
        self.send_request(DaemonRequest::Query {
            command: command.to_string(),
            args,
        })
        .await
    }

    pub async fn stop(&self) -> Result<DaemonResponse> {
        self.send_with_timeout(DaemonRequest::Stop).await
    }

    pub async fn ping(&self) -> Result<PingResponse> {
        match self.send_with_timeout(DaemonRequest::Ping).await? {
            DaemonResponse::Pong(pong) => Ok(pong),
            other => Err(ProfileQueryError::ProtocolError(format!(
                "Unexpected reply to ping: {other:?}"
            ))),
        }
    }
}
