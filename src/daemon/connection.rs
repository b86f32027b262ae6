use crate::cli::commands::{DaemonRequest, DaemonResponse};
use crate::error::{ProfileQueryError, Result};
use crate::ipc;
use crate::logging::{log_debug, log_error, log_info};
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// Handles Unix socket connection processing
pub struct ConnectionHandler;

impl ConnectionHandler {
    /// Handle a single client connection: one request, one response.
    pub async fn handle_connection<F, Fut>(stream: UnixStream, request_processor: F) -> Result<()>
    where
        F: FnOnce(DaemonRequest) -> Fut,
        Fut: std::future::Future<Output = Result<DaemonResponse>>,
    {
        log_debug("daemon", "New client connection received", None);

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request: DaemonRequest = match ipc::read_message(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                log_debug("daemon", "Client disconnected (0 bytes read)", None);
                return Ok(());
            }
            Err(ProfileQueryError::ProtocolError(msg)) => {
                log_error("daemon", &format!("Rejecting malformed request: {msg}"), None);
                let response = DaemonResponse::error("BAD_REQUEST", msg);
                return ipc::write_message(&mut write_half, &response).await;
            }
            Err(e) => {
                log_error("daemon", &format!("Connection error: {e}"), None);
                return Err(e);
            }
        };

        log_info("daemon", &format!("Processing request: {request:?}"), None);

        let response = match request_processor(request).await {
            Ok(resp) => {
                log_debug(
                    "daemon",
                    &format!("Request processed successfully: {resp:?}"),
                    None,
                );
                resp
            }
            Err(e) => {
                log_error("daemon", &format!("Request processing failed: {e}"), None);
                DaemonResponse::error(e.error_code(), e.to_string())
            }
        };

        ipc::write_message(&mut write_half, &response)
            .await
            .inspect_err(|e| {
                // The client may have given up waiting; nothing else to do.
                log_error("daemon", &format!("Failed to send response: {e}"), None);
            })?;

        log_debug("daemon", "Response sent successfully", None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    async fn exchange<F, Fut>(raw_request: &[u8], processor: F) -> String
    where
        F: FnOnce(DaemonRequest) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<DaemonResponse>> + Send,
    {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle =
            tokio::spawn(async move { ConnectionHandler::handle_connection(server, processor).await });

        client.write_all(raw_request).await.unwrap();
        let mut reader = tokio::io::BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        handle.await.unwrap().unwrap();
        line
    }

    #[tokio::test]
    async fn test_request_is_dispatched() {
        let line = exchange(b"\"Stop\"\n", |request| async move {
            assert!(matches!(request, DaemonRequest::Stop));
            Ok::<_, ProfileQueryError>(DaemonResponse::Stopped {
                session_id: "s1".to_string(),
            })
        })
        .await;

        let response: DaemonResponse = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(response, DaemonResponse::Stopped { session_id } if session_id == "s1"));
    }

    #[tokio::test]
    async fn test_malformed_request_gets_bad_request() {
        let line = exchange(b"{\"Nope\":1}\n", |_| async move {
            Ok::<_, ProfileQueryError>(DaemonResponse::QueryResult {
                output: "processor must not run".to_string(),
            })
        })
        .await;

        let response: DaemonResponse = serde_json::from_str(line.trim()).unwrap();
        match response {
            DaemonResponse::Error { kind, .. } => assert_eq!(kind, "BAD_REQUEST"),
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_processor_error_becomes_error_response() {
        let line = exchange(b"\"Ping\"\n", |_| async move {
            Err::<DaemonResponse, _>(ProfileQueryError::QueryError("boom".to_string()))
        })
        .await;

        let response: DaemonResponse = serde_json::from_str(line.trim()).unwrap();
        match response {
            DaemonResponse::Error { kind, message } => {
                assert_eq!(kind, "QUERY_ERROR");
                assert_eq!(message, "Query failed: boom");
            }
            other => panic!("Expected error, got {other:?}"),
        }
    }
}
