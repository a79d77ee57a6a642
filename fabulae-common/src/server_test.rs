//! Unit tests for the server runner.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::server::{MCP_PATH, McpServerBuilder, ServerError};
use super::transport::Transport;

#[test]
fn test_bind_failed_display() {
    let err = ServerError::BindFailed {
        addr: "0.0.0.0:8080".to_string(),
        message: "Address already in use".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("0.0.0.0:8080"));
    assert!(msg.contains("Address already in use"));
}

#[test]
fn test_transport_error_display() {
    let err = ServerError::Transport("Connection reset".to_string());
    assert!(err.to_string().contains("Connection reset"));
}

#[test]
fn test_io_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err: ServerError = io_err.into();
    assert!(matches!(err, ServerError::Io(_)));
}

#[test]
fn test_mcp_path() {
    assert_eq!(MCP_PATH, "/mcp");
}

#[derive(Clone)]
struct NoopHandler;

impl rmcp::ServerHandler for NoopHandler {}

#[tokio::test]
async fn test_http_server_stops_when_token_is_cancelled() {
    let token = CancellationToken::new();
    let server = McpServerBuilder::new(NoopHandler)
        .with_transport(Transport::Http {
            addr: "127.0.0.1:0".parse().unwrap(),
        })
        .with_shutdown(token.clone());

    let handle = tokio::spawn(server.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
}
