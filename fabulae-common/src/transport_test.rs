//! Unit tests for transport configuration.

use clap::Parser;

use super::transport::{Transport, TransportArgs, TransportMode};

#[derive(Parser, Debug)]
struct TestCli {
    #[command(flatten)]
    transport: TransportArgs,
}

#[test]
fn test_default_transport_is_stdio() {
    let transport = Transport::default();
    assert!(transport.is_stdio());
    assert_eq!(transport.port(), None);
    assert_eq!(transport.to_string(), "stdio");
}

#[test]
fn test_http_constructor_binds_all_interfaces() {
    let transport = Transport::http(3000);
    assert!(!transport.is_stdio());
    assert_eq!(transport.port(), Some(3000));
    assert_eq!(transport.to_string(), "http (0.0.0.0:3000)");
}

#[test]
fn test_args_default() {
    let args = TransportArgs::default();
    assert_eq!(args.transport, TransportMode::Stdio);
    assert_eq!(args.port, 8080);
    assert!(args.into_transport().is_stdio());
}

#[test]
fn test_stdio_ignores_port() {
    let cli = TestCli::try_parse_from(["test", "--port", "9000"]).unwrap();
    assert_eq!(cli.transport.into_transport(), Transport::Stdio);
}

#[test]
fn test_parse_http_with_host_and_port() {
    let cli = TestCli::try_parse_from([
        "test",
        "--transport",
        "http",
        "--host",
        "127.0.0.1",
        "--port",
        "3000",
    ])
    .unwrap();

    let transport = cli.transport.into_transport();
    assert_eq!(transport.port(), Some(3000));
    assert_eq!(transport.to_string(), "http (127.0.0.1:3000)");
}

#[test]
fn test_transport_mode_is_case_insensitive() {
    let cli = TestCli::try_parse_from(["test", "--transport", "HTTP"]).unwrap();
    assert_eq!(cli.transport.transport, TransportMode::Http);
}

#[test]
fn test_unknown_transport_is_rejected() {
    let err = TestCli::try_parse_from(["test", "--transport", "carrier-pigeon"]).unwrap_err();
    assert!(err.to_string().contains("carrier-pigeon"));
}
