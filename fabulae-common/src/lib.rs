//! Shared plumbing for the fabulae crates.
//!
//! Environment configuration, the error hierarchy, Application Default
//! Credentials, Cloud Storage uploads, tracing setup and the MCP server
//! runner live here so that the CLI and the MCP server behave the same way.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod config;
pub mod error;
pub mod gcs;
pub mod server;
pub mod tracing;
pub mod transport;

#[cfg(test)]
mod server_test;
#[cfg(test)]
mod transport_test;

pub use auth::AuthProvider;
pub use config::Config;
pub use error::{AuthError, ConfigError, Error, GcsError, GcsOperation, Result, TurnFailure};
pub use gcs::{GcsClient, GcsUri, UploadMode};
pub use server::{McpServerBuilder, ServerError};
pub use transport::{Transport, TransportArgs, TransportMode};
