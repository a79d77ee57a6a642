//! Tracing initialization for the fabulae binaries.
//!
//! Logs always go to stderr. Stdout is reserved for the MCP stdio transport
//! and for the CLI's own result lines.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard `EnvFilter` directives, for example
//!   `RUST_LOG=debug` or `RUST_LOG=warn,fabulae=debug`.
//!
//! ```no_run
//! use fabulae_common::tracing::init_tracing;
//!
//! init_tracing("info");
//! tracing::info!("Application started");
//! ```

use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Build the filter: `RUST_LOG` if set and valid, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl Subscriber + Send + Sync + 'static {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt_layer)
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
pub fn init_tracing(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` when a subscriber was already installed.
pub fn try_init_tracing(default_level: &str) -> bool {
    subscriber(default_level).try_init().is_ok()
}
