//! Error types shared by the fabulae crates.
//!
//! A single `thiserror` hierarchy covers the whole pipeline so that failures
//! bubble up to the CLI or MCP boundary as plain values.
//!
//! # Error Categories
//!
//! - `ConfigError`: Missing or invalid configuration
//! - `GcsError`: Google Cloud Storage operations
//! - `AuthError`: Authentication failures
//! - `Error::Api`: Google Cloud API errors (includes endpoint and status)
//! - `Error::Validation`: Input rejected before any synthesis work starts
//! - `Error::Io` / `Error::File`: File system operations
//! - `Error::Audio`: WAV decoding, encoding and format mismatches
//! - `Error::Timeout` / `Error::Cancelled`: Aborted synthesis
//! - `Error::TurnsFailed`: Per-turn synthesis failures collected for a run

use std::fmt;

use thiserror::Error;

/// Unified error type for fabulae.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing env vars, invalid values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// GCS operation errors (upload, invalid URIs)
    #[error(transparent)]
    Gcs(#[from] GcsError),

    /// Authentication errors (ADC not configured, token refresh failures)
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// API errors with endpoint and HTTP status context
    #[error("API error for {endpoint} (HTTP {status_code}): {message}")]
    Api {
        /// The API endpoint that was called
        endpoint: String,
        /// HTTP status code returned by the API, 0 when no response arrived
        status_code: u16,
        /// Error message from the API or describing the failure
        message: String,
    },

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// File system I/O errors without path context
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// File system I/O errors on a known path
    #[error("I/O error on {path}: {source}")]
    File {
        /// The path being read, written or removed
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// WAV decode/encode errors and segment format mismatches
    #[error("Audio error: {0}")]
    Audio(String),

    /// Synthesis did not finish before the run deadline
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Synthesis was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// One or more turns failed; the combined output was not produced
    #[error("{} of {total} turns failed: {}", .failures.len(), FailureList(.failures))]
    TurnsFailed {
        /// Number of turns in the run
        total: usize,
        /// Failed turns in ascending index order
        failures: Vec<TurnFailure>,
    },
}

impl Error {
    /// Create a new API error with endpoint, status code, and message.
    ///
    /// # Example
    ///
    /// ```
    /// use fabulae_common::error::Error;
    ///
    /// let err = Error::api(
    ///     "https://texttospeech.googleapis.com/v1/text:synthesize",
    ///     500,
    ///     "Internal server error"
    /// );
    /// assert!(err.to_string().contains("texttospeech"));
    /// assert!(err.to_string().contains("500"));
    /// ```
    pub fn api(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new validation error.
    ///
    /// ```
    /// use fabulae_common::error::Error;
    ///
    /// let err = Error::validation("conversation has no turns");
    /// assert!(err.to_string().contains("no turns"));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create a new audio error.
    pub fn audio(message: impl Into<String>) -> Self {
        Error::Audio(message.into())
    }

    /// Attach a path to an I/O error.
    pub fn file(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::File {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a new timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Error::Timeout(seconds)
    }
}

/// A single turn that produced no segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure {
    /// Turn index within the conversation
    pub index: usize,
    /// Voice the turn was assigned
    pub voice: String,
    /// Rendered cause of the failure
    pub message: String,
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn {} ({}): {}", self.index, self.voice, self.message)
    }
}

struct FailureList<'a>(&'a [TurnFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Configuration errors.
///
/// These errors occur when loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    /// Create a new missing environment variable error.
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        ConfigError::MissingEnvVar(name.into())
    }

    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// GCS operation type for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcsOperation {
    /// Upload operation
    Upload,
    /// Reading or removing the local copy of an uploaded file
    LocalFile,
}

impl fmt::Display for GcsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcsOperation::Upload => write!(f, "upload"),
            GcsOperation::LocalFile => write!(f, "local-file"),
        }
    }
}

/// GCS operation errors.
#[derive(Debug, Error)]
pub enum GcsError {
    /// The GCS URI or bucket destination is invalid
    #[error("Invalid GCS URI: {0}")]
    InvalidUri(String),

    /// The object already exists and the upload required it not to
    #[error("GCS object already exists: {0}")]
    AlreadyExists(String),

    /// A GCS operation failed with context about the URI and operation type
    #[error("GCS {operation} failed for {uri}: {message}")]
    OperationFailed {
        /// The GCS URI that was being accessed
        uri: String,
        /// The type of operation that failed
        operation: GcsOperation,
        /// Error message describing the failure
        message: String,
    },

    /// Authentication error during GCS operation
    #[error("GCS authentication error: {0}")]
    AuthError(String),
}

impl GcsError {
    /// Create a new invalid URI error.
    pub fn invalid_uri(uri: impl Into<String>) -> Self {
        GcsError::InvalidUri(uri.into())
    }

    /// Create a new operation failed error with full context.
    ///
    /// ```
    /// use fabulae_common::error::{GcsError, GcsOperation};
    ///
    /// let err = GcsError::operation_failed(
    ///     "gs://my-bucket/audio/out.wav",
    ///     GcsOperation::Upload,
    ///     "Permission denied"
    /// );
    /// assert!(err.to_string().contains("gs://my-bucket"));
    /// assert!(err.to_string().contains("upload"));
    /// ```
    pub fn operation_failed(
        uri: impl Into<String>,
        operation: GcsOperation,
        message: impl Into<String>,
    ) -> Self {
        GcsError::OperationFailed {
            uri: uri.into(),
            operation,
            message: message.into(),
        }
    }

    /// Create a new authentication error.
    pub fn auth_error(message: impl Into<String>) -> Self {
        GcsError::AuthError(message.into())
    }
}

/// Authentication errors for Application Default Credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// ADC is not configured
    #[error("ADC not configured. Run 'gcloud auth application-default login' or set GOOGLE_APPLICATION_CREDENTIALS")]
    NotConfigured,

    /// Token refresh failed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

impl AuthError {
    /// Create a new token refresh failed error.
    pub fn refresh_failed(message: impl Into<String>) -> Self {
        AuthError::RefreshFailed(message.into())
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
