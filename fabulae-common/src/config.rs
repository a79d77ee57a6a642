//! Configuration loaded from environment variables and `.env`.

use std::time::Duration;

use crate::error::ConfigError;

/// Default region for Vertex AI calls.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Default HTTP port for the MCP service; `PORT` overrides it through
/// `TransportArgs`.
pub const DEFAULT_PORT: u16 = 8080;

/// Default number of turns synthesized at the same time.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Longest text accepted by a single synthesis call.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 5000;

/// Default deadline for all synthesis work of one run.
pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 300;

/// Default output sample rate requested from Cloud TTS.
pub const DEFAULT_SAMPLE_RATE_HERTZ: u32 = 24000;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Google Cloud project ID (required)
    pub project_id: String,
    /// Google Cloud location/region
    pub location: String,
    /// Audio destination as `bucket` or `bucket/prefix`
    pub gcs_bucket: Option<String>,
    /// Upper bound on in-flight synthesis calls
    pub max_concurrency: usize,
    /// Maximum characters per synthesis request
    pub max_input_chars: usize,
    /// Deadline for the synthesis phase of a run
    pub synthesis_timeout_secs: u64,
    /// Fixed output sample rate; `None` keeps each voice's natural rate
    pub sample_rate_hertz: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if PROJECT_ID is not set, or
    /// `ConfigError::InvalidValue` if a numeric setting does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_id = get("PROJECT_ID").ok_or_else(|| ConfigError::missing_env_var("PROJECT_ID"))?;

        let location = get("REGION")
            .or_else(|| get("LOCATION"))
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());

        let gcs_bucket = get("GCS_AUDIO_BUCKET");

        let max_concurrency = parse_positive(
            "FABULAE_MAX_CONCURRENCY",
            get("FABULAE_MAX_CONCURRENCY"),
            DEFAULT_MAX_CONCURRENCY,
        )?;
        let max_input_chars = parse_positive(
            "FABULAE_MAX_INPUT_CHARS",
            get("FABULAE_MAX_INPUT_CHARS"),
            DEFAULT_MAX_INPUT_CHARS,
        )?;
        let synthesis_timeout_secs = parse_positive(
            "FABULAE_SYNTHESIS_TIMEOUT_SECS",
            get("FABULAE_SYNTHESIS_TIMEOUT_SECS"),
            DEFAULT_SYNTHESIS_TIMEOUT_SECS,
        )?;

        // 0 asks for the voice's natural rate
        let sample_rate_hertz = match parse_or(
            "FABULAE_SAMPLE_RATE_HERTZ",
            get("FABULAE_SAMPLE_RATE_HERTZ"),
            DEFAULT_SAMPLE_RATE_HERTZ,
        )? {
            0 => None,
            rate => Some(rate),
        };

        Ok(Self {
            project_id,
            location,
            gcs_bucket,
            max_concurrency,
            max_input_chars,
            synthesis_timeout_secs,
            sample_rate_hertz,
        })
    }

    /// Configuration with defaults for everything except the project.
    pub fn with_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: DEFAULT_LOCATION.to_string(),
            gcs_bucket: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            synthesis_timeout_secs: DEFAULT_SYNTHESIS_TIMEOUT_SECS,
            sample_rate_hertz: Some(DEFAULT_SAMPLE_RATE_HERTZ),
        }
    }

    /// Deadline for the synthesis phase of one run.
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    /// Root of the Vertex AI publisher model URLs for this project.
    pub fn vertex_ai_models_url(&self) -> String {
        format!(
            "https://{}-aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models",
            self.location, self.project_id, self.location
        )
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid_value(key, format!("'{}': {}", raw, e))),
    }
}

fn parse_positive<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed = parse_or(key, value, default)?;
    if parsed <= T::default() {
        return Err(ConfigError::invalid_value(key, "must be greater than zero"));
    }
    Ok(parsed)
}
