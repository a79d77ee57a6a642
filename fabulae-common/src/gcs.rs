//! Google Cloud Storage upload for produced audio.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::auth::{AuthProvider, scopes};
use crate::error::{GcsError, GcsOperation};

const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Parsed GCS URI components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsUri {
    /// Bucket name
    pub bucket: String,
    /// Object path within the bucket
    pub object: String,
}

impl GcsUri {
    /// Parse a `gs://bucket/path` URI into components.
    ///
    /// # Errors
    /// Returns `GcsError::InvalidUri` if the URI format is invalid.
    pub fn parse(uri: &str) -> Result<Self, GcsError> {
        let rest = uri
            .strip_prefix("gs://")
            .ok_or_else(|| GcsError::invalid_uri(format!("URI must start with 'gs://': {}", uri)))?;

        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| GcsError::invalid_uri(format!("URI must contain bucket and path: {}", uri)))?;

        if bucket.is_empty() {
            return Err(GcsError::invalid_uri("Bucket name cannot be empty"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    /// Place `object_name` under a `bucket` or `bucket/prefix` destination.
    ///
    /// This is the form of `GCS_AUDIO_BUCKET`; a leading `gs://` is accepted.
    ///
    /// ```
    /// use fabulae_common::gcs::GcsUri;
    ///
    /// let uri = GcsUri::for_object("my-bucket/audio/", "out.wav").unwrap();
    /// assert_eq!(uri.to_string(), "gs://my-bucket/audio/out.wav");
    /// ```
    pub fn for_object(destination: &str, object_name: &str) -> Result<Self, GcsError> {
        let destination = destination.strip_prefix("gs://").unwrap_or(destination);
        let (bucket, prefix) = match destination.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (destination, ""),
        };

        if bucket.is_empty() {
            return Err(GcsError::invalid_uri(format!(
                "Destination has no bucket: {}",
                destination
            )));
        }

        let object = if prefix.is_empty() {
            object_name.to_string()
        } else {
            format!("{}/{}", prefix, object_name)
        };

        Ok(Self {
            bucket: bucket.to_string(),
            object,
        })
    }
}

impl std::fmt::Display for GcsUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// Upload precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    /// Replace whatever is stored at the URI
    #[default]
    Overwrite,
    /// Fail with `GcsError::AlreadyExists` if the object exists
    IfAbsent,
}

/// GCS upload client.
#[derive(Clone)]
pub struct GcsClient {
    client: reqwest::Client,
    auth: AuthProvider,
    /// Base URL for the GCS JSON API (overridden in tests)
    base_url: String,
}

impl GcsClient {
    /// Create a GCS client that authenticates with ADC.
    ///
    /// # Errors
    /// Returns `GcsError::AuthError` if authentication setup fails.
    pub async fn new() -> Result<Self, GcsError> {
        let auth = AuthProvider::new()
            .await
            .map_err(|e| GcsError::auth_error(e.to_string()))?;
        Ok(Self::with_auth(auth))
    }

    /// Create a GCS client with a provided auth provider.
    pub fn with_auth(auth: AuthProvider) -> Self {
        Self::with_base_url(auth, GCS_BASE_URL.to_string())
    }

    /// Create a GCS client against a custom API root.
    pub fn with_base_url(auth: AuthProvider, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            base_url,
        }
    }

    /// Upload bytes to GCS.
    ///
    /// # Errors
    /// Returns `GcsError::AlreadyExists` when `mode` is `IfAbsent` and the
    /// object exists, or `GcsError::OperationFailed` for any other failure.
    #[instrument(level = "debug", skip(self, data), fields(uri = %uri, bytes = data.len()))]
    pub async fn upload(
        &self,
        uri: &GcsUri,
        data: Vec<u8>,
        content_type: &str,
        mode: UploadMode,
    ) -> Result<(), GcsError> {
        let bearer = self
            .auth
            .bearer(&[scopes::DEVSTORAGE_READ_WRITE])
            .await
            .map_err(|e| GcsError::auth_error(e.to_string()))?;

        let mut url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            uri.bucket,
            urlencoding::encode(&uri.object)
        );
        if mode == UploadMode::IfAbsent {
            url.push_str("&ifGenerationMatch=0");
        }
        debug!(url = %url, "Uploading object");

        let response = self
            .client
            .post(&url)
            .header("Authorization", bearer)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                GcsError::operation_failed(
                    uri.to_string(),
                    GcsOperation::Upload,
                    format!("Upload request failed: {}", e),
                )
            })?;

        let status = response.status();
        if status.as_u16() == 412 && mode == UploadMode::IfAbsent {
            return Err(GcsError::AlreadyExists(uri.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GcsError::operation_failed(
                uri.to_string(),
                GcsOperation::Upload,
                format!("Failed with status {}: {}", status, body),
            ));
        }

        Ok(())
    }

    /// Upload a local file to `uri` and delete the local copy afterwards.
    ///
    /// The local file is kept if the upload fails.
    pub async fn move_file(
        &self,
        path: &Path,
        uri: &GcsUri,
        content_type: &str,
        mode: UploadMode,
    ) -> Result<(), GcsError> {
        let local_failed = |e: std::io::Error| {
            GcsError::operation_failed(
                path.display().to_string(),
                GcsOperation::LocalFile,
                e.to_string(),
            )
        };

        let data = tokio::fs::read(path).await.map_err(local_failed)?;
        self.upload(uri, data, content_type, mode).await?;
        tokio::fs::remove_file(path).await.map_err(local_failed)?;

        info!(path = %path.display(), uri = %uri, "Moved file to Cloud Storage");
        Ok(())
    }
}
