//! MCP server exposing the pipeline.
//!
//! Tools:
//! - `fabulae_synthesize` renders a conversation, or a single text when no
//!   second voice is given
//! - `fabulae_list_voices` lists the voice catalog

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fabulae_common::config::Config;
use fabulae_common::error::{Error, Result};
use fabulae_common::gcs::{GcsClient, GcsUri, UploadMode};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::naming;
use crate::pipeline::{DEFAULT_LABEL, FabulaeRequest, Pipeline};
use crate::voice::filter_voices;

const WAV_CONTENT_TYPE: &str = "audio/wav";

/// MCP server for two-voice conversation audio.
#[derive(Clone)]
pub struct FabulaeServer {
    /// Built on first use so that the server starts without credentials
    pipeline: Arc<RwLock<Option<Pipeline>>>,
    storage: Arc<RwLock<Option<GcsClient>>>,
    config: Config,
    /// Each request works in its own directory below this one
    work_dir: PathBuf,
    requests: Arc<AtomicU64>,
}

/// Tool parameters for fabulae_synthesize.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FabulaeSynthesizeToolParams {
    /// Transcript with one turn per line, or the text to speak when voice2 is absent
    pub conversation: String,
    /// Voice for even turns, or the only voice
    pub voice1: String,
    /// Voice for odd turns; omit to speak the text with voice1 alone
    #[serde(default)]
    pub voice2: Option<String>,
    /// Synthesize turn by turn (true) or as a single SSML document (false)
    #[serde(default = "default_turn_by_turn")]
    pub turn_by_turn: bool,
    /// Speaker tags stripped from the start of each line, e.g. ["AGENT", "CUSTOMER"]
    #[serde(default)]
    pub strip_tags: Vec<String>,
    /// Label used in the output file name (letters, digits, '-' and '_')
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_turn_by_turn() -> bool {
    true
}

fn default_label() -> String {
    DEFAULT_LABEL.to_string()
}

impl FabulaeSynthesizeToolParams {
    pub fn validate(&self) -> Result<()> {
        if self.conversation.trim().is_empty() {
            return Err(Error::validation("conversation cannot be empty"));
        }
        if self.voice1.trim().is_empty() {
            return Err(Error::validation("voice1 cannot be empty"));
        }
        let label_ok = !self.label.is_empty()
            && self
                .label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !label_ok {
            return Err(Error::validation(format!(
                "label '{}' may only contain letters, digits, '-' and '_'",
                self.label
            )));
        }
        Ok(())
    }
}

/// Tool parameters for fabulae_list_voices.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListVoicesToolParams {
    /// Keep voices whose name or language code contains this text
    #[serde(default)]
    pub filter: Option<String>,
}

/// Response of fabulae_synthesize.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SynthesisReport {
    /// `gs://` URIs when uploaded, local paths otherwise
    pub files: Vec<String>,
    pub duration_secs: f64,
}

impl FabulaeServer {
    pub fn new(config: Config, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: Arc::new(RwLock::new(None)),
            storage: Arc::new(RwLock::new(None)),
            config,
            work_dir: work_dir.into(),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Server using the given pipeline instead of building one from `config`.
    pub fn with_pipeline(config: Config, work_dir: impl Into<PathBuf>, pipeline: Pipeline) -> Self {
        let mut server = Self::new(config, work_dir);
        server.pipeline = Arc::new(RwLock::new(Some(pipeline)));
        server
    }

    /// Upload through `storage` instead of an ADC-authenticated client.
    pub fn with_storage(mut self, storage: GcsClient) -> Self {
        self.storage = Arc::new(RwLock::new(Some(storage)));
        self
    }

    async fn pipeline(&self) -> Result<Pipeline> {
        if let Some(pipeline) = self.pipeline.read().await.as_ref() {
            return Ok(pipeline.clone());
        }
        let mut slot = self.pipeline.write().await;
        if let Some(pipeline) = slot.as_ref() {
            return Ok(pipeline.clone());
        }
        let pipeline = Pipeline::from_config(&self.config, &self.work_dir).await?;
        *slot = Some(pipeline.clone());
        Ok(pipeline)
    }

    async fn storage(&self) -> Result<GcsClient> {
        let mut slot = self.storage.write().await;
        if let Some(storage) = slot.as_ref() {
            return Ok(storage.clone());
        }
        let storage = GcsClient::new().await?;
        *slot = Some(storage.clone());
        Ok(storage)
    }

    fn request_dir(&self) -> PathBuf {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        self.work_dir.join(format!("{}-{}", naming::now(), n))
    }

    /// Run `Fabulae` or `Speak` and publish the result.
    pub async fn synthesize(
        &self,
        params: FabulaeSynthesizeToolParams,
        cancel: CancellationToken,
    ) -> std::result::Result<CallToolResult, McpError> {
        params.validate().map_err(tool_error)?;
        info!(
            chars = params.conversation.len(),
            two_voices = params.voice2.is_some(),
            "Synthesizing"
        );

        let pipeline = self.pipeline().await.map_err(|e| {
            McpError::internal_error(format!("Failed to initialize pipeline: {}", e), None)
        })?;
        let dir = self.request_dir();
        let pipeline = pipeline.with_output_dir(&dir);

        let produced = match params.voice2 {
            None => pipeline
                .speak_with_cancel(&params.voice1, &params.conversation, cancel)
                .await
                .map(|out| (out.path, out.duration)),
            Some(voice2) => {
                let base = naming::conversation_base_name(None, &params.label, &naming::now());
                let request =
                    FabulaeRequest::new(params.voice1, voice2, params.conversation, dir.join(base))
                        .with_turn_by_turn(params.turn_by_turn)
                        .with_strip_tags(params.strip_tags)
                        .with_label(params.label);
                pipeline
                    .fabulae_with_cancel(&request, cancel)
                    .await
                    .map(|out| (out.output, out.duration))
            }
        };
        let (file, duration) = match produced {
            Ok(produced) => produced,
            Err(e) => {
                discard_request_dir(&dir, &e).await;
                return Err(tool_error(e));
            }
        };

        let files = self.publish(&dir, vec![file]).await.map_err(|e| {
            McpError::internal_error(format!("Failed to store audio: {}", e), None)
        })?;
        report(files, duration)
    }

    /// Move `files` to the audio bucket when one is configured.
    async fn publish(&self, dir: &Path, files: Vec<PathBuf>) -> Result<Vec<String>> {
        let Some(destination) = self.config.gcs_bucket.as_deref() else {
            return Ok(files.iter().map(|f| f.display().to_string()).collect());
        };

        let storage = self.storage().await?;
        let mut uris = Vec::with_capacity(files.len());
        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::validation(format!("no file name in {}", file.display())))?;
            let uri = GcsUri::for_object(destination, &name)?;
            storage
                .move_file(file, &uri, WAV_CONTENT_TYPE, UploadMode::IfAbsent)
                .await?;
            uris.push(uri.to_string());
        }

        if let Err(e) = tokio::fs::remove_dir(dir).await {
            warn!(dir = %dir.display(), error = %e, "Could not remove request directory");
        }
        Ok(uris)
    }

    /// List catalog voices, optionally filtered.
    pub async fn list_voices(
        &self,
        params: ListVoicesToolParams,
    ) -> std::result::Result<CallToolResult, McpError> {
        info!(filter = ?params.filter, "Listing voices");

        let pipeline = self.pipeline().await.map_err(|e| {
            McpError::internal_error(format!("Failed to initialize pipeline: {}", e), None)
        })?;
        let voices = pipeline.catalog().list_voices().await.map_err(|e| {
            McpError::internal_error(format!("Failed to list voices: {}", e), None)
        })?;
        let voices = filter_voices(voices, params.filter.as_deref().unwrap_or_default());

        let voices_json = serde_json::to_string_pretty(&voices).map_err(|e| {
            McpError::internal_error(format!("Failed to serialize voices: {}", e), None)
        })?;
        Ok(CallToolResult::success(vec![Content::text(voices_json)]))
    }
}

/// Remove what a failed request left behind, segments included.
async fn discard_request_dir(dir: &Path, cause: &Error) {
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            warn!(path = %entry.path().display(), error = %cause, "Discarding leftover file");
        }
    }
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Could not remove request directory"),
    }
}

fn report(files: Vec<String>, duration: Duration) -> std::result::Result<CallToolResult, McpError> {
    let report = SynthesisReport {
        files,
        duration_secs: duration.as_secs_f64(),
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| {
        McpError::internal_error(format!("Failed to serialize result: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn tool_error(e: Error) -> McpError {
    match e {
        Error::Validation(_) => McpError::invalid_params(e.to_string(), None),
        other => McpError::internal_error(format!("Synthesis failed: {}", other), None),
    }
}

fn input_schema<T: JsonSchema>() -> Arc<serde_json::Map<String, serde_json::Value>> {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(&schema).unwrap_or_default() {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

fn parse_params<T: serde::de::DeserializeOwned + Default>(
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> std::result::Result<T, McpError> {
    match arguments {
        Some(args) => serde_json::from_value(serde_json::Value::Object(args))
            .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None)),
        None => Ok(T::default()),
    }
}

impl ServerHandler for FabulaeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Two-voice conversation audio using Google Cloud Text-to-Speech. \
                 Use fabulae_synthesize with one line per turn and two voices to render \
                 a conversation, or with a single voice to speak a text. \
                 Use fabulae_list_voices to find voice names."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _params: Option<rmcp::model::PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<rmcp::model::ListToolsResult, McpError>>
    + Send
    + '_ {
        async move {
            use rmcp::model::{ListToolsResult, Tool};

            Ok(ListToolsResult {
                tools: vec![
                    Tool {
                        name: Cow::Borrowed("fabulae_synthesize"),
                        description: Some(Cow::Borrowed(
                            "Render a two-speaker transcript as one WAV file, alternating \
                             voice1 and voice2 line by line. Without voice2 the text is \
                             spoken with voice1. Returns the produced file locations.",
                        )),
                        input_schema: input_schema::<FabulaeSynthesizeToolParams>(),
                        annotations: None,
                        icons: None,
                        meta: None,
                        output_schema: None,
                        title: None,
                    },
                    Tool {
                        name: Cow::Borrowed("fabulae_list_voices"),
                        description: Some(Cow::Borrowed(
                            "List Cloud Text-to-Speech voices, optionally filtered by name or language.",
                        )),
                        input_schema: input_schema::<ListVoicesToolParams>(),
                        annotations: None,
                        icons: None,
                        meta: None,
                        output_schema: None,
                        title: None,
                    },
                ],
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: rmcp::model::CallToolRequestParams,
        context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<CallToolResult, McpError>> + Send + '_
    {
        async move {
            match params.name.as_ref() {
                "fabulae_synthesize" => {
                    let tool_params: FabulaeSynthesizeToolParams = params
                        .arguments
                        .map(|args| serde_json::from_value(serde_json::Value::Object(args)))
                        .transpose()
                        .map_err(|e| {
                            McpError::invalid_params(format!("Invalid parameters: {}", e), None)
                        })?
                        .ok_or_else(|| McpError::invalid_params("Missing parameters", None))?;

                    self.synthesize(tool_params, context.ct.clone()).await
                }
                "fabulae_list_voices" => {
                    let tool_params: ListVoicesToolParams = parse_params(params.arguments)?;
                    self.list_voices(tool_params).await
                }
                _ => Err(McpError::invalid_params(
                    format!("Unknown tool: {}", params.name),
                    None,
                )),
            }
        }
    }
}
