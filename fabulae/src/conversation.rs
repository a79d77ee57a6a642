//! Conversation generation from documents with Gemini on Vertex AI.

use async_trait::async_trait;
use fabulae_common::auth::{AuthProvider, scopes};
use fabulae_common::config::Config;
use fabulae_common::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Built-in prompt producing `| [*]` / `| [+]` marked dialogue.
pub const PODCAST_PROMPT: &str = include_str!("prompts/podcast.txt");

/// Default model for conversation generation.
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";

/// Model used to extract document titles.
pub const TITLE_MODEL: &str = "gemini-1.5-flash";

/// Longest title kept from the model's answer, in characters.
pub const MAX_TITLE_CHARS: usize = 50;

const TITLE_PROMPT: &str = r#"Extract the title only from this document. If there is no title, provide a short title of a few words. Answer in this form only:
{"title": "title of document"}"#;

/// Writes a two-speaker transcript about a document.
#[async_trait]
pub trait ConversationGenerator: Send + Sync {
    /// Generate a transcript for the PDF at `document_uri` following `prompt`.
    async fn generate_conversation(&self, document_uri: &str, prompt: &str) -> Result<String>;
}

/// Vertex AI `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    auth: AuthProvider,
    models_url: String,
    model: String,
}

impl GeminiClient {
    /// Client for `model` in the configured project and region.
    pub async fn new(config: &Config, model: impl Into<String>) -> Result<Self> {
        let auth = AuthProvider::new().await?;
        Ok(Self::with_base_url(auth, config.vertex_ai_models_url(), model))
    }

    /// Client against a custom models root (used by tests).
    pub fn with_base_url(auth: AuthProvider, models_url: String, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            models_url,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.models_url, model)
    }

    /// Ask for the document's title; at most [`MAX_TITLE_CHARS`] characters.
    #[instrument(level = "info", skip(self))]
    pub async fn document_title(&self, document_uri: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content::user(document_uri, TITLE_PROMPT)],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };
        let endpoint = self.endpoint(TITLE_MODEL);
        let text = self.generate(&endpoint, &request).await?;

        let info: DocumentInfo = serde_json::from_str(text.trim()).map_err(|e| {
            Error::api(&endpoint, 200, format!("Title is not JSON ({}): {}", e, text))
        })?;
        Ok(info.title.chars().take(MAX_TITLE_CHARS).collect())
    }

    async fn generate(&self, endpoint: &str, request: &GenerateRequest) -> Result<String> {
        let bearer = self.auth.bearer(&[scopes::CLOUD_PLATFORM]).await?;
        debug!(endpoint = %endpoint, "Calling Gemini API");

        let response = self
            .http
            .post(endpoint)
            .header("Authorization", bearer)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::api(endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(endpoint, status.as_u16(), body));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            Error::api(endpoint, status.as_u16(), format!("Failed to parse response: {}", e))
        })?;

        body.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| Error::api(endpoint, status.as_u16(), "empty response from model"))
    }
}

#[async_trait]
impl ConversationGenerator for GeminiClient {
    #[instrument(level = "info", skip(self, prompt), fields(model = %self.model))]
    async fn generate_conversation(&self, document_uri: &str, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::validation("prompt cannot be empty"));
        }
        let request = GenerateRequest {
            contents: vec![Content::user(document_uri, prompt)],
            generation_config: None,
        };
        let text = self.generate(&self.endpoint(&self.model), &request).await?;
        info!(chars = text.len(), "Conversation generated");
        Ok(text)
    }
}

/// Keep ASCII letters and digits only, for use in file names.
///
/// ```
/// use fabulae::conversation::sanitize_title;
///
/// assert_eq!(sanitize_title("Attention Is All You Need!"), "AttentionIsAllYouNeed");
/// ```
pub fn sanitize_title(title: &str) -> String {
    title.chars().filter(char::is_ascii_alphanumeric).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn user(document_uri: &str, prompt: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![
                Part::File {
                    file_data: FileData {
                        mime_type: "application/pdf".to_string(),
                        file_uri: document_uri.to_string(),
                    },
                },
                Part::Text {
                    text: prompt.to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    title: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::turns::TurnSplitter;

    const PDF: &str = "gs://papers/attention.pdf";

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::with_base_url(
            AuthProvider::mock("test-token"),
            format!("{}/models", server.uri()),
            DEFAULT_MODEL,
        )
    }

    fn answer(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        })
    }

    #[tokio::test]
    async fn conversation_request_carries_document_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"fileData": {"mimeType": "application/pdf", "fileUri": PDF}},
                        {"text": PODCAST_PROMPT}
                    ]
                }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("| [*] Welcome.\n| [+] Thanks!\n")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server)
            .generate_conversation(PDF, PODCAST_PROMPT)
            .await
            .unwrap();

        let splitter = TurnSplitter::new(Vec::<String>::new()).unwrap();
        let turns: Vec<String> = splitter.split(&text).collect();
        assert_eq!(turns, ["Welcome.", "Thanks!"]);
    }

    #[tokio::test]
    async fn empty_candidates_are_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate_conversation(PDF, "talk about it")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty response"), "{err}");
    }

    #[tokio::test]
    async fn http_failure_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        match client(&server).generate_conversation(PDF, "p").await {
            Err(Error::Api {
                status_code,
                message,
                ..
            }) => {
                assert_eq!(status_code, 403);
                assert_eq!(message, "permission denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        let err = client(&server)
            .generate_conversation(PDF, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn title_is_parsed_and_truncated() {
        let server = MockServer::start().await;
        let long = "A".repeat(80);
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(answer(&format!("{{\"title\": \"{long}\"}}"))),
            )
            .mount(&server)
            .await;

        let title = client(&server).document_title(PDF).await.unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }

    #[tokio::test]
    async fn title_that_is_not_json_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("Attention")))
            .mount(&server)
            .await;

        assert!(client(&server).document_title(PDF).await.is_err());
    }

    #[test]
    fn sanitize_keeps_ascii_alphanumerics() {
        assert_eq!(sanitize_title("Moby-Dick; or, The Whale"), "MobyDickorTheWhale");
        assert_eq!(sanitize_title("Café 2024"), "Caf2024");
        assert_eq!(sanitize_title("  "), "");
    }

    #[test]
    fn built_in_prompt_asks_for_markers() {
        assert!(PODCAST_PROMPT.contains("| [*]"));
        assert!(PODCAST_PROMPT.contains("| [+]"));
    }
}
