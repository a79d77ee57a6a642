//! Cloud Text-to-Speech client and the synthesis seam used by the pipeline.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use fabulae_common::auth::{AuthProvider, scopes};
use fabulae_common::config::Config;
use fabulae_common::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::voice::{VoiceCatalog, VoiceIdentity, VoiceInfo};

const TTS_BASE_URL: &str = "https://texttospeech.googleapis.com/v1";

/// What to speak: plain text or an SSML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisInput {
    Text(String),
    Ssml(String),
}

impl SynthesisInput {
    pub fn as_str(&self) -> &str {
        match self {
            SynthesisInput::Text(s) | SynthesisInput::Ssml(s) => s,
        }
    }

    /// Length in characters, the unit the backend limit is expressed in.
    pub fn char_count(&self) -> usize {
        self.as_str().chars().count()
    }
}

/// Turns text into WAV bytes.
///
/// Implementations must be shareable across the concurrent turn tasks.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `input` with `voice`. For SSML input the voice supplies the
    /// language; per-turn voices are named inside the document.
    async fn synthesize(&self, input: &SynthesisInput, voice: &VoiceIdentity) -> Result<Vec<u8>>;
}

/// Reject input longer than `max_chars` characters.
///
/// Nothing is truncated; callers check before any request is made.
pub fn check_input_length(input: &SynthesisInput, max_chars: usize) -> Result<()> {
    let count = input.char_count();
    if count > max_chars {
        return Err(Error::validation(format!(
            "input has {} characters, the limit is {}",
            count, max_chars
        )));
    }
    Ok(())
}

/// Cloud TTS REST client (`text:synthesize`, `voices`).
#[derive(Clone)]
pub struct CloudTtsClient {
    http: reqwest::Client,
    auth: AuthProvider,
    base_url: String,
    sample_rate_hertz: Option<u32>,
}

impl CloudTtsClient {
    /// Client authenticated with Application Default Credentials.
    #[instrument(level = "debug", name = "tts_client_new", skip_all)]
    pub async fn new(config: &Config) -> Result<Self> {
        let auth = AuthProvider::new().await?;
        Ok(Self::with_auth(auth, config.sample_rate_hertz))
    }

    pub fn with_auth(auth: AuthProvider, sample_rate_hertz: Option<u32>) -> Self {
        Self::with_base_url(auth, TTS_BASE_URL.to_string(), sample_rate_hertz)
    }

    /// Client against a custom API root (used by tests).
    pub fn with_base_url(
        auth: AuthProvider,
        base_url: String,
        sample_rate_hertz: Option<u32>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            base_url,
            sample_rate_hertz,
        }
    }

    pub fn synthesize_endpoint(&self) -> String {
        format!("{}/text:synthesize", self.base_url)
    }

    pub fn voices_endpoint(&self) -> String {
        format!("{}/voices", self.base_url)
    }

    fn build_request(&self, input: &SynthesisInput, voice: &VoiceIdentity) -> TtsRequest {
        let (text, ssml, name, ssml_gender) = match input {
            SynthesisInput::Text(text) => (
                Some(text.clone()),
                None,
                Some(voice.name.clone()),
                voice.ssml_gender.clone(),
            ),
            SynthesisInput::Ssml(ssml) => (None, Some(ssml.clone()), None, None),
        };
        TtsRequest {
            input: TtsInput { text, ssml },
            voice: TtsVoice {
                language_code: voice.language_code.clone(),
                name,
                ssml_gender,
            },
            audio_config: TtsAudioConfig {
                audio_encoding: "LINEAR16".to_string(),
                sample_rate_hertz: self.sample_rate_hertz,
            },
        }
    }
}

#[async_trait]
impl Synthesizer for CloudTtsClient {
    #[instrument(level = "debug", skip_all, fields(voice = %voice.name, chars = input.char_count()))]
    async fn synthesize(&self, input: &SynthesisInput, voice: &VoiceIdentity) -> Result<Vec<u8>> {
        let request = self.build_request(input, voice);
        let bearer = self.auth.bearer(&[scopes::CLOUD_PLATFORM]).await?;

        let endpoint = self.synthesize_endpoint();
        debug!(endpoint = %endpoint, "Calling Cloud TTS API");

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", bearer)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let api_response: TtsResponse = response.json().await.map_err(|e| {
            Error::api(
                &endpoint,
                status.as_u16(),
                format!("Failed to parse response: {}", e),
            )
        })?;

        if api_response.audio_content.is_empty() {
            return Err(Error::api(&endpoint, status.as_u16(), "No audio content returned"));
        }

        let audio = BASE64
            .decode(&api_response.audio_content)
            .map_err(|e| Error::api(&endpoint, status.as_u16(), format!("Invalid base64 audio: {}", e)))?;

        debug!(bytes = audio.len(), "Received audio");
        Ok(audio)
    }
}

#[async_trait]
impl VoiceCatalog for CloudTtsClient {
    #[instrument(level = "debug", skip(self))]
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        let bearer = self.auth.bearer(&[scopes::CLOUD_PLATFORM]).await?;
        let endpoint = self.voices_endpoint();

        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", bearer)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let api_response: VoicesResponse = response.json().await.map_err(|e| {
            Error::api(
                &endpoint,
                status.as_u16(),
                format!("Failed to parse response: {}", e),
            )
        })?;

        info!(count = api_response.voices.len(), "Listed voices");
        Ok(api_response.voices)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsRequest {
    input: TtsInput,
    voice: TtsVoice,
    audio_config: TtsAudioConfig,
}

#[derive(Debug, Serialize)]
struct TtsInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssml: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsVoice {
    language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssml_gender: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsAudioConfig {
    audio_encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate_hertz: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsResponse {
    #[serde(default)]
    audio_content: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<VoiceInfo>,
}
