//! Voice identities, the voice catalog seam and turn-to-voice assignment.

use async_trait::async_trait;
use fabulae_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default voice for the first speaker.
pub const DEFAULT_VOICE_A: &str = "en-US-Chirp-HD-D";

/// Default voice for the second speaker.
pub const DEFAULT_VOICE_B: &str = "en-US-Chirp-HD-F";

/// A voice as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    pub name: String,
    pub language_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml_gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_sample_rate_hertz: Option<u32>,
}

/// The voice selected for synthesis. Resolved once per run and held fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceIdentity {
    pub name: String,
    pub language_code: String,
    pub ssml_gender: Option<String>,
}

impl VoiceIdentity {
    /// Identity from a catalog entry; the first listed language wins.
    pub fn from_info(info: &VoiceInfo) -> Result<Self> {
        let language_code = info.language_codes.first().ok_or_else(|| {
            Error::validation(format!("voice {} lists no language code", info.name))
        })?;
        Ok(Self {
            name: info.name.clone(),
            language_code: language_code.clone(),
            ssml_gender: info.ssml_gender.clone(),
        })
    }
}

/// Source of available voices.
#[async_trait]
pub trait VoiceCatalog: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>>;
}

/// Look up each name in one catalog listing, preserving the order of `names`.
///
/// # Errors
/// `Error::Validation` naming the first voice the catalog does not know.
pub async fn resolve_voices(
    catalog: &dyn VoiceCatalog,
    names: &[&str],
) -> Result<Vec<VoiceIdentity>> {
    let voices = catalog.list_voices().await?;
    names
        .iter()
        .map(|name| {
            let info = voices
                .iter()
                .find(|v| v.name == *name)
                .ok_or_else(|| Error::validation(format!("voice not found: {}", name)))?;
            tracing::debug!(voice = %info.name, "Resolved voice");
            VoiceIdentity::from_info(info)
        })
        .collect()
}

/// Look up a single voice by name.
pub async fn resolve_voice(catalog: &dyn VoiceCatalog, name: &str) -> Result<VoiceIdentity> {
    let mut resolved = resolve_voices(catalog, &[name]).await?;
    resolved
        .pop()
        .ok_or_else(|| Error::validation(format!("voice not found: {}", name)))
}

/// Voices whose name or a language code contains `filter`, ignoring case.
/// An empty filter keeps everything.
pub fn filter_voices(voices: Vec<VoiceInfo>, filter: &str) -> Vec<VoiceInfo> {
    let needle = filter.trim().to_lowercase();
    if needle.is_empty() {
        return voices;
    }
    voices
        .into_iter()
        .filter(|v| {
            v.name.to_lowercase().contains(&needle)
                || v.language_codes
                    .iter()
                    .any(|l| l.to_lowercase().contains(&needle))
        })
        .collect()
}

/// The two alternating speakers of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePair {
    pub a: VoiceIdentity,
    pub b: VoiceIdentity,
}

impl VoicePair {
    pub fn new(a: VoiceIdentity, b: VoiceIdentity) -> Self {
        Self { a, b }
    }

    /// Voice A for even turn indices, voice B for odd ones.
    pub fn for_turn(&self, index: usize) -> &VoiceIdentity {
        if index % 2 == 0 { &self.a } else { &self.b }
    }
}
