//! Fakes shared by the unit tests.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fabulae_common::error::{Error, Result};

use crate::tts::{SynthesisInput, Synthesizer};
use crate::voice::{VoiceCatalog, VoiceIdentity, VoiceInfo};

pub use crate::voice::{DEFAULT_VOICE_A as VOICE_A, DEFAULT_VOICE_B as VOICE_B};

pub fn mono16(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

pub fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
    std::fs::write(path, wav_bytes(spec, samples)).unwrap();
}

pub fn read_samples(path: &Path) -> (hound::WavSpec, Vec<i16>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

pub fn identity(name: &str) -> VoiceIdentity {
    VoiceIdentity {
        name: name.to_string(),
        language_code: "en-US".to_string(),
        ssml_gender: None,
    }
}

/// Synthesizer that renders each text as a mono 16-bit WAV whose samples
/// are the text's bytes, so concatenated output can be checked exactly.
pub struct FakeSynthesizer {
    spec: hound::WavSpec,
    failing: HashSet<String>,
    odd_format: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    inputs: Mutex<Vec<(SynthesisInput, String)>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self {
            spec: mono16(24000),
            failing: HashSet::new(),
            odd_format: HashSet::new(),
            delay: Duration::from_millis(5),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Fail every request whose text equals `text`.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Answer `text` at 16 kHz instead of 24 kHz.
    pub fn odd_format_on(mut self, text: &str) -> Self {
        self.odd_format.insert(text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn samples_for(text: &str) -> Vec<i16> {
        text.bytes().map(i16::from).collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<(SynthesisInput, String)> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput, voice: &VoiceIdentity) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs
            .lock()
            .unwrap()
            .push((input.clone(), voice.name.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = input.as_str();
        if self.failing.contains(text) {
            return Err(Error::api("fake://synthesize", 500, "backend unavailable"));
        }
        let spec = if self.odd_format.contains(text) {
            mono16(16000)
        } else {
            self.spec
        };
        Ok(wav_bytes(spec, &Self::samples_for(text)))
    }
}

pub struct FakeCatalog {
    names: Vec<&'static str>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            names: vec![VOICE_A, VOICE_B, "en-GB-Neural2-B"],
        }
    }
}

#[async_trait]
impl VoiceCatalog for FakeCatalog {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self
            .names
            .iter()
            .map(|name| VoiceInfo {
                name: name.to_string(),
                language_codes: vec![name[..5].to_string()],
                ssml_gender: Some("NEUTRAL".to_string()),
                natural_sample_rate_hertz: Some(24000),
            })
            .collect())
    }
}
