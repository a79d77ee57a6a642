//! The `Fabulae` and `Speak` operations.
//!
//! [`Pipeline`] sequences the turn splitter, voice resolution, concurrent
//! synthesis and waveform combination. Every input check runs before the
//! first backend call, so a rejected request costs nothing.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fabulae_common::config::{
    Config, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_INPUT_CHARS, DEFAULT_SYNTHESIS_TIMEOUT_SECS,
};
use fabulae_common::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::naming;
use crate::synth::{SynthesisLimits, order_segments, synthesize_turns};
use crate::tts::{CloudTtsClient, SynthesisInput, Synthesizer, check_input_length};
use crate::turns::{TurnSplitter, assign_voices, build_conversation_ssml};
use crate::voice::{VoiceCatalog, VoiceIdentity, VoicePair, resolve_voice, resolve_voices};
use crate::wav::{combine_segments, wav_bytes_duration};

/// Label used when a request does not name one.
pub const DEFAULT_LABEL: &str = "conversation";

/// Limits and locations for pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_concurrency: usize,
    pub max_input_chars: usize,
    pub synthesis_timeout: Duration,
    /// Directory for `Speak` output
    pub output_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            max_input_chars: config.max_input_chars,
            synthesis_timeout: config.synthesis_timeout(),
            output_dir: output_dir.into(),
        }
    }

    fn limits(&self) -> SynthesisLimits {
        SynthesisLimits {
            max_concurrency: self.max_concurrency,
            timeout: self.synthesis_timeout,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            synthesis_timeout: Duration::from_secs(DEFAULT_SYNTHESIS_TIMEOUT_SECS),
            output_dir: PathBuf::from("."),
        }
    }
}

/// A two-voice conversation to render.
#[derive(Debug, Clone)]
pub struct FabulaeRequest {
    /// Voice for even turns
    pub voice1: String,
    /// Voice for odd turns
    pub voice2: String,
    /// Transcript, one turn per line
    pub conversation: String,
    /// Base file name. Segments are written next to it as `NN_<name>`;
    /// single-block mode writes to it directly.
    pub output: PathBuf,
    /// Synthesize each turn separately (`true`) or as one SSML document
    pub turn_by_turn: bool,
    /// Speaker tags removed from the start of each line
    pub strip_tags: Vec<String>,
    /// Prefix of the combined file name
    pub label: String,
}

impl FabulaeRequest {
    pub fn new(
        voice1: impl Into<String>,
        voice2: impl Into<String>,
        conversation: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            voice1: voice1.into(),
            voice2: voice2.into(),
            conversation: conversation.into(),
            output: output.into(),
            turn_by_turn: true,
            strip_tags: Vec::new(),
            label: DEFAULT_LABEL.to_string(),
        }
    }

    pub fn with_turn_by_turn(mut self, turn_by_turn: bool) -> Self {
        self.turn_by_turn = turn_by_turn;
        self
    }

    pub fn with_strip_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strip_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Result of a `Fabulae` run.
#[derive(Debug, Clone, PartialEq)]
pub struct FabulaeOutput {
    /// The combined or single-block audio file
    pub output: PathBuf,
    /// Per-turn segments, in turn order. Already removed from disk; empty in
    /// single-block mode.
    pub segments: Vec<PathBuf>,
    pub duration: Duration,
}

/// Result of a `Speak` run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOutput {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Orchestrates synthesis runs against a synthesizer and a voice catalog.
#[derive(Clone)]
pub struct Pipeline {
    synthesizer: Arc<dyn Synthesizer>,
    catalog: Arc<dyn VoiceCatalog>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        catalog: Arc<dyn VoiceCatalog>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            synthesizer,
            catalog,
            settings,
        }
    }

    /// Pipeline backed by Cloud TTS for both synthesis and the voice list.
    pub async fn from_config(config: &Config, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Arc::new(CloudTtsClient::new(config).await?);
        Ok(Self::new(
            client.clone(),
            client,
            PipelineSettings::from_config(config, output_dir),
        ))
    }

    /// The same backends writing `Speak` output to `dir`.
    pub fn with_output_dir(&self, dir: impl Into<PathBuf>) -> Self {
        let mut pipeline = self.clone();
        pipeline.settings.output_dir = dir.into();
        pipeline
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &dyn VoiceCatalog {
        self.catalog.as_ref()
    }

    /// Render a two-voice conversation.
    pub async fn fabulae(&self, request: &FabulaeRequest) -> Result<FabulaeOutput> {
        self.fabulae_with_cancel(request, CancellationToken::new())
            .await
    }

    /// [`Pipeline::fabulae`], aborting in-flight synthesis when `cancel`
    /// fires.
    ///
    /// # Errors
    /// - `Error::Validation` for an empty conversation, oversized input or an
    ///   unknown voice, before any synthesis starts
    /// - `Error::TurnsFailed` if any turn failed; nothing is combined
    /// - `Error::Audio` / `Error::File` if combining fails
    #[instrument(level = "info", skip_all, fields(turn_by_turn = request.turn_by_turn, label = %request.label))]
    pub async fn fabulae_with_cancel(
        &self,
        request: &FabulaeRequest,
        cancel: CancellationToken,
    ) -> Result<FabulaeOutput> {
        let splitter = TurnSplitter::new(&request.strip_tags)?;
        let texts: Vec<String> = splitter.split(&request.conversation).collect();
        if texts.is_empty() {
            return Err(Error::validation("conversation has no turns"));
        }
        info!(turns = texts.len(), "Conversation split");

        if request.turn_by_turn {
            self.turn_by_turn(request, texts, cancel).await
        } else {
            self.single_block(request, texts, cancel).await
        }
    }

    async fn turn_by_turn(
        &self,
        request: &FabulaeRequest,
        texts: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<FabulaeOutput> {
        let max = self.settings.max_input_chars;
        for (index, text) in texts.iter().enumerate() {
            let count = text.chars().count();
            if count > max {
                return Err(Error::validation(format!(
                    "turn {} has {} characters, the limit is {}",
                    index, count, max
                )));
            }
        }

        let voices = self.voice_pair(request).await?;
        let turns = assign_voices(texts, &voices);
        let dir = parent_dir(&request.output);
        ensure_dir(dir).await?;

        let outcomes = synthesize_turns(
            Arc::clone(&self.synthesizer),
            &turns,
            &request.output,
            self.settings.limits(),
            cancel,
        )
        .await;
        let segments = order_segments(outcomes, turns.len())?;
        info!(segments = segments.len(), "All turns synthesized");

        let combined_path = naming::combined_output_path(dir, &request.label, &naming::now());
        let to_combine = segments.clone();
        let combined =
            tokio::task::spawn_blocking(move || combine_segments(&to_combine, &combined_path))
                .await
                .map_err(|e| Error::audio(format!("combine task failed: {}", e)))??;

        Ok(FabulaeOutput {
            output: combined.path,
            segments,
            duration: combined.duration,
        })
    }

    async fn single_block(
        &self,
        request: &FabulaeRequest,
        texts: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<FabulaeOutput> {
        // The document only carries voice names, so it can be sized before
        // the catalog is consulted.
        let named = VoicePair::new(named_voice(&request.voice1), named_voice(&request.voice2));
        let ssml = build_conversation_ssml(&assign_voices(texts, &named));
        let input = SynthesisInput::Ssml(ssml);
        check_input_length(&input, self.settings.max_input_chars)?;

        let voices = self.voice_pair(request).await?;
        let audio = self
            .guarded(cancel, self.synthesizer.synthesize(&input, &voices.a))
            .await?;

        ensure_dir(parent_dir(&request.output)).await?;
        write_audio(&request.output, &audio).await?;
        let duration = wav_bytes_duration(&audio)?;

        Ok(FabulaeOutput {
            output: request.output.clone(),
            segments: Vec::new(),
            duration,
        })
    }

    /// Speak `text` with one voice into `<output_dir>/<timestamp>.wav`.
    pub async fn speak(&self, voice: &str, text: &str) -> Result<SpeakOutput> {
        self.speak_with_cancel(voice, text, CancellationToken::new())
            .await
    }

    #[instrument(level = "info", skip_all, fields(voice = %voice))]
    pub async fn speak_with_cancel(
        &self,
        voice: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<SpeakOutput> {
        if text.trim().is_empty() {
            return Err(Error::validation("nothing to speak"));
        }
        let input = SynthesisInput::Text(text.to_string());
        check_input_length(&input, self.settings.max_input_chars)?;

        let identity = resolve_voice(self.catalog.as_ref(), voice).await?;
        let audio = self
            .guarded(cancel, self.synthesizer.synthesize(&input, &identity))
            .await?;

        ensure_dir(&self.settings.output_dir).await?;
        let path = naming::speech_output_path(&self.settings.output_dir, &naming::now());
        write_audio(&path, &audio).await?;
        let duration = wav_bytes_duration(&audio)?;

        Ok(SpeakOutput { path, duration })
    }

    async fn voice_pair(&self, request: &FabulaeRequest) -> Result<VoicePair> {
        let mut resolved = resolve_voices(
            self.catalog.as_ref(),
            &[request.voice1.as_str(), request.voice2.as_str()],
        )
        .await?
        .into_iter();
        match (resolved.next(), resolved.next()) {
            (Some(a), Some(b)) => Ok(VoicePair::new(a, b)),
            _ => Err(Error::validation("both voices must resolve")),
        }
    }

    /// Run a single synthesis call under the run deadline and `cancel`.
    async fn guarded<F>(&self, cancel: CancellationToken, call: F) -> Result<Vec<u8>>
    where
        F: Future<Output = Result<Vec<u8>>>,
    {
        let timeout = self.settings.synthesis_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            finished = tokio::time::timeout(timeout, call) => {
                finished.unwrap_or_else(|_| Err(Error::timeout(timeout.as_secs())))
            }
        }
    }
}

fn named_voice(name: &str) -> VoiceIdentity {
    VoiceIdentity {
        name: name.to_string(),
        language_code: String::new(),
        ssml_gender: None,
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::file(dir, e))
}

async fn write_audio(path: &Path, audio: &[u8]) -> Result<()> {
    tokio::fs::write(path, audio)
        .await
        .map_err(|e| Error::file(path, e))?;
    info!(path = %path.display(), bytes = audio.len(), "Wrote audio");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCatalog, FakeSynthesizer, VOICE_A, VOICE_B, read_samples};

    fn pipeline(synth: Arc<FakeSynthesizer>, output_dir: &Path) -> Pipeline {
        Pipeline::new(
            synth,
            Arc::new(FakeCatalog::new()),
            PipelineSettings {
                output_dir: output_dir.to_path_buf(),
                ..PipelineSettings::default()
            },
        )
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn conversation_becomes_one_combined_file() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            "AGENT: one\n\nCUSTOMER: two\nAGENT: three\n",
            dir.path().join("call.wav"),
        )
        .with_strip_tags(["AGENT", "CUSTOMER"])
        .with_label("transcript-demo");

        let output = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap();

        assert_eq!(synth.calls(), 3);
        assert_eq!(output.segments.len(), 3);
        assert!(output.segments.iter().all(|s| !s.exists()));
        assert_eq!(output.output.parent(), Some(dir.path()));
        let name = output.output.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("transcript-demo_"), "{name}");
        assert_eq!(files_in(dir.path()), [name]);

        let (_, samples) = read_samples(&output.output);
        let expected: Vec<i16> = ["one", "two", "three"]
            .iter()
            .flat_map(|t| FakeSynthesizer::samples_for(t))
            .collect();
        assert_eq!(samples, expected);
        assert!(output.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn marked_lines_alternate_voices() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            "| [*] hello there\n| [+] hi!\n",
            dir.path().join("out.wav"),
        );

        pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap();

        let mut inputs = synth.inputs();
        inputs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        assert_eq!(
            inputs,
            [
                (SynthesisInput::Text("hello there".into()), VOICE_A.to_string()),
                (SynthesisInput::Text("hi!".into()), VOICE_B.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn marker_only_turn_is_still_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            "| [*] a\n| [+]\n| [*] c",
            dir.path().join("out.wav"),
        );

        let output = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap();

        assert_eq!(synth.calls(), 3);
        assert_eq!(output.segments.len(), 3);
        assert!(
            synth
                .inputs()
                .contains(&(SynthesisInput::Text(String::new()), VOICE_B.to_string()))
        );
    }

    #[tokio::test]
    async fn oversized_turn_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let long = "x".repeat(DEFAULT_MAX_INPUT_CHARS + 1);
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            format!("short\n{long}\n"),
            dir.path().join("out.wav"),
        );

        let err = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)), "{err}");
        assert!(err.to_string().contains("turn 1"), "{err}");
        assert_eq!(synth.calls(), 0);
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(VOICE_A, VOICE_B, "\n  \n", dir.path().join("out.wav"));

        let err = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no turns"), "{err}");
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_voice_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(VOICE_A, "xx-XX-Nobody", "hi\nho", dir.path().join("out.wav"));

        let err = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("xx-XX-Nobody"), "{err}");
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn failed_turn_aborts_the_combine() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new().failing_on("three"));
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            "one\ntwo\nthree\nfour\nfive",
            dir.path().join("out.wav"),
        );

        let err = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();

        match err {
            Error::TurnsFailed { total, failures } => {
                assert_eq!(total, 5);
                let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
                assert_eq!(indices, [2]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            files_in(dir.path()),
            ["00_out.wav", "01_out.wav", "03_out.wav", "04_out.wav"]
        );
    }

    #[tokio::test]
    async fn mismatched_segment_format_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new().odd_format_on("two"));
        let request = FabulaeRequest::new(VOICE_A, VOICE_B, "one\ntwo", dir.path().join("out.wav"));

        let err = pipeline(synth, dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Audio(_)), "{err}");
        assert!(err.to_string().contains("01_out.wav"), "{err}");
        assert_eq!(files_in(dir.path()), ["00_out.wav", "01_out.wav"]);
    }

    #[tokio::test]
    async fn cancelled_run_reports_every_turn() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let request = FabulaeRequest::new(VOICE_A, VOICE_B, "one\ntwo", dir.path().join("out.wav"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline(synth, dir.path())
            .fabulae_with_cancel(&request, cancel)
            .await
            .unwrap_err();

        match err {
            Error::TurnsFailed { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.message.contains("cancelled")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn single_block_makes_one_ssml_call() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let output_path = dir.path().join("nested").join("block.wav");
        let request = FabulaeRequest::new(VOICE_A, VOICE_B, "| [*] hi\n| [+] bye", &output_path)
            .with_turn_by_turn(false);

        let output = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap();

        assert_eq!(output.output, output_path);
        assert!(output.segments.is_empty());
        assert!(output_path.exists());

        let inputs = synth.inputs();
        assert_eq!(inputs.len(), 1);
        let (input, voice) = &inputs[0];
        assert_eq!(voice, VOICE_A);
        match input {
            SynthesisInput::Ssml(ssml) => {
                assert!(ssml.starts_with("<speak>"));
                assert!(ssml.contains(&format!(r#"<mark name="1"/><voice name="{VOICE_B}">bye</voice>"#)));
            }
            other => panic!("expected SSML, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_ssml_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        // Each turn fits, the document does not
        let line = "y".repeat(3000);
        let request = FabulaeRequest::new(
            VOICE_A,
            VOICE_B,
            format!("{line}\n{line}"),
            dir.path().join("out.wav"),
        )
        .with_turn_by_turn(false);

        let err = pipeline(synth.clone(), dir.path())
            .fabulae(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn speak_writes_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());

        let output = pipeline(synth.clone(), dir.path())
            .speak(VOICE_A, "hello")
            .await
            .unwrap();

        assert_eq!(synth.calls(), 1);
        assert_eq!(output.path.parent(), Some(dir.path()));
        let name = output.path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(files_in(dir.path()), [name]);
        let (_, samples) = read_samples(&output.path);
        assert_eq!(samples, FakeSynthesizer::samples_for("hello"));
        // 5 samples at 24 kHz
        assert_eq!(output.duration, Duration::from_secs_f64(5.0 / 24000.0));
    }

    #[tokio::test]
    async fn speak_rejects_empty_and_unknown_input() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new());
        let pipeline = pipeline(synth.clone(), dir.path());

        assert!(matches!(
            pipeline.speak(VOICE_A, "  ").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            pipeline.speak("voiceX", "hello").await,
            Err(Error::Validation(_))
        ));
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn speak_honours_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynthesizer::new().with_delay(Duration::from_secs(10)));
        let pipeline = Pipeline::new(
            synth,
            Arc::new(FakeCatalog::new()),
            PipelineSettings {
                synthesis_timeout: Duration::from_millis(20),
                output_dir: dir.path().to_path_buf(),
                ..PipelineSettings::default()
            },
        );

        let err = pipeline.speak(VOICE_A, "hello").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{err}");
        assert!(files_in(dir.path()).is_empty());
    }
}
