//! Fabulae
//!
//! Two-voice conversation audio from transcripts and PDFs using Google Cloud
//! Text-to-Speech. A transcript is split into turns, the turns alternate
//! between two voices, every turn is synthesized concurrently and the
//! segments are joined back, in turn order, into one WAV file.

pub mod conversation;
pub mod naming;
pub mod pipeline;
pub mod server;
pub mod synth;
pub mod tts;
pub mod turns;
pub mod voice;
pub mod wav;

#[cfg(test)]
mod testing;

pub use conversation::{ConversationGenerator, GeminiClient};
pub use pipeline::{FabulaeOutput, FabulaeRequest, Pipeline, PipelineSettings, SpeakOutput};
pub use server::FabulaeServer;
pub use tts::{CloudTtsClient, SynthesisInput, Synthesizer};
pub use turns::{Turn, TurnSplitter};
pub use voice::{VoiceCatalog, VoiceIdentity, VoiceInfo, VoicePair};
pub use wav::CombinedWaveform;
