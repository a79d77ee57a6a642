//! Fabulae CLI
//!
//! Turns a two-speaker transcript, or a PDF summarized by Gemini into one,
//! into a single WAV file using Cloud Text-to-Speech.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use fabulae::conversation::{
    ConversationGenerator, DEFAULT_MODEL, GeminiClient, PODCAST_PROMPT, sanitize_title,
};
use fabulae::naming::{self, StoryType};
use fabulae::pipeline::{FabulaeRequest, Pipeline};
use fabulae::voice::{DEFAULT_VOICE_A, DEFAULT_VOICE_B, filter_voices};
use fabulae_common::Config;
use fabulae_common::server::wait_for_shutdown_signal;
use fabulae_common::tracing::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fabulae", version)]
#[command(about = "Two-voice conversation audio with Cloud Text-to-Speech")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a transcript or a PDF as a two-voice conversation
    Conversation(ConversationArgs),
    /// Speak a text with a single voice
    Speak(SpeakArgs),
    /// Print the available voices as JSON
    Voices(VoicesArgs),
}

#[derive(Args, Debug)]
struct ConversationArgs {
    /// Path to a transcript, one turn per line
    #[arg(long = "conversationfile", required_unless_present = "pdf_url", conflicts_with = "pdf_url")]
    conversation_file: Option<PathBuf>,

    /// URI of a PDF to generate the conversation from
    #[arg(long)]
    pdf_url: Option<String>,

    /// Voice for the first speaker
    #[arg(long, default_value = DEFAULT_VOICE_A)]
    voice1: String,

    /// Voice for the second speaker
    #[arg(long, default_value = DEFAULT_VOICE_B)]
    voice2: String,

    /// Comma-separated speaker tags to strip
    #[arg(long = "strip", value_delimiter = ',', default_value = "AGENT,CUSTOMER")]
    strip_tags: Vec<String>,

    /// Synthesize each turn separately; false sends one SSML document
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    turn_by_turn: bool,

    /// Label for the output file; PDF titles are used when omitted
    #[arg(long)]
    label: Option<String>,

    /// Output folder
    #[arg(long, default_value = ".")]
    assetdir: PathBuf,

    /// Generative model for PDF sources
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Prompt file to use instead of the built-in podcast prompt
    #[arg(long)]
    promptfile: Option<PathBuf>,

    /// Save the generated transcript next to the audio
    #[arg(long)]
    save_transcript: bool,
}

#[derive(Args, Debug)]
struct SpeakArgs {
    /// Voice name
    #[arg(long, default_value = DEFAULT_VOICE_A)]
    voice: String,

    /// Output folder
    #[arg(long, default_value = ".")]
    assetdir: PathBuf,

    /// Text to speak
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

#[derive(Args, Debug)]
struct VoicesArgs {
    /// Keep voices whose name or language contains this text
    #[arg(long)]
    filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;
    info!(
        project_id = %config.project_id,
        location = %config.location,
        "Configuration loaded"
    );

    match cli.command {
        Command::Conversation(args) => conversation(&config, args).await,
        Command::Speak(args) => speak(&config, args).await,
        Command::Voices(args) => voices(&config, args).await,
    }
}

async fn conversation(config: &Config, args: ConversationArgs) -> Result<()> {
    let (story_type, title, text) = match (&args.pdf_url, &args.conversation_file) {
        (Some(pdf_url), _) => {
            let gemini = GeminiClient::new(config, &args.model).await?;
            let title = match &args.label {
                Some(label) => label.clone(),
                None => document_title(&gemini, pdf_url).await,
            };
            let (story_type, prompt) = load_prompt(args.promptfile.as_deref()).await;

            info!(pdf_url = %pdf_url, model = %gemini.model(), "Generating conversation");
            let text = gemini.generate_conversation(pdf_url, &prompt).await?;
            if args.save_transcript {
                save_transcript(&args.assetdir, &story_type.label(&title), &text).await?;
            }
            (story_type, title, text)
        }
        (None, Some(file)) => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("couldn't read {}", file.display()))?;
            (StoryType::Transcript, args.label.clone().unwrap_or_default(), text)
        }
        (None, None) => bail!("one of --conversationfile or --pdf-url is required"),
    };

    let label = story_type.label(&title);
    let base = naming::conversation_base_name(args.conversation_file.as_deref(), &label, &naming::now());
    let request = FabulaeRequest::new(args.voice1, args.voice2, text, args.assetdir.join(base))
        .with_turn_by_turn(args.turn_by_turn)
        .with_strip_tags(args.strip_tags)
        .with_label(label);

    let pipeline = Pipeline::from_config(config, &args.assetdir).await?;
    let output = pipeline
        .fabulae_with_cancel(&request, cancel_on_signal())
        .await?;

    for segment in &output.segments {
        println!("{}", segment.display());
    }
    println!();
    println!("audio file created: {}", output.output.display());
    println!("duration: {:.2}s", output.duration.as_secs_f64());
    Ok(())
}

async fn speak(config: &Config, args: SpeakArgs) -> Result<()> {
    let text = args.text.join(" ");
    let pipeline = Pipeline::from_config(config, &args.assetdir).await?;
    let output = pipeline
        .speak_with_cancel(&args.voice, &text, cancel_on_signal())
        .await?;

    println!("Audio content written to file: {}", output.path.display());
    println!("duration: {:.2}s", output.duration.as_secs_f64());
    Ok(())
}

async fn voices(config: &Config, args: VoicesArgs) -> Result<()> {
    let pipeline = Pipeline::from_config(config, ".").await?;
    let voices = pipeline.catalog().list_voices().await?;
    let voices = filter_voices(voices, args.filter.as_deref().unwrap_or_default());
    println!("{}", serde_json::to_string_pretty(&voices)?);
    Ok(())
}

/// Title for file names; failures fall back to an empty title.
async fn document_title(gemini: &GeminiClient, pdf_url: &str) -> String {
    match gemini.document_title(pdf_url).await {
        Ok(title) => {
            info!(title = %title, "Document title");
            sanitize_title(&title)
        }
        Err(e) => {
            warn!(error = %e, "Could not get the document title");
            String::new()
        }
    }
}

/// The prompt to generate with, and the story type it implies.
///
/// An unreadable prompt file falls back to the built-in prompt.
async fn load_prompt(promptfile: Option<&Path>) -> (StoryType, String) {
    let Some(path) = promptfile else {
        return (StoryType::Podcast, PODCAST_PROMPT.to_string());
    };
    match tokio::fs::read_to_string(path).await {
        Ok(prompt) if !prompt.trim().is_empty() => {
            info!(path = %path.display(), "Using prompt file");
            (StoryType::Custom, prompt)
        }
        Ok(_) => {
            warn!(path = %path.display(), "Prompt file is empty, using the built-in prompt");
            (StoryType::Custom, PODCAST_PROMPT.to_string())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Using the built-in prompt");
            (StoryType::Custom, PODCAST_PROMPT.to_string())
        }
    }
}

async fn save_transcript(dir: &Path, label: &str, text: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}_{}_transcript.txt", label, naming::now()));
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Transcript saved");
    Ok(())
}

fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("Interrupted, cancelling synthesis");
        trigger.cancel();
    });
    token
}
