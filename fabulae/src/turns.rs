//! Splitting a transcript into speaker turns.
//!
//! A transcript has one turn per non-blank line. Lines may carry a leading
//! speaker marker (`| [*]` for the first speaker, `| [+]` for the second)
//! and a speaker tag such as `AGENT:`; both are removed from the spoken text.

use fabulae_common::error::{Error, Result};
use regex::Regex;

use crate::voice::{VoiceIdentity, VoicePair};

/// Leading marker of a first-speaker line.
pub const FIRST_SPEAKER_MARKER: &str = r"^\|\s\[\*\]";

/// Leading marker of a second-speaker line.
pub const SECOND_SPEAKER_MARKER: &str = r"^\|\s\[\+\]";

/// Pause inserted after every turn in a single-block SSML document.
pub const TURN_BREAK: &str = r#"<break time="250ms"/>"#;

/// The pair of leading-marker patterns that tag a line with its speaker.
#[derive(Debug, Clone)]
pub struct SpeakerMarkers {
    first: Regex,
    second: Regex,
}

impl SpeakerMarkers {
    /// # Errors
    /// `Error::Validation` if either pattern is not a valid regex.
    pub fn new(first: &str, second: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::validation(format!("invalid speaker marker '{}': {}", pattern, e))
            })
        };
        Ok(Self {
            first: compile(first)?,
            second: compile(second)?,
        })
    }

    /// `| [*]` and `| [+]`.
    pub fn standard() -> Result<Self> {
        Self::new(FIRST_SPEAKER_MARKER, SECOND_SPEAKER_MARKER)
    }

    fn strip<'a>(&self, line: &'a str) -> &'a str {
        [&self.first, &self.second]
            .into_iter()
            .find_map(|re| re.find(line))
            .map_or(line, |m| &line[m.end()..])
    }
}

/// Cleans transcript lines into turn texts.
#[derive(Debug, Clone)]
pub struct TurnSplitter {
    markers: Option<SpeakerMarkers>,
    strip_tags: Vec<String>,
}

impl TurnSplitter {
    /// Splitter with the standard speaker markers and the given speaker tags.
    ///
    /// Tags are matched with or without a trailing colon (`AGENT` and
    /// `AGENT:` are the same tag). Empty tags are ignored.
    pub fn new<I, S>(strip_tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            markers: Some(SpeakerMarkers::standard()?),
            strip_tags: normalize_tags(strip_tags),
        })
    }

    /// Replace the speaker markers; `None` disables marker stripping.
    pub fn with_markers(mut self, markers: Option<SpeakerMarkers>) -> Self {
        self.markers = markers;
        self
    }

    pub fn strip_tags(&self) -> &[String] {
        &self.strip_tags
    }

    /// Cleaned turn texts in input order.
    ///
    /// Blank lines are skipped before indexing, so the n-th item is turn n.
    /// A line holding only a marker yields an empty turn, which is kept.
    pub fn split<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(move |line| self.clean_line(line))
    }

    /// Strip one speaker marker, then one leading `TAG:`, then trim.
    pub fn clean_line(&self, line: &str) -> String {
        let line = match &self.markers {
            Some(markers) => markers.strip(line),
            None => line,
        };
        strip_leading_tag(line.trim_start(), &self.strip_tags)
            .trim()
            .to_string()
    }
}

fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().trim_end_matches(':').trim_end().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn strip_leading_tag<'a>(line: &'a str, tags: &[String]) -> &'a str {
    tags.iter()
        .find_map(|tag| {
            line.strip_prefix(tag.as_str())
                .and_then(|rest| rest.trim_start().strip_prefix(':'))
        })
        .unwrap_or(line)
}

/// One line of dialogue with its assigned voice. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub index: usize,
    pub text: String,
    pub voice: VoiceIdentity,
}

/// Number the texts densely from 0 and alternate the two voices.
pub fn assign_voices<I>(texts: I, voices: &VoicePair) -> Vec<Turn>
where
    I: IntoIterator<Item = String>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Turn {
            index,
            text,
            voice: voices.for_turn(index).clone(),
        })
        .collect()
}

/// One `<speak>` document voicing every turn in order.
///
/// Each turn becomes `<mark name="i"/><voice name="V">text</voice>` followed
/// by a 250ms break.
pub fn build_conversation_ssml(turns: &[Turn]) -> String {
    let mut ssml = String::from("<speak>");
    for turn in turns {
        ssml.push_str(&format!(
            r#"<mark name="{}"/><voice name="{}">{}</voice>"#,
            turn.index,
            escape_xml(&turn.voice.name),
            escape_xml(&turn.text)
        ));
        ssml.push_str(TURN_BREAK);
    }
    ssml.push_str("</speak>");
    ssml
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
