//! Output file naming.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

/// `YYYYMMDD.HHMMSS.cc`, where `cc` is hundredths of a second.
pub fn timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}.{:02}",
        at.format("%Y%m%d.%H%M%S"),
        at.timestamp_subsec_millis().min(999) / 10
    )
}

/// Timestamp for the current local time.
pub fn now() -> String {
    timestamp(&Local::now())
}

/// Path of the temporary segment for turn `index`: the template's file name
/// prefixed with the zero-padded index, in the template's directory.
///
/// ```
/// use std::path::Path;
/// use fabulae::naming::segment_path;
///
/// assert_eq!(segment_path(Path::new("out/talk.wav"), 3), Path::new("out/03_talk.wav"));
/// ```
pub fn segment_path(template: &Path, index: usize) -> PathBuf {
    let name = template
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    template.with_file_name(format!("{:02}_{}", index, name))
}

/// `<dir>/<label>_<timestamp>.wav`.
pub fn combined_output_path(dir: &Path, label: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{}_{}.wav", label, timestamp))
}

/// `<dir>/<timestamp>.wav`, used for single-voice output.
pub fn speech_output_path(dir: &Path, timestamp: &str) -> PathBuf {
    dir.join(format!("{}.wav", timestamp))
}

/// Kind of source a conversation came from; part of the output names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryType {
    /// A transcript file supplied by the user
    Transcript,
    /// Generated from a document with the built-in prompt
    Podcast,
    /// Generated from a document with a user prompt
    Custom,
}

impl StoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryType::Transcript => "transcript",
            StoryType::Podcast => "podcast",
            StoryType::Custom => "custom",
        }
    }

    /// `<storytype>-<label>`, the label used for the combined output.
    pub fn label(&self, label: &str) -> String {
        format!("{}-{}", self.as_str(), label)
    }
}

impl std::fmt::Display for StoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base name for a conversation's audio: `<stem>_<label>_<timestamp>.wav`.
///
/// The stem is the transcript file name up to its first dot, or `fabulae`
/// when there is no transcript file.
pub fn conversation_base_name(source: Option<&Path>, label: &str, timestamp: &str) -> String {
    let stem = source
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "fabulae".to_string());
    format!("{}_{}_{}.wav", stem, label, timestamp)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn at(millis: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_milli_opt(14, 5, 9, millis)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn timestamp_has_centiseconds() {
        assert_eq!(timestamp(&at(0)), "20240307.140509.00");
        assert_eq!(timestamp(&at(129)), "20240307.140509.12");
        assert_eq!(timestamp(&at(999)), "20240307.140509.99");
    }

    #[test]
    fn segment_names_sort_in_turn_order() {
        let template = Path::new("/tmp/assets/talk.wav");
        let mut names: Vec<PathBuf> = [10, 2, 0, 99, 1].iter().map(|i| segment_path(template, *i)).collect();
        names.sort();
        let indices: Vec<&str> = names
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(indices, ["00_talk.wav", "01_talk.wav", "02_talk.wav", "10_talk.wav", "99_talk.wav"]);
        assert_eq!(names[0].parent(), Some(Path::new("/tmp/assets")));
    }

    #[test]
    fn segment_padding_grows_past_two_digits() {
        assert_eq!(segment_path(Path::new("a.wav"), 123), Path::new("123_a.wav"));
    }

    #[test]
    fn output_paths() {
        let dir = Path::new("assets");
        assert_eq!(
            combined_output_path(dir, "podcast-Moby", "20240307.140509.12"),
            Path::new("assets/podcast-Moby_20240307.140509.12.wav")
        );
        assert_eq!(
            speech_output_path(dir, "20240307.140509.12"),
            Path::new("assets/20240307.140509.12.wav")
        );
    }

    #[test]
    fn base_name_uses_transcript_stem() {
        let label = StoryType::Transcript.label("demo");
        assert_eq!(label, "transcript-demo");
        assert_eq!(
            conversation_base_name(Some(Path::new("scripts/call.v2.txt")), &label, "T"),
            "call_transcript-demo_T.wav"
        );
        assert_eq!(
            conversation_base_name(None, &StoryType::Podcast.label("x"), "T"),
            "fabulae_podcast-x_T.wav"
        );
    }
}
