//! WAV segment combination.
//!
//! Segments are decoded with `hound`, checked against the first segment's
//! format and concatenated sample by sample. The output is written to a
//! `.part` file and renamed into place, so a failed combine never leaves a
//! truncated output behind.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fabulae_common::error::{Error, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info, warn};

/// The combined output of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedWaveform {
    pub path: PathBuf,
    pub spec: WavSpec,
    /// Samples across all channels
    pub total_samples: u64,
    pub duration: Duration,
}

/// Concatenate `segments`, in the given order, into `output`.
///
/// All segments must share the first segment's sample rate, bit depth,
/// channel count and sample format. The segments are deleted once the output
/// is in place; on any error they are left untouched.
///
/// # Errors
/// `Error::Audio` for zero segments, undecodable input or a format mismatch,
/// `Error::File` if the output cannot be written.
pub fn combine_segments(segments: &[PathBuf], output: &Path) -> Result<CombinedWaveform> {
    let first = segments
        .first()
        .ok_or_else(|| Error::audio("no segments to combine"))?;

    // Read only the headers here; segments are reopened one at a time
    // while writing, so at most two files are open at once.
    let spec = open_segment(first)?.spec();
    for path in &segments[1..] {
        let other = open_segment(path)?.spec();
        if !same_format(&spec, &other) {
            return Err(Error::audio(format!(
                "{} is {} but {} is {}",
                path.display(),
                describe(&other),
                first.display(),
                describe(&spec)
            )));
        }
    }
    debug!(
        segments = segments.len(),
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        channels = spec.channels,
        "Combining segments"
    );

    let part = part_path(output);
    let written = write_concatenated(&part, spec, segments);
    let total_samples = match written {
        Ok(total) => total,
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            return Err(e);
        }
    };
    std::fs::rename(&part, output).map_err(|e| {
        let _ = std::fs::remove_file(&part);
        Error::file(output, e)
    })?;

    for path in segments {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Could not remove segment");
        }
    }

    let duration = duration_of(total_samples, &spec);
    info!(
        path = %output.display(),
        samples = total_samples,
        duration_ms = duration.as_millis() as u64,
        "Wrote combined waveform"
    );
    Ok(CombinedWaveform {
        path: output.to_path_buf(),
        spec,
        total_samples,
        duration,
    })
}

/// Playing time of a WAV file held in memory.
pub fn wav_bytes_duration(bytes: &[u8]) -> Result<Duration> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::audio(format!("decoding synthesized audio: {}", e)))?;
    let spec = reader.spec();
    Ok(duration_of(u64::from(reader.len()), &spec))
}

fn open_segment(path: &Path) -> Result<WavReader<std::io::BufReader<File>>> {
    WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => Error::file(path, io),
        other => Error::audio(format!("{}: {}", path.display(), other)),
    })
}

fn same_format(a: &WavSpec, b: &WavSpec) -> bool {
    a.sample_rate == b.sample_rate
        && a.bits_per_sample == b.bits_per_sample
        && a.channels == b.channels
        && a.sample_format == b.sample_format
}

fn describe(spec: &WavSpec) -> String {
    let kind = match spec.sample_format {
        SampleFormat::Int => "int",
        SampleFormat::Float => "float",
    };
    format!(
        "{} Hz {}-bit {} x{}",
        spec.sample_rate, spec.bits_per_sample, kind, spec.channels
    )
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

fn duration_of(total_samples: u64, spec: &WavSpec) -> Duration {
    let frames_per_sec = u64::from(spec.sample_rate) * u64::from(spec.channels.max(1));
    if frames_per_sec == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total_samples as f64 / frames_per_sec as f64)
}

fn write_concatenated(part: &Path, spec: WavSpec, segments: &[PathBuf]) -> Result<u64> {
    let mut writer = WavWriter::create(part, spec).map_err(|e| match e {
        hound::Error::IoError(io) => Error::file(part, io),
        other => Error::audio(other.to_string()),
    })?;

    let mut total = 0u64;
    for path in segments {
        let reader = open_segment(path)?;
        total += match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, _) => copy_samples::<f32>(reader, &mut writer)?,
            (SampleFormat::Int, 0..=8) => copy_samples::<i8>(reader, &mut writer)?,
            (SampleFormat::Int, 9..=16) => copy_samples::<i16>(reader, &mut writer)?,
            (SampleFormat::Int, _) => copy_samples::<i32>(reader, &mut writer)?,
        };
    }

    writer
        .finalize()
        .map_err(|e| Error::audio(format!("finalizing {}: {}", part.display(), e)))?;
    Ok(total)
}

fn copy_samples<S>(
    mut reader: WavReader<std::io::BufReader<File>>,
    writer: &mut WavWriter<BufWriter<File>>,
) -> Result<u64>
where
    S: hound::Sample,
{
    let mut copied = 0u64;
    for sample in reader.samples::<S>() {
        let sample = sample.map_err(|e| Error::audio(format!("decoding segment: {}", e)))?;
        writer
            .write_sample(sample)
            .map_err(|e| Error::audio(format!("writing sample: {}", e)))?;
        copied += 1;
    }
    Ok(copied)
}
