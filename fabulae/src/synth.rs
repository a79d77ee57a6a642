//! Concurrent per-turn synthesis.
//!
//! Every turn runs in its own task and writes its own segment file, so tasks
//! share nothing but the concurrency gate and the result channel. Outcomes
//! arrive in completion order; [`order_segments`] restores turn order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fabulae_common::error::{Error, Result, TurnFailure};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::naming::segment_path;
use crate::tts::{SynthesisInput, Synthesizer};
use crate::turns::Turn;

/// Result of one turn's synthesis.
#[derive(Debug)]
pub struct SegmentOutcome {
    pub index: usize,
    pub voice: String,
    /// The written segment, or why there is none
    pub result: Result<PathBuf>,
}

/// Limits applied to one synthesis phase.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisLimits {
    /// Turns synthesized at the same time
    pub max_concurrency: usize,
    /// Deadline for the whole phase, measured from its start
    pub timeout: Duration,
}

/// Synthesize every turn into `<dir>/<NN>_<name>` next to `template`.
///
/// At most `limits.max_concurrency` backend calls are in flight. A failing
/// turn does not stop its siblings. Cancelling `cancel`, or reaching the
/// deadline, ends all unfinished turns with `Error::Cancelled` or
/// `Error::Timeout`. Returns one outcome per turn that reported, in
/// completion order.
pub async fn synthesize_turns(
    synthesizer: Arc<dyn Synthesizer>,
    turns: &[Turn],
    template: &Path,
    limits: SynthesisLimits,
    cancel: CancellationToken,
) -> Vec<SegmentOutcome> {
    if turns.is_empty() {
        return Vec::new();
    }

    let gate = Arc::new(Semaphore::new(limits.max_concurrency.max(1)));
    let deadline = Instant::now() + limits.timeout;
    let (tx, mut rx) = mpsc::channel(turns.len());

    for turn in turns {
        let synthesizer = Arc::clone(&synthesizer);
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        let tx = tx.clone();
        let turn = turn.clone();
        let path = segment_path(template, turn.index);
        let timeout_secs = limits.timeout.as_secs();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                finished = tokio::time::timeout_at(
                    deadline,
                    synthesize_turn(synthesizer.as_ref(), &gate, &turn, path.clone()),
                ) => finished.unwrap_or_else(|_| Err(Error::timeout(timeout_secs))),
            };

            if matches!(result, Err(Error::Cancelled | Error::Timeout(_))) {
                // An interrupted write may have left a partial file
                let _ = tokio::fs::remove_file(&path).await;
            }

            let outcome = SegmentOutcome {
                index: turn.index,
                voice: turn.voice.name,
                result,
            };
            // Capacity equals the turn count, so this never waits
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    let mut outcomes = Vec::with_capacity(turns.len());
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes
}

async fn synthesize_turn(
    synthesizer: &dyn Synthesizer,
    gate: &Semaphore,
    turn: &Turn,
    path: PathBuf,
) -> Result<PathBuf> {
    let _permit = gate.acquire().await.map_err(|_| Error::Cancelled)?;
    debug!(turn = turn.index, voice = %turn.voice.name, "Synthesizing turn");

    let input = SynthesisInput::Text(turn.text.clone());
    let audio = synthesizer.synthesize(&input, &turn.voice).await?;
    tokio::fs::write(&path, &audio)
        .await
        .map_err(|e| Error::file(&path, e))?;

    info!(
        turn = turn.index,
        voice = %turn.voice.name,
        bytes = audio.len(),
        path = %path.display(),
        "Wrote segment"
    );
    Ok(path)
}

/// Segment paths in ascending turn order, or every failure of the run.
///
/// `total` is the number of turns that were submitted. A turn with no
/// outcome at all counts as failed, so a lost task can never shift later
/// segments into its slot.
///
/// # Errors
/// `Error::TurnsFailed` listing each failed turn by index.
pub fn order_segments(mut outcomes: Vec<SegmentOutcome>, total: usize) -> Result<Vec<PathBuf>> {
    outcomes.sort_by_key(|o| o.index);

    let mut paths = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut expected = 0;

    for outcome in outcomes {
        if outcome.index < expected {
            warn!(turn = outcome.index, "Duplicate outcome ignored");
            continue;
        }
        for missing in expected..outcome.index.min(total) {
            failures.push(unreported(missing));
        }
        expected = outcome.index + 1;
        if outcome.index >= total {
            warn!(turn = outcome.index, total, "Outcome outside the conversation ignored");
            continue;
        }

        match outcome.result {
            Ok(path) => paths.push(path),
            Err(e) => {
                warn!(turn = outcome.index, voice = %outcome.voice, error = %e, "Turn failed");
                failures.push(TurnFailure {
                    index: outcome.index,
                    voice: outcome.voice,
                    message: e.to_string(),
                });
            }
        }
    }
    for missing in expected..total {
        failures.push(unreported(missing));
    }

    if failures.is_empty() {
        Ok(paths)
    } else {
        Err(Error::TurnsFailed { total, failures })
    }
}

fn unreported(index: usize) -> TurnFailure {
    TurnFailure {
        index,
        voice: "unknown".to_string(),
        message: "no result reported".to_string(),
    }
}
