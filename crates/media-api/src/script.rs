//! Script parsing and line-by-line narration
//!
//! A script is a list of `HH:MM:SS-HH:MM:SS: description` lines. Only the
//! description is spoken; the whole line is kept as the clip caption.

use bytes::Bytes;
use key_rotation::{CancellationToken, InvocationError};
use tracing::{info, warn};

use crate::elevenlabs::{SpeechClient, VoiceSettings};
use crate::error::{Error, Result};

/// One script line ready to synthesize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenLine {
    /// Trimmed original line
    pub caption: String,
    /// Text after the first `": "`, or the whole line without a timestamp
    pub text: String,
}

/// Synthesized line.
#[derive(Debug, Clone)]
pub struct Clip {
    pub caption: String,
    pub audio: Bytes,
}

/// Line the provider rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLine {
    pub caption: String,
    pub reason: String,
}

/// Result of narrating a whole script.
#[derive(Debug, Clone, Default)]
pub struct Narration {
    pub clips: Vec<Clip>,
    pub failed: Vec<FailedLine>,
}

/// Split a script into speakable lines. Blank lines are dropped.
pub fn spoken_lines(script: &str) -> Vec<SpokenLine> {
    script
        .lines()
        .filter_map(|line| {
            let caption = line.trim();
            if caption.is_empty() {
                return None;
            }
            let text = match caption.split_once(": ") {
                Some((_, text)) => text.trim(),
                None => caption,
            };
            Some(SpokenLine {
                caption: caption.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Synthesize every line of `script` with one voice.
///
/// A line the provider rejects is recorded in `failed` and skipped.
/// Exhaustion and cancellation stop the whole narration, since every later
/// line would hit the same condition.
pub async fn narrate(
    speech: &SpeechClient,
    voice_id: &str,
    script: &str,
    settings: VoiceSettings,
    cancel: &CancellationToken,
) -> Result<Narration> {
    let lines = spoken_lines(script);
    if lines.is_empty() {
        return Err(Error::EmptyScript);
    }

    let mut narration = Narration::default();
    for (index, line) in lines.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(line = index + 1, "narration cancelled");
            return Err(InvocationError::Cancelled.into());
        }

        match speech.text_to_speech(voice_id, &line.text, settings, cancel).await {
            Ok(audio) => narration.clips.push(Clip {
                caption: line.caption,
                audio,
            }),
            Err(Error::Invocation(InvocationError::Fatal(reason))) => {
                warn!(line = index + 1, reason = %reason, "skipping line");
                narration.failed.push(FailedLine {
                    caption: line.caption,
                    reason,
                });
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        clips = narration.clips.len(),
        failed = narration.failed.len(),
        "narration finished"
    );
    Ok(narration)
}
