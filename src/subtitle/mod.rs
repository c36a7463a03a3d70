//! Subtitle data model and the track transformations that run before translation.
//!
//! - `srt`: reading and writing the SRT interchange format
//! - `timeline`: overlap repair against a frame interval
//! - `merge`: greedy folding of short adjacent entries

pub mod merge;
pub mod srt;
pub mod timeline;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub use merge::{MergeEngine, count_tokens};
pub use srt::{pair_tracks, parse_bilingual_srt, parse_srt, read_srt, to_bilingual_srt, to_srt, write_srt};
pub use timeline::{TimelineNormalizer, frame_interval_ms};

/// One timed line of subtitle text. Times are milliseconds from the start of the media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl SubtitleEntry {
    pub fn new<S: Into<String>>(index: usize, start_ms: u64, end_ms: u64, text: S) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Ordered sequence of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    entries: Vec<SubtitleEntry>,
}

impl SubtitleTrack {
    pub fn new(entries: Vec<SubtitleEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SubtitleEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SubtitleEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reassign indices 1..=n in current order.
    pub fn renumber(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.index = i + 1;
        }
    }

    /// Check the structural invariants every stage relies on: unique indices,
    /// non-empty text, `start < end` and non-decreasing starts.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut previous_start = 0;

        for entry in &self.entries {
            if !seen.insert(entry.index) {
                return Err(RelayError::Validation(format!(
                    "duplicate subtitle index {}",
                    entry.index
                )));
            }
            if entry.text.trim().is_empty() {
                return Err(RelayError::Validation(format!(
                    "subtitle {} has empty text",
                    entry.index
                )));
            }
            if entry.start_ms >= entry.end_ms {
                return Err(RelayError::Validation(format!(
                    "subtitle {} starts at {} but ends at {}",
                    entry.index,
                    format_srt_time(entry.start_ms),
                    format_srt_time(entry.end_ms)
                )));
            }
            if entry.start_ms < previous_start {
                return Err(RelayError::Validation(format!(
                    "subtitle {} starts before its predecessor",
                    entry.index
                )));
            }
            previous_start = entry.start_ms;
        }

        Ok(())
    }
}

impl FromIterator<SubtitleEntry> for SubtitleTrack {
    fn from_iter<I: IntoIterator<Item = SubtitleEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Source text paired with its translation, keyed by the entry index it was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilingualLine {
    pub index: usize,
    pub source: String,
    pub target: String,
}

impl BilingualLine {
    /// Line whose target slot repeats the source text.
    pub fn untranslated(index: usize, source: &str) -> Self {
        Self {
            index,
            source: source.to_string(),
            target: source.to_string(),
        }
    }
}

/// Format milliseconds as an SRT timestamp (HH:MM:SS,mmm)
pub fn format_srt_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}
