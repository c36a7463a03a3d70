use tracing::debug;

use super::{SubtitleTrack, format_srt_time};
use crate::error::{RelayError, Result};

/// Length of one frame in whole milliseconds, rounded up.
pub fn frame_interval_ms(fps: f64) -> Result<u64> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(RelayError::Validation(format!("invalid frame rate: {}", fps)));
    }
    Ok((1000.0 / fps).ceil() as u64)
}

/// Pulls each entry's end back so it finishes at least one frame before the
/// next entry starts. Start times are never moved.
#[derive(Debug, Clone, Copy)]
pub struct TimelineNormalizer {
    frame_ms: u64,
}

impl TimelineNormalizer {
    pub fn new(fps: f64) -> Result<Self> {
        Ok(Self {
            frame_ms: frame_interval_ms(fps)?,
        })
    }

    pub fn frame_ms(&self) -> u64 {
        self.frame_ms
    }

    pub fn normalize(&self, track: &SubtitleTrack) -> Result<SubtitleTrack> {
        let mut entries = track.entries().to_vec();
        let mut adjusted = 0;

        for i in 0..entries.len().saturating_sub(1) {
            let next_start = entries[i + 1].start_ms;
            if entries[i].end_ms + self.frame_ms > next_start {
                entries[i].end_ms = next_start.saturating_sub(self.frame_ms);
                adjusted += 1;
            }
        }

        for entry in &entries {
            if entry.start_ms >= entry.end_ms {
                return Err(RelayError::Validation(format!(
                    "subtitle {} has no duration after timeline repair ({} --> {})",
                    entry.index,
                    format_srt_time(entry.start_ms),
                    format_srt_time(entry.end_ms)
                )));
            }
        }

        debug!("Timeline repair adjusted {} of {} entries", adjusted, entries.len());
        Ok(SubtitleTrack::new(entries))
    }
}
