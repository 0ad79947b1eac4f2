use thiserror::Error;

use crate::{buffer::DecodedBuffer, model::Track, time::beats_to_seconds};

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PlacementError {
    #[error("trim range [{start}, {end:?}) leaves no audio in a {duration}s buffer")]
    TrimRangeInvalid {
        start: f64,
        end: Option<f64>,
        duration: f64,
    },
}

/// Resolved `[start, end)` window into a clip buffer, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Timeline position of a clip placed `offset_beats` into the arrangement.
#[must_use]
pub fn placement_seconds(offset_beats: f64, bpm: f64) -> f64 {
    beats_to_seconds(offset_beats.max(0.0), bpm)
}

/// Clamps a trim request against the buffer.
///
/// `start` lands in `[0, duration)` and `end` in `(start, duration]`, with an
/// unset end meaning the full buffer. Anything that leaves no positive-length
/// window is `TrimRangeInvalid`.
pub fn resolve_trim(
    buffer: &DecodedBuffer,
    trim_start: f64,
    trim_end: Option<f64>,
) -> Result<TrimWindow, PlacementError> {
    let duration = buffer.duration_seconds();
    let invalid = PlacementError::TrimRangeInvalid {
        start: trim_start,
        end: trim_end,
        duration,
    };

    let start = if trim_start.is_finite() {
        trim_start.max(0.0)
    } else {
        0.0
    };
    if start >= duration {
        return Err(invalid);
    }

    let end = trim_end
        .filter(|value| value.is_finite())
        .map_or(duration, |value| value.min(duration));
    if end <= start {
        return Err(invalid);
    }

    Ok(TrimWindow { start, end })
}

/// Placement and trim for one track, or `None` when the track has nothing
/// playable.
#[must_use]
pub fn track_window(track: &Track, bpm: f64) -> Option<(f64, TrimWindow)> {
    let buffer = track.buffer.as_deref()?;
    let window = resolve_trim(buffer, track.trim_start, track.trim_end).ok()?;
    Some((placement_seconds(track.offset_beats, bpm), window))
}
