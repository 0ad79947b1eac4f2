#[must_use]
pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 || !beats.is_finite() {
        return 0.0;
    }

    beats * (60.0 / bpm)
}

#[must_use]
pub fn seconds_to_beats(seconds: f64, bpm: f64) -> f64 {
    if seconds <= 0.0 || bpm <= 0.0 {
        return 0.0;
    }

    seconds * (bpm / 60.0)
}

/// Frame index at `seconds`, rounded down. Negative and non-finite times map
/// to frame 0.
#[must_use]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).floor() as usize
}

#[must_use]
pub fn frames_to_seconds(frames: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    frames as f64 / f64::from(sample_rate)
}
