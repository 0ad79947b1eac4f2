use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::DecodedBuffer;

pub const TRACK_COUNT: usize = 3;
pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_FADER_GAIN: f32 = 1.0;
pub const MAX_FADER_GAIN: f32 = 2.0;
pub const DEFAULT_LOOP_END_SECONDS: f64 = 2.0;
pub const MIN_BPM: f64 = 1.0;

pub type Tracks = [Track; TRACK_COUNT];

/// One timeline slot. The slot owns its mix controls; the clip buffer is
/// shared with whoever decoded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub source_id: Option<String>,
    pub buffer: Option<Arc<DecodedBuffer>>,
    pub trim_start: f64,
    pub trim_end: Option<f64>,
    pub offset_beats: f64,
    pub fader: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            source_id: None,
            buffer: None,
            trim_start: 0.0,
            trim_end: None,
            offset_beats: 0.0,
            fader: DEFAULT_FADER_GAIN,
            muted: false,
            solo: false,
        }
    }
}

impl Track {
    /// Puts a new clip in the slot. Trim and offset go back to defaults,
    /// fader/mute/solo stay with the slot.
    pub fn assign(&mut self, source_id: impl Into<String>, buffer: Arc<DecodedBuffer>) {
        self.source_id = Some(source_id.into());
        self.buffer = Some(buffer);
        self.trim_start = 0.0;
        self.trim_end = None;
        self.offset_beats = 0.0;
    }

    pub fn clear(&mut self) {
        self.source_id = None;
        self.buffer = None;
        self.trim_start = 0.0;
        self.trim_end = None;
        self.offset_beats = 0.0;
    }

    pub fn set_fader(&mut self, gain: f32) {
        self.fader = if gain.is_finite() {
            gain.clamp(0.0, MAX_FADER_GAIN)
        } else {
            DEFAULT_FADER_GAIN
        };
    }

    pub fn set_trim(&mut self, start: f64, end: Option<f64>) {
        self.trim_start = if start.is_finite() { start.max(0.0) } else { 0.0 };
        self.trim_end = end.filter(|value| value.is_finite());
    }

    pub fn set_offset_beats(&mut self, beats: f64) {
        self.offset_beats = if beats.is_finite() { beats.max(0.0) } else { 0.0 };
    }

    #[must_use]
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportState {
    pub bpm: f64,
    pub loop_enabled: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub transport_time: f64,
    pub running: bool,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            loop_enabled: false,
            loop_start: 0.0,
            loop_end: DEFAULT_LOOP_END_SECONDS,
            transport_time: 0.0,
            running: false,
        }
    }
}

impl TransportState {
    /// The loop window currently requested, if looping is on and the window
    /// has positive length.
    #[must_use]
    pub fn loop_region(&self) -> Option<LoopRegion> {
        if !self.loop_enabled {
            return None;
        }
        LoopRegion::new(self.loop_start, self.loop_end)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

impl LoopRegion {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Option<Self> {
        let valid = start.is_finite() && end.is_finite() && start >= 0.0 && end > start;
        valid.then_some(Self { start, end })
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A user-selected export range in seconds, `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub start: f64,
    pub end: f64,
}

impl Region {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    #[default]
    Pcm16,
    Pcm24,
    Float32,
}

impl BitDepth {
    #[must_use]
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Pcm24 => 24,
            Self::Float32 => 32,
        }
    }

    #[must_use]
    pub const fn bytes_per_sample(self) -> u16 {
        self.bits_per_sample() / 8
    }

    /// `fmt ` chunk format tag: 1 = integer PCM, 3 = IEEE float.
    #[must_use]
    pub const fn format_tag(self) -> u16 {
        match self {
            Self::Pcm16 | Self::Pcm24 => 1,
            Self::Float32 => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportRequest {
    pub bit_depth: BitDepth,
    pub dither: bool,
    pub regions: Vec<Region>,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::Pcm16,
            dither: true,
            regions: Vec::new(),
            fade_in_seconds: 0.0,
            fade_out_seconds: 0.0,
        }
    }
}

impl ExportRequest {
    #[must_use]
    pub fn new(bit_depth: BitDepth, dither: bool) -> Self {
        Self {
            bit_depth,
            dither,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// The region that scopes the export. Zero or several selected regions
    /// mean the whole buffer.
    #[must_use]
    pub fn active_region(&self) -> Option<Region> {
        match self.regions.as_slice() {
            [region] => Some(*region),
            _ => None,
        }
    }

    /// Dither only ever applies to 16-bit output.
    #[must_use]
    pub fn dither_active(&self) -> bool {
        self.dither && self.bit_depth == BitDepth::Pcm16
    }

    #[must_use]
    pub fn has_fades(&self) -> bool {
        self.fade_in_seconds > 0.0 || self.fade_out_seconds > 0.0
    }
}
