use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    buffer::DecodedBuffer,
    config::EngineConfig,
    decode::{LoadedSound, load_sound},
    device::{AudioDevice, DeviceError},
    export::{ArtifactSink, ExportArtifact, ExportError, ExportPipeline, ExportResult},
    library::{LibraryError, SoundSource},
    mixer::resolve_gains,
    model::{BitDepth, ExportRequest, MAX_FADER_GAIN, TRACK_COUNT, Track, Tracks, TransportState},
    placement::resolve_trim,
    render::{BounceOptions, RenderError, bounce},
    transport::{PlayReport, TickReport, Transport},
    validate::{EquivalenceValidator, ValidationOutcome},
};

pub const BOUNCE_SOURCE_ID: &str = "bounce";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("track index {0} is out of range")]
    TrackOutOfRange(usize),
    #[error("no undecodable original stored for {0}")]
    NoOriginal(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// One editing session: three track slots, the transport driving them, and
/// the export pipeline. Every method runs to completion on the caller's
/// thread; the host calls [`AudioEngine::tick`] once per frame.
pub struct AudioEngine<D: AudioDevice> {
    device: D,
    tracks: Tracks,
    transport: Transport,
    master_gain: f32,
    export: ExportPipeline,
    default_bit_depth: BitDepth,
    default_dither: bool,
    originals: BTreeMap<String, Arc<[u8]>>,
}

impl<D: AudioDevice> AudioEngine<D> {
    #[must_use]
    pub fn new(device: D, config: &EngineConfig) -> Self {
        let state = TransportState {
            bpm: config.transport.default_bpm,
            loop_start: config.transport.default_loop_start_seconds,
            loop_end: config.transport.default_loop_end_seconds,
            ..TransportState::default()
        };
        let mut engine = Self {
            device,
            tracks: Tracks::default(),
            transport: Transport::new(state, config.transport.timing()),
            master_gain: 1.0,
            export: ExportPipeline::new(EquivalenceValidator::new(config.validation)),
            default_bit_depth: config.export.default_bit_depth,
            default_dither: config.export.dither,
            originals: BTreeMap::new(),
        };
        engine.push_gains();
        engine
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn tracks(&self) -> &Tracks {
        &self.tracks
    }

    #[must_use]
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[must_use]
    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    #[must_use]
    pub fn validator(&self) -> &EquivalenceValidator {
        self.export.validator()
    }

    pub fn add_export_sink(&mut self, sink: impl ArtifactSink + Send + 'static) {
        self.export.add_sink(sink);
    }

    /// Export settings from config with no region and no fades.
    #[must_use]
    pub fn default_export_request(&self) -> ExportRequest {
        ExportRequest::new(self.default_bit_depth, self.default_dither)
    }

    #[instrument(skip(self, source_id, buffer), fields(track = index, source_id = %source_id.as_ref()))]
    pub fn assign_buffer(
        &mut self,
        index: usize,
        source_id: impl AsRef<str>,
        buffer: Arc<DecodedBuffer>,
    ) -> Result<(), EngineError> {
        let duration = buffer.duration_seconds();
        let source_id = source_id.as_ref();
        self.track_mut(index)?.assign(source_id, buffer);
        if self.originals.remove(source_id).is_some() {
            debug!("dropped stored original, source now decodes");
        }
        info!(duration, "clip assigned to track");
        Ok(())
    }

    /// Puts a loaded sound on a track. An undecodable sound leaves the slot
    /// empty and keeps its bytes for [`AudioEngine::export_original`].
    /// Returns whether the track now holds audio.
    pub fn load_sound(&mut self, index: usize, sound: LoadedSound) -> Result<bool, EngineError> {
        match sound {
            LoadedSound::Decoded { source_id, buffer } => {
                self.assign_buffer(index, source_id, buffer)?;
                Ok(true)
            }
            LoadedSound::Undecodable {
                source_id,
                original,
                reason,
            } => {
                self.track_mut(index)?.clear();
                warn!(track = index, source_id = %source_id, %reason, "track left empty");
                self.originals.insert(source_id, original);
                Ok(false)
            }
        }
    }

    /// Fetches sound `id` from `source`, decodes it, and loads it on a track.
    #[instrument(skip(self, source))]
    pub fn load_from_source(
        &mut self,
        index: usize,
        source: &impl SoundSource,
        id: u64,
    ) -> Result<bool, EngineError> {
        self.track_mut(index)?;
        let bytes = source.fetch(id)?;
        let sound = load_sound(&id.to_string(), bytes, None);
        self.load_sound(index, sound)
    }

    pub fn clear_track(&mut self, index: usize) -> Result<(), EngineError> {
        self.track_mut(index)?.clear();
        Ok(())
    }

    pub fn set_fader(&mut self, index: usize, gain: f32) -> Result<(), EngineError> {
        self.track_mut(index)?.set_fader(gain);
        self.push_gains();
        Ok(())
    }

    pub fn set_mute(&mut self, index: usize, muted: bool) -> Result<(), EngineError> {
        self.track_mut(index)?.muted = muted;
        self.push_gains();
        Ok(())
    }

    pub fn set_solo(&mut self, index: usize, solo: bool) -> Result<(), EngineError> {
        self.track_mut(index)?.solo = solo;
        self.push_gains();
        Ok(())
    }

    pub fn toggle_mute(&mut self, index: usize) -> Result<bool, EngineError> {
        let muted = !self.track_mut(index)?.muted;
        self.set_mute(index, muted)?;
        Ok(muted)
    }

    pub fn toggle_solo(&mut self, index: usize) -> Result<bool, EngineError> {
        let solo = !self.track_mut(index)?.solo;
        self.set_solo(index, solo)?;
        Ok(solo)
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = if gain.is_finite() {
            gain.clamp(0.0, MAX_FADER_GAIN)
        } else {
            1.0
        };
        self.device.set_master_gain(self.master_gain);
        debug!(master_gain = self.master_gain, "master gain updated");
    }

    /// Stores a trim window. An invalid window is kept as entered; the
    /// transport skips the track until it is fixed.
    pub fn set_trim(
        &mut self,
        index: usize,
        start: f64,
        end: Option<f64>,
    ) -> Result<(), EngineError> {
        let track = self.track_mut(index)?;
        track.set_trim(start, end);
        if let Some(buffer) = &track.buffer {
            if let Err(error) = resolve_trim(buffer, track.trim_start, track.trim_end) {
                debug!(track = index, %error, "trim window will be skipped at play");
            }
        }
        Ok(())
    }

    pub fn set_offset_beats(&mut self, index: usize, beats: f64) -> Result<(), EngineError> {
        self.track_mut(index)?.set_offset_beats(beats);
        Ok(())
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    pub fn set_loop(&mut self, loop_start: f64, loop_end: f64, loop_enabled: bool) -> bool {
        self.transport.set_loop(loop_start, loop_end, loop_enabled)
    }

    pub fn set_loop_enabled(&mut self, loop_enabled: bool) {
        self.transport.set_loop_enabled(loop_enabled);
    }

    pub fn play(&mut self) -> Result<PlayReport, EngineError> {
        Ok(self.transport.play(&mut self.device, &self.tracks)?)
    }

    pub fn play_track(&mut self, index: usize) -> Result<PlayReport, EngineError> {
        Ok(self
            .transport
            .play_track(&mut self.device, &self.tracks, index)?)
    }

    pub fn stop(&mut self) {
        self.transport.stop(&mut self.device);
    }

    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        Ok(self.transport.tick(&mut self.device, &self.tracks)?)
    }

    /// Marks `buffer` as the audio the user just previewed.
    pub fn arm_preview(
        &mut self,
        source_id: &str,
        buffer: Arc<DecodedBuffer>,
        now: DateTime<Utc>,
    ) -> Option<ValidationOutcome> {
        self.export
            .validator_mut()
            .arm_preview(source_id, buffer, now)
    }

    /// Preview of one track was paused or stopped.
    pub fn preview_stopped(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<ValidationOutcome>, EngineError> {
        let track = self.tracks.get(index).ok_or(EngineError::TrackOutOfRange(index))?;
        let Some(buffer) = track.buffer.clone() else {
            return Ok(None);
        };
        let source_id = track
            .source_id
            .clone()
            .unwrap_or_else(|| format!("track-{index}"));
        Ok(self.arm_preview(&source_id, buffer, now))
    }

    /// Exports the decoded clip on one track.
    pub fn export_track(
        &mut self,
        index: usize,
        request: &ExportRequest,
        now: DateTime<Utc>,
    ) -> Result<ExportResult, EngineError> {
        let track = self.tracks.get(index).ok_or(EngineError::TrackOutOfRange(index))?;
        let source_id = track
            .source_id
            .clone()
            .unwrap_or_else(|| format!("track-{index}"));
        let buffer = track.buffer.clone();
        Ok(self
            .export
            .export(&source_id, buffer.as_deref(), request, now)?)
    }

    /// Offers the raw bytes of a sound that failed to decode.
    pub fn export_original(
        &mut self,
        source_id: &str,
        file_name: &str,
        media_type: &str,
    ) -> Result<ExportArtifact, EngineError> {
        let original = self
            .originals
            .get(source_id)
            .cloned()
            .ok_or_else(|| EngineError::NoOriginal(source_id.to_string()))?;
        Ok(self.export.offer_original(file_name, media_type, &original)?)
    }

    /// Renders the full arrangement offline and exports it.
    #[instrument(skip(self, request, options))]
    pub fn bounce(
        &mut self,
        request: &ExportRequest,
        options: BounceOptions,
        now: DateTime<Utc>,
    ) -> Result<ExportResult, EngineError> {
        let options = BounceOptions {
            master_gain: self.master_gain,
            ..options
        };
        let rendered = bounce(&self.tracks, self.transport.state(), &options)?;
        Ok(self
            .export
            .export(BOUNCE_SOURCE_ID, Some(&rendered), request, now)?)
    }

    fn track_mut(&mut self, index: usize) -> Result<&mut Track, EngineError> {
        self.tracks
            .get_mut(index)
            .ok_or(EngineError::TrackOutOfRange(index))
    }

    /// Applies resolved gains to the device's gain stages. Never touches
    /// voices, so a mix change mid-playback starts nothing new.
    fn push_gains(&mut self) {
        let gains = resolve_gains(&self.tracks);
        for (index, gain) in gains.into_iter().enumerate() {
            if let Err(error) = self.device.set_track_gain(index, gain) {
                warn!(track = index, %error, "gain stage rejected update");
            }
        }
        debug!(?gains, tracks = TRACK_COUNT, "track gains applied");
    }
}
