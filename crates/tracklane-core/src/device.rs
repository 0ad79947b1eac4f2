use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    buffer::{BufferError, DecodedBuffer},
    model::{MAX_FADER_GAIN, TRACK_COUNT},
};

#[derive(Debug, Error, PartialEq)]
pub enum DeviceError {
    #[error("audio device failed to resume: {0}")]
    ResumeFailed(String),
    #[error("voice {0} was already stopped and cannot be reused")]
    VoiceReleased(VoiceId),
    #[error("unknown voice {0}")]
    UnknownVoice(VoiceId),
    #[error("track index {0} has no gain stage")]
    NoGainStage(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// One-shot playback of `buffer[offset, offset + duration)` starting at
/// device time `when`, routed through the gain stage of `track`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceRequest {
    pub track: usize,
    pub buffer: Arc<DecodedBuffer>,
    pub when: f64,
    pub offset: f64,
    pub duration: f64,
}

impl VoiceRequest {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.when + self.duration
    }
}

/// The audio clock plus the voice and gain primitives the transport needs.
///
/// Voices are single-use: once stopped they are gone and a new voice has to
/// be started in their place.
pub trait AudioDevice {
    /// Hardware clock in seconds. Monotonic.
    fn current_time(&self) -> f64;
    fn is_suspended(&self) -> bool;
    fn resume(&mut self) -> Result<(), DeviceError>;
    fn start_voice(&mut self, request: VoiceRequest) -> Result<VoiceId, DeviceError>;
    fn stop_voice(&mut self, voice: VoiceId) -> Result<(), DeviceError>;
    fn set_track_gain(&mut self, track: usize, gain: f32) -> Result<(), DeviceError>;
    fn set_master_gain(&mut self, gain: f32);
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceRecord {
    pub id: VoiceId,
    pub request: VoiceRequest,
    pub stopped_at: Option<f64>,
}

impl VoiceRecord {
    /// Device time at which this voice stops producing sound.
    #[must_use]
    pub fn audible_until(&self) -> f64 {
        let natural_end = self.request.end_time();
        self.stopped_at.map_or(natural_end, |stop| stop.min(natural_end))
    }

    #[must_use]
    pub fn is_sounding_at(&self, time: f64) -> bool {
        time >= self.request.when && time < self.audible_until()
    }
}

/// A device driven by a virtual clock.
///
/// Headless hosts and tests advance the clock by hand; the bounce path uses
/// `render` to mix every voice it was asked to play into a buffer.
#[derive(Debug, Clone)]
pub struct OfflineDevice {
    time: f64,
    suspended: bool,
    next_voice: u64,
    voices: Vec<VoiceRecord>,
    track_gains: [f32; TRACK_COUNT],
    master_gain: f32,
}

impl Default for OfflineDevice {
    fn default() -> Self {
        Self {
            time: 0.0,
            suspended: true,
            next_voice: 1,
            voices: Vec::new(),
            track_gains: [1.0; TRACK_COUNT],
            master_gain: 1.0,
        }
    }
}

impl OfflineDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose clock is already running.
    #[must_use]
    pub fn running() -> Self {
        Self {
            suspended: false,
            ..Self::default()
        }
    }

    pub fn advance(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 && !self.suspended {
            self.time += seconds;
        }
    }

    pub fn set_time(&mut self, time: f64) {
        if time.is_finite() && time >= self.time {
            self.time = time;
        }
    }

    #[must_use]
    pub fn voices(&self) -> &[VoiceRecord] {
        &self.voices
    }

    #[must_use]
    pub fn sounding_voices(&self, time: f64) -> usize {
        self.voices
            .iter()
            .filter(|voice| voice.is_sounding_at(time))
            .count()
    }

    #[must_use]
    pub fn track_gain(&self, track: usize) -> Option<f32> {
        self.track_gains.get(track).copied()
    }

    #[must_use]
    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Mixes every voice into `[0, duration)` of device time at `sample_rate`.
    ///
    /// Gain stages apply at their current values. Source material at a
    /// different rate is read at the nearest source frame.
    pub fn render(
        &self,
        sample_rate: u32,
        channel_count: u16,
        duration: f64,
    ) -> Result<DecodedBuffer, BufferError> {
        let rate = f64::from(sample_rate);
        let frames = if duration.is_finite() && duration > 0.0 {
            (duration * rate).ceil() as usize
        } else {
            0
        };
        let mut mix = vec![vec![0.0_f32; frames]; usize::from(channel_count)];

        for voice in &self.voices {
            let gain = self
                .track_gains
                .get(voice.request.track)
                .copied()
                .unwrap_or(0.0)
                * self.master_gain;
            if gain == 0.0 {
                continue;
            }

            let source = &voice.request.buffer;
            let source_rate = f64::from(source.sample_rate());
            let source_frames = source.frames();
            let start_frame = (voice.request.when * rate).round().max(0.0) as usize;
            let end_frame = ((voice.audible_until() * rate).round().max(0.0) as usize).min(frames);
            let source_start = voice.request.offset * source_rate;

            for frame in start_frame..end_frame {
                let elapsed = (frame - start_frame) as f64 / rate;
                let source_frame = (source_start + elapsed * source_rate).round() as usize;
                if source_frame >= source_frames {
                    break;
                }

                for (channel_index, out) in mix.iter_mut().enumerate() {
                    let source_channel = channel_index.min(usize::from(source.channel_count()) - 1);
                    if let Some(samples) = source.channel(source_channel) {
                        out[frame] += samples[source_frame] * gain;
                    }
                }
            }
        }

        debug!(
            frames,
            voices = self.voices.len(),
            sample_rate,
            "offline device render complete"
        );
        DecodedBuffer::new(sample_rate, mix)
    }
}

impl AudioDevice for OfflineDevice {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.suspended = false;
        Ok(())
    }

    fn start_voice(&mut self, request: VoiceRequest) -> Result<VoiceId, DeviceError> {
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        trace!(
            voice_id = %id,
            track = request.track,
            when = request.when,
            offset = request.offset,
            duration = request.duration,
            "voice started"
        );
        self.voices.push(VoiceRecord {
            id,
            request,
            stopped_at: None,
        });
        Ok(id)
    }

    fn stop_voice(&mut self, voice: VoiceId) -> Result<(), DeviceError> {
        let now = self.time;
        let record = self
            .voices
            .iter_mut()
            .find(|record| record.id == voice)
            .ok_or(DeviceError::UnknownVoice(voice))?;
        if record.stopped_at.is_some() {
            return Err(DeviceError::VoiceReleased(voice));
        }
        record.stopped_at = Some(now);
        trace!(voice_id = %voice, at = now, "voice stopped");
        Ok(())
    }

    fn set_track_gain(&mut self, track: usize, gain: f32) -> Result<(), DeviceError> {
        let stage = self
            .track_gains
            .get_mut(track)
            .ok_or(DeviceError::NoGainStage(track))?;
        *stage = gain;
        Ok(())
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, MAX_FADER_GAIN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f32, frames: usize) -> Arc<DecodedBuffer> {
        Arc::new(DecodedBuffer::new(10, vec![vec![value; frames]]).expect("valid buffer"))
    }

    #[test]
    fn voices_cannot_be_stopped_twice() {
        let mut device = OfflineDevice::running();
        let id = device
            .start_voice(VoiceRequest {
                track: 0,
                buffer: constant(0.5, 10),
                when: 0.0,
                offset: 0.0,
                duration: 1.0,
            })
            .expect("voice should start");

        device.stop_voice(id).expect("first stop should succeed");
        assert_eq!(device.stop_voice(id), Err(DeviceError::VoiceReleased(id)));
    }

    #[test]
    fn render_applies_track_and_master_gain() {
        let mut device = OfflineDevice::running();
        device
            .start_voice(VoiceRequest {
                track: 1,
                buffer: constant(0.5, 10),
                when: 0.2,
                offset: 0.0,
                duration: 0.5,
            })
            .expect("voice should start");
        device.set_track_gain(1, 0.5).expect("gain stage exists");
        device.set_master_gain(0.5);

        let rendered = device.render(10, 1, 1.0).expect("render should succeed");
        let samples = rendered.channel(0).expect("mono output");
        assert_eq!(samples[1], 0.0);
        assert_eq!(samples[2], 0.125);
        assert_eq!(samples[6], 0.125);
        assert_eq!(samples[7], 0.0);
    }

    #[test]
    fn suspended_clock_does_not_advance() {
        let mut device = OfflineDevice::new();
        device.advance(1.0);
        assert_eq!(device.current_time(), 0.0);
        device.resume().expect("resume should succeed");
        device.advance(1.0);
        assert_eq!(device.current_time(), 1.0);
    }
}
