use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    buffer::{BufferError, DecodedBuffer},
    device::{AudioDevice, DeviceError, OfflineDevice},
    mixer::resolve_gains,
    model::{Tracks, TransportState},
    time::seconds_to_frames,
    transport::{SchedulerTiming, Transport},
};

/// Clock step used while driving loop continuations offline.
const RENDER_TICK_SECONDS: f64 = 0.02;

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("no track has audio to render")]
    NothingToRender,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BounceOptions {
    /// How many passes of the loop to render when looping is enabled.
    pub loop_count: u32,
    pub master_gain: f32,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
}

impl Default for BounceOptions {
    fn default() -> Self {
        Self {
            loop_count: 1,
            master_gain: 1.0,
            fade_in_seconds: 0.0,
            fade_out_seconds: 0.0,
        }
    }
}

/// Renders the arrangement the way the transport would play it.
///
/// The run starts at device time zero. Without a loop it lasts until the
/// last clip ends; with a loop it covers `loop_count` passes of the loop
/// window. Output uses the rate of the first loaded clip and the widest
/// channel layout among the loaded clips.
#[instrument(skip(tracks, state), fields(bpm = state.bpm, loop_enabled = state.loop_enabled))]
pub fn bounce(
    tracks: &Tracks,
    state: &TransportState,
    options: &BounceOptions,
) -> Result<DecodedBuffer, RenderError> {
    let loaded = tracks.iter().filter_map(|track| track.buffer.as_ref());
    let mut sample_rate = None;
    let mut channel_count = 0_u16;
    for buffer in loaded {
        sample_rate.get_or_insert(buffer.sample_rate());
        channel_count = channel_count.max(buffer.channel_count());
    }
    let sample_rate = sample_rate.ok_or(RenderError::NothingToRender)?;

    let mut device = OfflineDevice::running();
    for (index, gain) in resolve_gains(tracks).into_iter().enumerate() {
        device.set_track_gain(index, gain)?;
    }
    device.set_master_gain(options.master_gain);

    let timing = SchedulerTiming {
        lookahead_seconds: 0.0,
        ..SchedulerTiming::default()
    };
    let mut transport = Transport::new(state.clone(), timing);
    let report = transport.play(&mut device, tracks)?;

    let duration = match state.loop_region() {
        Some(region) => {
            let total = region.duration() * f64::from(options.loop_count.max(1));
            let mut now = 0.0;
            while now < total {
                now = (now + RENDER_TICK_SECONDS).min(total);
                device.set_time(now);
                transport.tick(&mut device, tracks)?;
            }
            transport.stop(&mut device);
            total
        }
        None => transport
            .scheduled_end()
            .ok_or(RenderError::NothingToRender)?,
    };

    let mixed = device.render(sample_rate, channel_count.max(1), duration)?;
    let rendered = apply_fades(mixed, options.fade_in_seconds, options.fade_out_seconds)?;
    info!(
        sample_rate,
        channels = rendered.channel_count(),
        frames = rendered.frames(),
        voices = device.voices().len(),
        started = report.started,
        skipped = report.skipped,
        "bounce rendered"
    );
    Ok(rendered)
}

/// Linear fade-in from the first frame and fade-out into the last frame.
/// Fades longer than the buffer are clipped to it.
pub fn apply_fades(
    buffer: DecodedBuffer,
    fade_in_seconds: f64,
    fade_out_seconds: f64,
) -> Result<DecodedBuffer, BufferError> {
    let sample_rate = buffer.sample_rate();
    let frames = buffer.frames();
    let fade_in = seconds_to_frames(fade_in_seconds, sample_rate).min(frames);
    let fade_out = seconds_to_frames(fade_out_seconds, sample_rate).min(frames);
    if fade_in == 0 && fade_out == 0 {
        return Ok(buffer);
    }

    let mut channels = buffer.into_channels();
    for samples in &mut channels {
        for (frame, sample) in samples.iter_mut().enumerate().take(fade_in) {
            *sample *= frame as f32 / fade_in as f32;
        }
        let fade_out_start = frames - fade_out;
        for (frame, sample) in samples.iter_mut().enumerate().skip(fade_out_start) {
            *sample *= (frames - frame - 1) as f32 / fade_out as f32;
        }
    }

    debug!(fade_in, fade_out, frames, "fades applied");
    DecodedBuffer::new(sample_rate, channels)
}
