use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,
    #[error("buffer must have at least one channel")]
    NoChannels,
    #[error("channel {channel} has {actual} frames, expected {expected}")]
    RaggedChannels {
        channel: usize,
        expected: usize,
        actual: usize,
    },
}

/// Decoded PCM audio, one `Vec<f32>` per channel.
///
/// Buffers are immutable once built. Tracks, voices and the validator share
/// them through `Arc<DecodedBuffer>`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, BufferError> {
        if sample_rate == 0 {
            return Err(BufferError::ZeroSampleRate);
        }
        let Some(first) = channels.first() else {
            return Err(BufferError::NoChannels);
        };

        let expected = first.len();
        if let Some((channel, data)) = channels
            .iter()
            .enumerate()
            .find(|(_, data)| data.len() != expected)
        {
            return Err(BufferError::RaggedChannels {
                channel,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn silent(sample_rate: u32, channel_count: u16, frames: usize) -> Result<Self, BufferError> {
        let channels = (0..channel_count).map(|_| vec![0.0; frames]).collect();
        Self::new(sample_rate, channels)
    }

    /// Splits interleaved samples into channels. Trailing samples that do not
    /// fill a whole frame are dropped.
    pub fn from_interleaved(
        sample_rate: u32,
        channel_count: u16,
        interleaved: &[f32],
    ) -> Result<Self, BufferError> {
        let count = usize::from(channel_count);
        if count == 0 {
            return Err(BufferError::NoChannels);
        }

        let frames = interleaved.len() / count;
        let mut channels = vec![Vec::with_capacity(frames); count];
        for frame in interleaved.chunks_exact(count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> u16 {
        u16::try_from(self.channels.len()).unwrap_or(u16::MAX)
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Copies `range` (in frames, clamped to the buffer) into a new buffer.
    #[must_use]
    pub fn slice_frames(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.frames());
        let start = range.start.min(end);
        Self {
            sample_rate: self.sample_rate,
            channels: self
                .channels
                .iter()
                .map(|channel| channel[start..end].to_vec())
                .collect(),
        }
    }

    pub(crate) fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}
