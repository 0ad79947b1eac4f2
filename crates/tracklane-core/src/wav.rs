//! RIFF/WAVE encoding and header inspection.
//!
//! Output is always a canonical 44-byte header (`RIFF`, a 16-byte `fmt `
//! chunk, `data`) followed by interleaved little-endian frames.

use std::ops::Range;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    buffer::DecodedBuffer,
    model::{BitDepth, ExportRequest, Region},
    time::seconds_to_frames,
};

pub const WAV_MEDIA_TYPE: &str = "audio/wav";
pub const WAV_HEADER_BYTES: usize = 44;

const FMT_CHUNK_BYTES: u32 = 16;
const PCM16_FULL_SCALE: f32 = 32_767.0;
const PCM24_FULL_SCALE: f32 = 8_388_607.0;

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("export region [{start}s, {end}s) selects no frames")]
    EmptyRegion { start: f64, end: f64 },
    #[error("{0} bytes of audio data do not fit in a RIFF container")]
    DataTooLarge(u64),
    #[error("{0} channels do not fit in a WAV block")]
    TooManyChannels(u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("not a RIFF/WAVE stream")]
    NotRiffWave,
    #[error("missing `{0}` chunk")]
    MissingChunk(&'static str),
    #[error("`fmt ` chunk is {0} bytes, expected at least 16")]
    ShortFormatChunk(u32),
}

/// Fields of a parsed `fmt ` chunk plus the location of the sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub riff_size: u32,
    pub data_offset: usize,
    pub data_bytes: u32,
}

impl WavHeader {
    #[must_use]
    pub fn frames(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        u64::from(self.data_bytes) / u64::from(self.block_align)
    }
}

/// Encodes `buffer` as requested, seeding dither from the thread RNG.
pub fn encode_wav(buffer: &DecodedBuffer, request: &ExportRequest) -> Result<Vec<u8>, EncodeError> {
    let mut rng = fastrand::Rng::new();
    encode_wav_with_rng(buffer, request, &mut rng)
}

/// Encodes `buffer`, drawing dither noise from `rng`.
#[instrument(skip(buffer, request, rng), fields(
    bit_depth = ?request.bit_depth,
    dither = request.dither_active(),
    channels = buffer.channel_count(),
    sample_rate = buffer.sample_rate(),
))]
pub fn encode_wav_with_rng(
    buffer: &DecodedBuffer,
    request: &ExportRequest,
    rng: &mut fastrand::Rng,
) -> Result<Vec<u8>, EncodeError> {
    let frames = export_frames(buffer, request.active_region())?;
    let depth = request.bit_depth;
    let channel_count = buffer.channel_count();
    let block_align = channel_count
        .checked_mul(depth.bytes_per_sample())
        .ok_or(EncodeError::TooManyChannels(channel_count))?;

    let data_len = frames.len() as u64 * u64::from(block_align);
    let data_bytes = u32::try_from(data_len)
        .ok()
        .filter(|bytes| bytes.checked_add(36).is_some())
        .ok_or(EncodeError::DataTooLarge(data_len))?;

    let mut out = Vec::with_capacity(WAV_HEADER_BYTES + data_bytes as usize);
    write_header(
        &mut out,
        depth,
        channel_count,
        buffer.sample_rate(),
        block_align,
        data_bytes,
    );

    let channels: Vec<&[f32]> = buffer.channels().collect();
    let dither = request.dither_active();
    for frame in frames.clone() {
        for channel in &channels {
            let sample = channel[frame];
            match depth {
                BitDepth::Pcm16 => {
                    let noise = if dither { tpdf_lsb(rng) } else { 0.0 };
                    let value = quantize(sample, PCM16_FULL_SCALE, noise) as i16;
                    out.extend_from_slice(&value.to_le_bytes());
                }
                BitDepth::Pcm24 => {
                    let value = quantize(sample, PCM24_FULL_SCALE, 0.0);
                    out.extend_from_slice(&value.to_le_bytes()[..3]);
                }
                BitDepth::Float32 => out.extend_from_slice(&sample.to_le_bytes()),
            }
        }
    }

    debug!(
        frames = frames.len(),
        bytes = out.len(),
        "wav encode complete"
    );
    Ok(out)
}

/// Frame range an export covers. One region slices the buffer; anything
/// else exports it whole.
pub fn export_frames(
    buffer: &DecodedBuffer,
    region: Option<Region>,
) -> Result<Range<usize>, EncodeError> {
    let total = buffer.frames();
    let Some(region) = region else {
        return Ok(0..total);
    };

    let rate = buffer.sample_rate();
    let start = seconds_to_frames(region.start, rate).min(total);
    let end = seconds_to_frames(region.end, rate).min(total);
    if end <= start {
        return Err(EncodeError::EmptyRegion {
            start: region.start,
            end: region.end,
        });
    }
    Ok(start..end)
}

/// Sample rate recorded in the `fmt ` chunk, if `bytes` is a RIFF/WAVE
/// stream that has one.
#[must_use]
pub fn wav_sample_rate(bytes: &[u8]) -> Option<u32> {
    let header = parse_format(bytes).ok()?;
    (header.sample_rate > 0).then_some(header.sample_rate)
}

/// Parses the `fmt ` and `data` chunk headers without touching samples.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavHeader, WavError> {
    let mut header = parse_format(bytes)?;
    let (data_offset, data_bytes) =
        find_chunk(bytes, b"data").ok_or(WavError::MissingChunk("data"))?;
    header.data_offset = data_offset;
    header.data_bytes = data_bytes;
    Ok(header)
}

fn parse_format(bytes: &[u8]) -> Result<WavHeader, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotRiffWave);
    }

    let (offset, size) = find_chunk(bytes, b"fmt ").ok_or(WavError::MissingChunk("fmt "))?;
    if size < FMT_CHUNK_BYTES || offset + 16 > bytes.len() {
        return Err(WavError::ShortFormatChunk(size));
    }

    let fmt = &bytes[offset..offset + 16];
    Ok(WavHeader {
        format_tag: u16_at(fmt, 0),
        channels: u16_at(fmt, 2),
        sample_rate: u32_at(fmt, 4),
        byte_rate: u32_at(fmt, 8),
        block_align: u16_at(fmt, 12),
        bits_per_sample: u16_at(fmt, 14),
        riff_size: u32_at(bytes, 4),
        data_offset: 0,
        data_bytes: 0,
    })
}

/// Walks RIFF chunks from offset 12 and returns `(payload offset, size)` of
/// the first chunk named `id`. Chunks are padded to even sizes.
fn find_chunk(bytes: &[u8], id: &[u8; 4]) -> Option<(usize, u32)> {
    let mut offset = 12_usize;
    while offset + 8 <= bytes.len() {
        let size = u32_at(bytes, offset + 4);
        let payload = offset + 8;
        if &bytes[offset..offset + 4] == id {
            return Some((payload, size));
        }
        let padded = size as usize + (size as usize % 2);
        offset = payload.checked_add(padded)?;
    }
    None
}

fn write_header(
    out: &mut Vec<u8>,
    depth: BitDepth,
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    data_bytes: u32,
) {
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_bytes).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_BYTES.to_le_bytes());
    out.extend_from_slice(&depth.format_tag().to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&sample_rate.wrapping_mul(u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&depth.bits_per_sample().to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_bytes.to_le_bytes());
}

/// Triangular noise in LSB units: difference of two uniform draws, each
/// spanning half an LSB, for a peak-to-peak span of one LSB.
fn tpdf_lsb(rng: &mut fastrand::Rng) -> f32 {
    (rng.f32() - rng.f32()) * 0.5
}

fn quantize(sample: f32, full_scale: f32, noise_lsb: f32) -> i32 {
    let value = (sample + noise_lsb / full_scale).clamp(-1.0, 1.0);
    (value * full_scale).round() as i32
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
