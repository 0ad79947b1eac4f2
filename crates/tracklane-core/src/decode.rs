use std::{
    collections::BTreeSet,
    fs,
    io::{Cursor, ErrorKind},
    path::Path,
    sync::Arc,
};

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    buffer::{BufferError, DecodedBuffer},
    wav::wav_sample_rate,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read audio file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("wav decode failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("audio decode failed: {0}")]
    Codec(#[from] SymphoniaError),
    #[error("no default audio track found")]
    NoTrack,
    #[error("audio stream reset required")]
    ResetRequired,
    #[error("decoded zero samples")]
    Empty,
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Result of loading a sound for the editor. A sound that cannot be decoded
/// is kept as raw bytes so it can still be offered for download.
#[derive(Debug, Clone)]
pub enum LoadedSound {
    Decoded {
        source_id: String,
        buffer: Arc<DecodedBuffer>,
    },
    Undecodable {
        source_id: String,
        original: Arc<[u8]>,
        reason: String,
    },
}

impl LoadedSound {
    #[must_use]
    pub fn source_id(&self) -> &str {
        match self {
            Self::Decoded { source_id, .. } | Self::Undecodable { source_id, .. } => source_id,
        }
    }

    #[must_use]
    pub fn buffer(&self) -> Option<&Arc<DecodedBuffer>> {
        match self {
            Self::Decoded { buffer, .. } => Some(buffer),
            Self::Undecodable { .. } => None,
        }
    }

    /// Zero for sounds that failed to decode.
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.buffer().map_or(0.0, |buffer| buffer.duration_seconds())
    }
}

/// Decodes `bytes`, recovering from failure instead of propagating it.
#[instrument(skip(bytes), fields(source_id = %source_id, bytes = bytes.len()))]
pub fn load_sound(source_id: &str, bytes: Vec<u8>, extension_hint: Option<&str>) -> LoadedSound {
    match decode_audio_bytes(&bytes, extension_hint) {
        Ok(buffer) => LoadedSound::Decoded {
            source_id: source_id.to_string(),
            buffer: Arc::new(buffer),
        },
        Err(error) => {
            warn!(%error, "sound could not be decoded, keeping original bytes");
            LoadedSound::Undecodable {
                source_id: source_id.to_string(),
                original: bytes.into(),
                reason: error.to_string(),
            }
        }
    }
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file(path: &Path) -> Result<DecodedBuffer, DecodeError> {
    let bytes = fs::read(path).map_err(|source| DecodeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let extension = path.extension().and_then(|value| value.to_str());
    decode_audio_bytes(&bytes, extension)
}

/// Decodes any supported container. WAV input keeps the sample rate written
/// in its `fmt ` chunk.
pub fn decode_audio_bytes(
    bytes: &[u8],
    extension_hint: Option<&str>,
) -> Result<DecodedBuffer, DecodeError> {
    if let Some(authored_rate) = wav_sample_rate(bytes) {
        match decode_wav_bytes(bytes) {
            Ok(buffer) => return Ok(buffer),
            Err(error) => {
                debug!(
                    authored_rate,
                    %error,
                    "hound rejected wav stream, retrying with symphonia"
                );
            }
        }
    }
    decode_with_symphonia(bytes, extension_hint)
}

pub fn decode_wav_bytes(bytes: &[u8]) -> Result<DecodedBuffer, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / full_scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    debug!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        samples = interleaved.len(),
        "wav decode complete"
    );
    Ok(DecodedBuffer::from_interleaved(
        spec.sample_rate,
        spec.channels,
        &interleaved,
    )?)
}

fn decode_with_symphonia(
    bytes: &[u8],
    extension_hint: Option<&str>,
) -> Result<DecodedBuffer, DecodeError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension_hint {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels = track
        .codec_params
        .channels
        .map_or(2, |value| value.count() as u16);
    let mut interleaved = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => return Err(DecodeError::ResetRequired),
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(error) => return Err(error.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buffer.samples());
    }

    if interleaved.is_empty() {
        return Err(DecodeError::Empty);
    }

    debug!(
        sample_rate,
        channels,
        samples = interleaved.len(),
        "audio decode complete"
    );
    Ok(DecodedBuffer::from_interleaved(
        sample_rate,
        channels,
        &interleaved,
    )?)
}

#[must_use]
pub fn supported_audio_extensions() -> BTreeSet<&'static str> {
    ["wav", "mp3", "ogg", "webm", "flac", "m4a", "aiff", "aif"]
        .into_iter()
        .collect()
}
