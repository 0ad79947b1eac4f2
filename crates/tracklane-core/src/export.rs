//! Export pipeline: render the request into WAV bytes, hand the artifact to
//! every sink, then offer it to the equivalence validator.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    buffer::{BufferError, DecodedBuffer},
    model::ExportRequest,
    persistence::{sanitize_file_stem, write_atomic},
    render::apply_fades,
    validate::{EquivalenceValidator, ValidationOutcome, hash_hex},
    wav::{EncodeError, WAV_MEDIA_TYPE, encode_wav, export_frames},
};

type SinkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no decoded audio is available to export")]
    BufferUnavailable,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("export sink `{sink}` failed: {source}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },
}

/// Bytes produced by one export, ready to be downloaded or stored.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Arc<[u8]>,
    pub sha256: String,
}

impl fmt::Debug for ExportArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportArtifact")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("bytes", &self.bytes.len())
            .field("sha256", &self.sha256)
            .finish()
    }
}

impl ExportArtifact {
    #[must_use]
    pub fn new(file_name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let sha256 = hash_hex(&bytes);
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
            sha256,
        }
    }

    #[must_use]
    pub fn is_wav(&self) -> bool {
        self.media_type.eq_ignore_ascii_case(WAV_MEDIA_TYPE)
    }
}

/// Somewhere an export is delivered to: a downloads folder, an upload
/// queue, an in-memory collector.
pub trait ArtifactSink {
    fn name(&self) -> &str;
    fn deliver(&mut self, artifact: &ExportArtifact) -> Result<(), SinkError>;
}

/// Writes each artifact into a directory, replacing files with the same name.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ArtifactSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    fn deliver(&mut self, artifact: &ExportArtifact) -> Result<(), SinkError> {
        let path = self.dir.join(&artifact.file_name);
        write_atomic(&path, &artifact.bytes)?;
        self.written.push(path);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub artifact: ExportArtifact,
    /// Set when this export completed a preview/export pair.
    pub validation: Option<ValidationOutcome>,
}

pub struct ExportPipeline {
    sinks: Vec<Box<dyn ArtifactSink + Send>>,
    validator: EquivalenceValidator,
}

impl fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportPipeline")
            .field(
                "sinks",
                &self.sinks.iter().map(|sink| sink.name()).collect::<Vec<_>>(),
            )
            .field("validator", &self.validator)
            .finish()
    }
}

impl ExportPipeline {
    #[must_use]
    pub fn new(validator: EquivalenceValidator) -> Self {
        Self {
            sinks: Vec::new(),
            validator,
        }
    }

    pub fn add_sink(&mut self, sink: impl ArtifactSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    #[must_use]
    pub fn validator(&self) -> &EquivalenceValidator {
        &self.validator
    }

    pub fn validator_mut(&mut self) -> &mut EquivalenceValidator {
        &mut self.validator
    }

    /// Encodes `buffer`, delivers the artifact, then lets the validator see it.
    ///
    /// A failure leaves the pipeline ready for the next export; nothing is
    /// delivered or captured for a failed encode.
    #[instrument(skip(self, buffer, request), fields(
        source_id = %source_id,
        bit_depth = ?request.bit_depth,
        regions = request.regions.len(),
    ))]
    pub fn export(
        &mut self,
        source_id: &str,
        buffer: Option<&DecodedBuffer>,
        request: &ExportRequest,
        now: DateTime<Utc>,
    ) -> Result<ExportResult, ExportError> {
        let buffer = buffer.ok_or(ExportError::BufferUnavailable)?;
        let bytes = encode_request(buffer, request)?;
        let file_name = format!("{}.wav", sanitize_file_stem(source_id));
        let artifact = ExportArtifact::new(file_name, WAV_MEDIA_TYPE, bytes);

        self.deliver(&artifact)?;
        let validation = self.validator.capture_export(&artifact, now);
        info!(
            file_name = %artifact.file_name,
            bytes = artifact.bytes.len(),
            sha256 = %artifact.sha256,
            validated = validation.is_some(),
            "export complete"
        );
        Ok(ExportResult {
            artifact,
            validation,
        })
    }

    /// Delivers the untouched source bytes of a sound that could not be
    /// decoded. The validator never sees these.
    #[instrument(skip(self, original), fields(file_name = %file_name, bytes = original.len()))]
    pub fn offer_original(
        &mut self,
        file_name: &str,
        media_type: &str,
        original: &[u8],
    ) -> Result<ExportArtifact, ExportError> {
        let artifact = ExportArtifact::new(file_name, media_type, original.to_vec());
        self.deliver(&artifact)?;
        info!(sha256 = %artifact.sha256, "original file offered for download");
        Ok(artifact)
    }

    fn deliver(&mut self, artifact: &ExportArtifact) -> Result<(), ExportError> {
        for sink in &mut self.sinks {
            if let Err(source) = sink.deliver(artifact) {
                warn!(sink = sink.name(), error = %source, "export sink failed");
                return Err(ExportError::Sink {
                    sink: sink.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }
}

/// Encodes `buffer` per `request`. Fades apply to the exported region, so
/// the region is cut out before fading.
pub fn encode_request(
    buffer: &DecodedBuffer,
    request: &ExportRequest,
) -> Result<Vec<u8>, ExportError> {
    if !request.has_fades() {
        return Ok(encode_wav(buffer, request)?);
    }

    let frames = export_frames(buffer, request.active_region())?;
    let sliced = buffer.slice_frames(frames);
    let faded = apply_fades(sliced, request.fade_in_seconds, request.fade_out_seconds)?;
    let whole = ExportRequest {
        regions: Vec::new(),
        ..request.clone()
    };
    Ok(encode_wav(&faded, &whole)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::BitDepth, validate::ValidationPolicy, wav::parse_wav_header};

    struct FlakySink {
        failures_left: usize,
    }

    impl ArtifactSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn deliver(&mut self, _artifact: &ExportArtifact) -> Result<(), SinkError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err("disk full".into());
            }
            Ok(())
        }
    }

    fn tone() -> DecodedBuffer {
        DecodedBuffer::new(100, vec![vec![0.5; 100]]).expect("valid buffer")
    }

    #[test]
    fn missing_buffer_is_reported() {
        let mut pipeline = ExportPipeline::new(EquivalenceValidator::default());
        let error = pipeline
            .export("empty", None, &ExportRequest::default(), Utc::now())
            .expect_err("export without a buffer should fail");
        assert!(matches!(error, ExportError::BufferUnavailable));
    }

    #[test]
    fn fades_apply_inside_the_region() {
        let request = ExportRequest {
            fade_in_seconds: 0.1,
            ..ExportRequest::new(BitDepth::Float32, false)
        }
        .with_region(crate::model::Region::new(0.2, 0.6));
        let bytes = encode_request(&tone(), &request).expect("encode should succeed");
        let header = parse_wav_header(&bytes).expect("header should parse");
        assert_eq!(header.frames(), 40);

        let first = f32::from_le_bytes(bytes[44..48].try_into().expect("4 bytes"));
        assert_eq!(first, 0.0);
    }

    #[test]
    fn failing_sink_does_not_poison_later_exports() {
        let mut pipeline = ExportPipeline::new(EquivalenceValidator::new(ValidationPolicy::default()));
        pipeline.add_sink(FlakySink {
            failures_left: 1,
        });
        let buffer = tone();
        let first = pipeline.export("clip", Some(&buffer), &ExportRequest::default(), Utc::now());
        assert!(matches!(first, Err(ExportError::Sink { .. })));
        assert!(pipeline.validator().captured_export().is_none());

        let second = pipeline
            .export("clip", Some(&buffer), &ExportRequest::default(), Utc::now())
            .expect("export should succeed");
        assert_eq!(second.artifact.file_name, "clip.wav");
        assert!(second.artifact.is_wav());
        assert!(pipeline.validator().captured_export().is_some());
    }
}
