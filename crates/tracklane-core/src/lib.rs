pub mod buffer;
pub mod config;
pub mod decode;
pub mod device;
pub mod diagnostics;
pub mod engine;
pub mod export;
pub mod library;
pub mod mixer;
pub mod model;
pub mod persistence;
pub mod placement;
pub mod render;
pub mod time;
pub mod transport;
pub mod validate;
pub mod wav;

pub use buffer::{BufferError, DecodedBuffer};
pub use config::EngineConfig;
pub use decode::{DecodeError, LoadedSound, decode_audio_bytes, decode_audio_file, load_sound};
pub use device::{AudioDevice, DeviceError, OfflineDevice, VoiceId, VoiceRequest};
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use engine::{AudioEngine, EngineError};
pub use export::{
    ArtifactSink, DirectorySink, ExportArtifact, ExportError, ExportPipeline, ExportResult,
};
pub use library::{DirectoryLibrary, LibraryError, NewSound, SoundRecord, SoundSource};
pub use mixer::{resolve_gain, resolve_gains};
pub use model::{
    BitDepth, ExportRequest, LoopRegion, Region, TRACK_COUNT, Track, Tracks, TransportState,
};
pub use placement::{PlacementError, TrimWindow, resolve_trim};
pub use render::{BounceOptions, RenderError, bounce};
pub use transport::{PlayReport, PlayScope, SchedulerTiming, TickReport, Transport};
pub use validate::{
    EquivalenceValidator, SignalMetrics, ValidationOutcome, ValidationPolicy, ValidationReport,
};
pub use wav::{EncodeError, WavHeader, encode_wav, encode_wav_with_rng, parse_wav_header};
