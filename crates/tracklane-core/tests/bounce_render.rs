use std::sync::Arc;

use approx::assert_abs_diff_eq;
use chrono::Utc;
use tempfile::tempdir;
use tracklane_core::{
    AudioEngine, BitDepth, BounceOptions, DecodedBuffer, DirectorySink, EngineConfig,
    ExportRequest, OfflineDevice, RenderError, Track, TransportState, bounce, decode_audio_file,
    parse_wav_header,
};

const RATE: u32 = 1_000;

fn constant(value: f32, seconds: f64) -> Arc<DecodedBuffer> {
    let frames = (seconds * f64::from(RATE)) as usize;
    Arc::new(DecodedBuffer::new(RATE, vec![vec![value; frames]]).expect("clip should build"))
}

#[test]
fn bounce_places_clips_by_beat_offset_and_mixes_gains() {
    let mut tracks: [Track; 3] = Default::default();
    tracks[0].assign("a", constant(0.25, 1.0));
    tracks[1].assign("b", constant(0.5, 1.0));
    tracks[1].set_offset_beats(1.0);
    tracks[1].set_fader(0.5);
    tracks[2].assign("c", constant(0.9, 1.0));
    tracks[2].muted = true;

    let rendered = bounce(&tracks, &TransportState::default(), &BounceOptions::default())
        .expect("bounce should succeed");

    assert_eq!(rendered.sample_rate(), RATE);
    assert_eq!(rendered.frames(), 1_500);
    let samples = rendered.channel(0).expect("mono mix");
    assert_abs_diff_eq!(samples[100], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(samples[700], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(samples[1_200], 0.25, epsilon = 1e-6);
}

#[test]
fn looped_bounce_repeats_the_loop_window() {
    let mut tracks: [Track; 3] = Default::default();
    tracks[0].assign("a", constant(0.5, 0.25));

    let mut state = TransportState::default();
    state.loop_enabled = true;
    state.loop_start = 0.0;
    state.loop_end = 1.0;

    let options = BounceOptions {
        loop_count: 3,
        ..BounceOptions::default()
    };
    let rendered = bounce(&tracks, &state, &options).expect("bounce should succeed");
    assert_eq!(rendered.frames(), 3_000);

    let samples = rendered.channel(0).expect("mono mix");
    for pass in 0..3 {
        let start = pass * 1_000;
        assert_abs_diff_eq!(samples[start + 100], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(samples[start + 500], 0.0, epsilon = 1e-6);
    }
}

#[test]
fn bounce_with_only_empty_tracks_fails() {
    let tracks: [Track; 3] = Default::default();
    assert_eq!(
        bounce(&tracks, &TransportState::default(), &BounceOptions::default()),
        Err(RenderError::NothingToRender)
    );
}

#[test]
fn engine_bounce_writes_wav_to_directory_sink() {
    let temp = tempdir().expect("tempdir should be creatable");
    let mut engine = AudioEngine::new(OfflineDevice::new(), &EngineConfig::default());
    engine.add_export_sink(DirectorySink::new(temp.path()));
    engine
        .assign_buffer(0, "kick", constant(0.5, 2.0))
        .expect("track index should be valid");
    engine.set_master_gain(0.5);

    let request = ExportRequest {
        fade_out_seconds: 0.5,
        ..ExportRequest::new(BitDepth::Pcm24, false)
    };
    let result = engine
        .bounce(&request, BounceOptions::default(), Utc::now())
        .expect("bounce should succeed");

    let path = temp.path().join("bounce.wav");
    assert!(path.is_file());
    let bytes = std::fs::read(&path).expect("bounce file should be readable");
    assert_eq!(bytes.as_slice(), &result.artifact.bytes[..]);

    let header = parse_wav_header(&bytes).expect("header should parse");
    assert_eq!(header.bits_per_sample, 24);
    assert_eq!(header.frames(), 2_000);

    let decoded = decode_audio_file(&path).expect("bounce should decode");
    let samples = decoded.channel(0).expect("mono bounce");
    assert_abs_diff_eq!(samples[100], 0.25, epsilon = 1e-4);
    assert_abs_diff_eq!(samples[1_999], 0.0, epsilon = 1e-6);
}
