use std::sync::Arc;

use approx::assert_abs_diff_eq;
use tracklane_core::{
    AudioDevice, AudioEngine, DecodedBuffer, EngineConfig, OfflineDevice, PlayScope,
    SchedulerTiming, Track, Tracks, Transport, TransportState,
};

const RATE: u32 = 1_000;
const FRAME: f64 = 1.0 / 60.0;

fn clip(seconds: f64) -> Arc<DecodedBuffer> {
    let frames = (seconds * f64::from(RATE)) as usize;
    Arc::new(DecodedBuffer::new(RATE, vec![vec![0.5; frames]]).expect("clip should build"))
}

fn loaded_tracks(lengths: &[f64]) -> Tracks {
    std::array::from_fn(|index| {
        let mut track = Track::default();
        if let Some(seconds) = lengths.get(index) {
            track.assign(format!("clip-{index}"), clip(*seconds));
        }
        track
    })
}

fn looping_transport(start: f64, end: f64) -> Transport {
    let mut transport = Transport::new(TransportState::default(), SchedulerTiming::default());
    assert!(transport.set_loop(start, end, true));
    transport
}

fn run_for(transport: &mut Transport, device: &mut OfflineDevice, tracks: &Tracks, seconds: f64) {
    let until = device.current_time() + seconds;
    while device.current_time() < until {
        device.advance(FRAME);
        transport
            .tick(device, tracks)
            .expect("tick should succeed");
    }
}

#[test]
fn loop_iterations_are_spaced_by_exact_loop_length() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::new();
    let mut transport = looping_transport(0.0, 2.0);

    let report = transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    assert_eq!(report.started, 1);
    assert!(!device.is_suspended());
    assert_abs_diff_eq!(transport.base_time(), 0.05, epsilon = 1e-12);

    run_for(&mut transport, &mut device, &tracks, 9.0);

    let starts: Vec<f64> = transport
        .loop_iterations()
        .iter()
        .map(|iteration| iteration.start)
        .collect();
    assert!(starts.len() >= 4, "expected several iterations, got {starts:?}");
    for (index, pair) in starts.windows(2).enumerate() {
        assert_abs_diff_eq!(pair[1] - pair[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pair[1], 0.05 + 2.0 * (index + 1) as f64, epsilon = 1e-9);
    }

    for voice in device.voices() {
        assert_abs_diff_eq!(voice.request.duration, 2.0, epsilon = 1e-12);
        assert_eq!(voice.request.offset, 0.0);
    }
}

#[test]
fn clip_placed_inside_loop_starts_at_its_offset_each_pass() {
    let mut tracks = loaded_tracks(&[0.5]);
    tracks[0].set_offset_beats(2.0);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 2.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    run_for(&mut transport, &mut device, &tracks, 4.2);

    let whens: Vec<f64> = device.voices().iter().map(|voice| voice.request.when).collect();
    assert!(whens.len() >= 2);
    assert_abs_diff_eq!(whens[0], 0.05 + 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(whens[1], 0.05 + 3.0, epsilon = 1e-9);
}

#[test]
fn continuation_fired_after_stop_starts_nothing() {
    let tracks = loaded_tracks(&[4.0, 4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 1.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    let token = transport
        .pending_continuation()
        .expect("looping run should have a continuation");

    transport.stop(&mut device);
    let voices_after_stop = device.voices().len();

    let ran = transport
        .run_continuation(&mut device, &tracks, token)
        .expect("stale continuation should not error");
    assert!(!ran);
    assert_eq!(device.voices().len(), voices_after_stop);

    run_for(&mut transport, &mut device, &tracks, 3.0);
    assert_eq!(device.voices().len(), voices_after_stop);
    assert_eq!(device.sounding_voices(device.current_time()), 0);
}

#[test]
fn restarted_run_invalidates_old_continuation() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 1.0);

    transport
        .play(&mut device, &tracks)
        .expect("first play should succeed");
    let stale = transport
        .pending_continuation()
        .expect("continuation should exist");
    transport
        .play(&mut device, &tracks)
        .expect("second play should succeed");

    assert_ne!(transport.pending_continuation(), Some(stale));
    let ran = transport
        .run_continuation(&mut device, &tracks, stale)
        .expect("stale continuation should not error");
    assert!(!ran);
}

#[test]
fn stop_is_idempotent_and_resets_transport() {
    let tracks = loaded_tracks(&[4.0, 4.0, 4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 2.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    run_for(&mut transport, &mut device, &tracks, 0.5);
    assert!(transport.state().transport_time > 0.0);

    transport.stop(&mut device);
    transport.stop(&mut device);

    assert!(!transport.is_playing());
    assert_eq!(transport.state().transport_time, 0.0);
    assert!(transport.active_voices().is_empty());
    assert!(transport.loop_iterations().is_empty());
    assert!(transport.pending_continuation().is_none());
    assert!(device.voices().iter().all(|voice| voice.stopped_at.is_some()));
}

#[test]
fn track_scope_covers_loop_iterations_and_blocks_transport_play() {
    let tracks = loaded_tracks(&[4.0, 4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 1.0);

    let report = transport
        .play_track(&mut device, &tracks, 1)
        .expect("track play should succeed");
    assert_eq!(report.started, 1);
    assert_eq!(transport.scope(), Some(PlayScope::Track(1)));

    let ignored = transport
        .play(&mut device, &tracks)
        .expect("transport play should not error");
    assert_eq!(ignored.started, 0);

    run_for(&mut transport, &mut device, &tracks, 2.5);
    assert!(device.voices().len() >= 3);
    assert!(device.voices().iter().all(|voice| voice.request.track == 1));

    transport.stop(&mut device);
    let report = transport
        .play(&mut device, &tracks)
        .expect("play after stop should succeed");
    assert_eq!(report.started, 2);
    assert_eq!(transport.scope(), Some(PlayScope::All));
}

#[test]
fn playing_an_empty_track_leaves_current_run_alone() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = Transport::default();

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    let generation = transport.generation();

    let report = transport
        .play_track(&mut device, &tracks, 2)
        .expect("empty track play should not error");
    assert_eq!(report.started, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(transport.generation(), generation);
    assert!(transport.is_playing());
}

#[test]
fn invalid_trim_skips_only_that_track() {
    let mut tracks = loaded_tracks(&[1.0, 1.0]);
    tracks[0].set_trim(0.8, Some(0.3));
    let mut device = OfflineDevice::running();
    let mut transport = Transport::default();

    let report = transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    assert_eq!(report.started, 1);
    assert_eq!(device.voices()[0].request.track, 1);
}

#[test]
fn non_looping_run_finishes_when_last_voice_ends() {
    let tracks = loaded_tracks(&[0.5, 1.0]);
    let mut device = OfflineDevice::running();
    let mut transport = Transport::default();

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    let end = transport
        .scheduled_end()
        .expect("voices should be scheduled");
    assert_abs_diff_eq!(end, 1.05, epsilon = 1e-12);

    run_for(&mut transport, &mut device, &tracks, 0.7);
    assert!(transport.is_playing());
    assert_eq!(transport.active_voices().len(), 1);

    run_for(&mut transport, &mut device, &tracks, 0.5);
    assert!(!transport.is_playing());
}

#[test]
fn disabling_loop_lets_current_pass_finish() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 1.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    run_for(&mut transport, &mut device, &tracks, 0.3);
    let iterations = transport.loop_iterations().len();
    transport.set_loop_enabled(false);

    run_for(&mut transport, &mut device, &tracks, 2.0);
    assert_eq!(device.voices().len(), iterations);
    assert!(!transport.is_playing());
}

#[test]
fn solo_during_playback_changes_gains_without_new_voices() {
    let mut engine = AudioEngine::new(OfflineDevice::running(), &EngineConfig::default());
    for index in 0..3 {
        engine
            .assign_buffer(index, format!("clip-{index}"), clip(2.0))
            .expect("track index should be valid");
    }
    engine.set_fader(1, 0.7).expect("track index should be valid");
    let report = engine.play().expect("play should succeed");
    assert_eq!(report.started, 3);
    let voices = engine.device().voices().len();

    engine.device_mut().advance(0.5);
    engine.tick().expect("tick should succeed");
    assert!(engine.toggle_solo(1).expect("track index should be valid"));

    assert_eq!(engine.device().voices().len(), voices);
    assert_eq!(engine.device().track_gain(0), Some(0.0));
    assert_eq!(engine.device().track_gain(1), Some(0.7));
    assert_eq!(engine.device().track_gain(2), Some(0.0));
}

#[test]
fn late_tick_skips_iterations_that_already_ended() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 1.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    device.advance(10.0);
    let report = transport
        .tick(&mut device, &tracks)
        .expect("tick should succeed");

    assert_eq!(report.iterations_skipped, 8);
    assert_eq!(report.iterations_scheduled, 2);

    let whens: Vec<f64> = device.voices().iter().map(|voice| voice.request.when).collect();
    assert_eq!(whens.len(), 3, "voices started: {whens:?}");
    assert_abs_diff_eq!(whens[0], 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(whens[1], 9.05, epsilon = 1e-9);
    assert_abs_diff_eq!(whens[2], 10.05, epsilon = 1e-9);

    let now = device.current_time();
    for voice in &device.voices()[1..] {
        assert!(voice.request.when + voice.request.duration > now);
    }

    let next = transport
        .pending_continuation()
        .expect("run should keep looping");
    assert_eq!(next.iteration, 11);
    assert_abs_diff_eq!(next.start_time, 11.05, epsilon = 1e-9);
}

#[test]
fn loop_window_change_applies_at_next_boundary() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 2.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    run_for(&mut transport, &mut device, &tracks, 0.5);
    assert!(transport.set_loop(0.0, 1.0, true));
    run_for(&mut transport, &mut device, &tracks, 3.0);

    let voices = device.voices();
    assert_eq!(voices.len(), 3);
    assert_abs_diff_eq!(voices[0].request.duration, 2.0, epsilon = 1e-12);
    assert!(voices[0].stopped_at.is_none());
    assert_abs_diff_eq!(voices[1].request.when, 0.05 + 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(voices[1].request.duration, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(voices[2].request.when, 0.05 + 3.0, epsilon = 1e-9);

    let starts: Vec<f64> = transport
        .loop_iterations()
        .iter()
        .map(|iteration| iteration.start)
        .collect();
    assert_eq!(starts.len(), 3);
    assert_abs_diff_eq!(starts[1], 2.05, epsilon = 1e-9);
    assert_abs_diff_eq!(starts[2], 3.05, epsilon = 1e-9);
}

#[test]
fn iteration_history_stays_bounded_on_long_runs() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(0.0, 0.25);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    run_for(&mut transport, &mut device, &tracks, 5.0);

    let iterations = transport.loop_iterations();
    assert_eq!(iterations.len(), tracklane_core::transport::ITERATION_HISTORY);
    let newest = iterations.last().expect("history should not be empty");
    assert_eq!(newest.index as usize, device.voices().len() - 1);
    for pair in iterations.windows(2) {
        assert_eq!(pair[1].index, pair[0].index + 1);
        assert_abs_diff_eq!(pair[1].start - pair[0].start, 0.25, epsilon = 1e-9);
    }
}

#[test]
fn playhead_follows_run_without_loop() {
    let tracks = loaded_tracks(&[2.0]);
    let mut device = OfflineDevice::running();
    let mut transport = Transport::default();

    assert_eq!(transport.playhead(1.0), 0.0);
    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");

    assert_eq!(transport.playhead(0.0), 0.0);
    assert_abs_diff_eq!(transport.playhead(0.35), 0.3, epsilon = 1e-12);
}

#[test]
fn playhead_wraps_inside_loop_window() {
    let tracks = loaded_tracks(&[4.0]);
    let mut device = OfflineDevice::running();
    let mut transport = looping_transport(1.0, 3.0);

    transport
        .play(&mut device, &tracks)
        .expect("play should succeed");
    // Before the shared anchor the playhead waits at the loop start.
    assert_eq!(transport.playhead(0.0), 1.0);
    assert_abs_diff_eq!(transport.playhead(0.55), 1.5, epsilon = 1e-12);

    run_for(&mut transport, &mut device, &tracks, 2.3);
    assert_abs_diff_eq!(transport.playhead(2.3), 1.25, epsilon = 1e-9);

    transport.stop(&mut device);
    assert_eq!(transport.playhead(2.3), 0.0);
}
