use std::path::Path;

use tempfile::tempdir;
use tracklane_core::{
    LoadedSound, decode_audio_file, load_sound,
    wav::{parse_wav_header, wav_sample_rate},
};

fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
    let frame_count = (seconds * sample_rate as f32).round() as usize;
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * 220.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)).round() as i16;
        for _ in 0..channels {
            writer
                .write_sample(sample)
                .expect("test wav sample write should succeed");
        }
    }
    writer.finalize().expect("test wav finalize should succeed");
}

#[test]
fn wav_decode_keeps_authored_sample_rate() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("tone.wav");
    write_test_wav(&path, 22_050, 2, 0.5);

    let bytes = std::fs::read(&path).expect("test wav should be readable");
    assert_eq!(wav_sample_rate(&bytes), Some(22_050));
    let header = parse_wav_header(&bytes).expect("header should parse");
    assert_eq!(header.channels, 2);

    let buffer = decode_audio_file(&path).expect("decode should succeed");
    assert_eq!(buffer.sample_rate(), 22_050);
    assert_eq!(buffer.channel_count(), 2);
    assert_eq!(buffer.frames(), 11_025);
    assert!((buffer.duration_seconds() - 0.5).abs() < 1e-9);

    let peak = buffer
        .channel(0)
        .expect("left channel should exist")
        .iter()
        .fold(0.0_f32, |peak, sample| peak.max(sample.abs()));
    assert!((peak - 0.5).abs() < 0.01, "peak {peak}");
}

#[test]
fn loaded_wav_sound_carries_its_duration() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("short.wav");
    write_test_wav(&path, 48_000, 1, 0.25);

    let bytes = std::fs::read(&path).expect("test wav should be readable");
    let sound = load_sound("short", bytes, Some("wav"));
    assert!(matches!(sound, LoadedSound::Decoded { .. }));
    assert!((sound.duration_seconds() - 0.25).abs() < 1e-9);
}

#[test]
fn undecodable_bytes_are_kept_for_download() {
    let payload = b"ID3\x04\x00\x00\x00\x00\x00\x00not really an mp3".to_vec();
    let sound = load_sound("broken", payload.clone(), Some("mp3"));

    assert_eq!(sound.duration_seconds(), 0.0);
    assert!(sound.buffer().is_none());
    let LoadedSound::Undecodable {
        original, reason, ..
    } = sound
    else {
        panic!("sound should be undecodable");
    };
    assert_eq!(&original[..], payload.as_slice());
    assert!(!reason.is_empty());
}

#[test]
fn missing_file_reports_path() {
    let error = decode_audio_file(Path::new("/definitely/not/here.wav"))
        .expect_err("missing file should fail");
    assert!(error.to_string().contains("/definitely/not/here.wav"));
}
