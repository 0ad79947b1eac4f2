use proptest::prelude::*;
use tracklane_core::{TRACK_COUNT, Track, Tracks, resolve_gain, resolve_gains};

fn tracks(faders: [f32; 3], muted: [bool; 3], solo: [bool; 3]) -> Tracks {
    std::array::from_fn(|index| {
        let mut track = Track::default();
        track.set_fader(faders[index]);
        track.muted = muted[index];
        track.solo = solo[index];
        track
    })
}

fn bits(mask: u8) -> [bool; 3] {
    [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0]
}

#[test]
fn solo_overrides_mute_on_other_tracks() {
    let tracks = tracks(
        [0.8, 0.7, 0.6],
        [false, true, false],
        [false, true, false],
    );
    assert_eq!(resolve_gains(&tracks), [0.0, 0.7, 0.0]);
}

#[test]
fn truth_table_holds_for_every_mute_and_solo_combination() {
    let faders = [0.25, 0.5, 1.0];
    for mute_mask in 0..8_u8 {
        for solo_mask in 0..8_u8 {
            let muted = bits(mute_mask);
            let solo = bits(solo_mask);
            let tracks = tracks(faders, muted, solo);
            let gains = resolve_gains(&tracks);
            let any_solo = solo.iter().any(|value| *value);

            for index in 0..TRACK_COUNT {
                let expected = if any_solo {
                    if solo[index] { faders[index] } else { 0.0 }
                } else if muted[index] {
                    0.0
                } else {
                    faders[index]
                };
                assert_eq!(
                    gains[index], expected,
                    "track {index} mute={mute_mask:03b} solo={solo_mask:03b}"
                );
            }
        }
    }
}

#[test]
fn out_of_range_index_is_silent() {
    let tracks = Tracks::default();
    assert_eq!(resolve_gain(&tracks, TRACK_COUNT), 0.0);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn gains_never_exceed_fader_and_follow_solo(
        faders in prop::array::uniform3(0.0_f32..=1.0),
        mute_mask in 0_u8..8,
        solo_mask in 0_u8..8,
    ) {
        let tracks = tracks(faders, bits(mute_mask), bits(solo_mask));
        let gains = resolve_gains(&tracks);
        for index in 0..TRACK_COUNT {
            prop_assert!(gains[index] >= 0.0);
            prop_assert!(gains[index] <= tracks[index].fader);
            prop_assert_eq!(gains[index], resolve_gain(&tracks, index));
            if solo_mask != 0 && !tracks[index].solo {
                prop_assert_eq!(gains[index], 0.0);
            }
        }
    }
}
