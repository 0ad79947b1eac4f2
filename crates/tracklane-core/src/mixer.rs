use crate::model::{TRACK_COUNT, Track};

/// Effective linear gain for `tracks[index]`.
///
/// Any soloed track silences every non-soloed track, muted or not. Without a
/// solo, mute zeroes the fader.
#[must_use]
pub fn resolve_gain(tracks: &[Track], index: usize) -> f32 {
    let Some(track) = tracks.get(index) else {
        return 0.0;
    };

    let any_solo = tracks.iter().any(|track| track.solo);
    if any_solo {
        if track.solo { track.fader } else { 0.0 }
    } else if track.muted {
        0.0
    } else {
        track.fader
    }
}

/// Gains for all slots. A single mute/solo toggle can change every entry, so
/// callers always recompute the whole set.
#[must_use]
pub fn resolve_gains(tracks: &[Track; TRACK_COUNT]) -> [f32; TRACK_COUNT] {
    std::array::from_fn(|index| resolve_gain(tracks, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(fader: f32, muted: bool, solo: bool) -> Track {
        Track {
            fader,
            muted,
            solo,
            ..Track::default()
        }
    }

    #[test]
    fn solo_overrides_mute_on_other_tracks() {
        let tracks = [
            track(0.9, true, false),
            track(0.7, false, true),
            track(0.5, false, false),
        ];
        assert_eq!(resolve_gains(&tracks), [0.0, 0.7, 0.0]);
    }

    #[test]
    fn muted_soloed_track_still_plays() {
        let tracks = [
            track(0.8, true, true),
            track(0.6, false, false),
            track(0.4, false, false),
        ];
        assert_eq!(resolve_gains(&tracks), [0.8, 0.0, 0.0]);
    }

    #[test]
    fn out_of_range_index_is_silent() {
        let tracks = [Track::default(), Track::default(), Track::default()];
        assert_eq!(resolve_gain(&tracks, 7), 0.0);
    }
}
