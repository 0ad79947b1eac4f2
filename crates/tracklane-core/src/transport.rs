use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    device::{AudioDevice, DeviceError, VoiceId, VoiceRequest},
    model::{LoopRegion, MIN_BPM, TRACK_COUNT, Track, TransportState},
    placement::{TrimWindow, placement_seconds, resolve_trim, track_window},
};

/// Windows shorter than this are treated as empty.
const TIME_EPSILON: f64 = 1e-9;

pub const DEFAULT_LOOKAHEAD_SECONDS: f64 = 0.05;
pub const DEFAULT_HORIZON_SECONDS: f64 = 0.1;
/// Loop iterations kept per run; older ones are dropped as new ones arrive.
pub const ITERATION_HISTORY: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerTiming {
    /// Offset between the clock reading at Play and the shared voice anchor.
    pub lookahead_seconds: f64,
    /// How far ahead of the clock a loop continuation is allowed to run.
    pub horizon_seconds: f64,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            lookahead_seconds: DEFAULT_LOOKAHEAD_SECONDS,
            horizon_seconds: DEFAULT_HORIZON_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayScope {
    All,
    Track(usize),
}

/// What part of a trimmed clip one voice plays, in timeline seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoicePlan {
    pub timeline_start: f64,
    pub offset: f64,
    pub duration: f64,
}

/// Maps a clip placed at `placement` onto the playback window.
///
/// Without a loop the window is the whole timeline. With a loop the voice
/// covers only the part of the clip that falls inside `[start, end)`.
#[must_use]
pub fn plan_voice(
    placement: f64,
    window: TrimWindow,
    loop_region: Option<LoopRegion>,
) -> Option<VoicePlan> {
    let (window_start, window_end) =
        loop_region.map_or((0.0, f64::INFINITY), |region| (region.start, region.end));
    let from = placement.max(window_start);
    let to = (placement + window.duration()).min(window_end);
    if to - from <= TIME_EPSILON {
        return None;
    }

    Some(VoicePlan {
        timeline_start: from,
        offset: window.start + (from - placement),
        duration: to - from,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveVoice {
    pub id: VoiceId,
    pub track: usize,
    pub iteration: u64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopIteration {
    pub index: u64,
    pub start: f64,
    pub region: LoopRegion,
}

impl LoopIteration {
    #[must_use]
    pub fn next_start(&self) -> f64 {
        self.start + self.region.duration()
    }
}

/// Token for the next loop iteration of one run. It goes stale as soon as
/// the run is stopped or restarted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Continuation {
    pub generation: u64,
    pub iteration: u64,
    pub start_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayReport {
    pub started: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub iterations_scheduled: usize,
    /// Iterations that ended before the tick arrived and were never started.
    pub iterations_skipped: usize,
    pub voices_released: usize,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct Transport {
    state: TransportState,
    timing: SchedulerTiming,
    scope: Option<PlayScope>,
    generation: u64,
    base_time: f64,
    iterations: Vec<LoopIteration>,
    looping: bool,
    voices: Vec<ActiveVoice>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportState::default(), SchedulerTiming::default())
    }
}

impl Transport {
    #[must_use]
    pub fn new(state: TransportState, timing: SchedulerTiming) -> Self {
        Self {
            state: TransportState {
                transport_time: 0.0,
                running: false,
                ..state
            },
            timing,
            scope: None,
            generation: 0,
            base_time: 0.0,
            iterations: Vec::new(),
            looping: false,
            voices: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &TransportState {
        &self.state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.running
    }

    #[must_use]
    pub fn scope(&self) -> Option<PlayScope> {
        self.scope
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn base_time(&self) -> f64 {
        self.base_time
    }

    #[must_use]
    pub fn active_voices(&self) -> &[ActiveVoice] {
        &self.voices
    }

    /// The most recent iterations of the current run, oldest first. At most
    /// [`ITERATION_HISTORY`] are kept.
    #[must_use]
    pub fn loop_iterations(&self) -> &[LoopIteration] {
        &self.iterations
    }

    /// Latest end time of any voice still held by the run.
    #[must_use]
    pub fn scheduled_end(&self) -> Option<f64> {
        self.voices
            .iter()
            .map(|voice| voice.end)
            .reduce(f64::max)
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() || bpm < MIN_BPM {
            warn!(bpm, "ignored invalid bpm");
            return;
        }
        self.state.bpm = bpm;
    }

    /// Updates the requested loop. While playing, the change is picked up at
    /// the next loop boundary.
    pub fn set_loop(&mut self, loop_start: f64, loop_end: f64, loop_enabled: bool) -> bool {
        if LoopRegion::new(loop_start, loop_end).is_none() {
            warn!(loop_start, loop_end, "ignored invalid loop range");
            return false;
        }

        self.state.loop_start = loop_start;
        self.state.loop_end = loop_end;
        self.state.loop_enabled = loop_enabled;
        debug!(
            loop_start,
            loop_end,
            loop_enabled,
            deferred = self.state.running,
            "loop region updated"
        );
        true
    }

    pub fn set_loop_enabled(&mut self, loop_enabled: bool) {
        self.state.loop_enabled = loop_enabled;
    }

    /// The continuation the scheduler will run next, if the run loops.
    #[must_use]
    pub fn pending_continuation(&self) -> Option<Continuation> {
        if !self.state.running || !self.looping {
            return None;
        }
        self.iterations.last().map(|iteration| Continuation {
            generation: self.generation,
            iteration: iteration.index + 1,
            start_time: iteration.next_start(),
        })
    }

    /// Timeline position of the playhead at device time `now`.
    #[must_use]
    pub fn playhead(&self, now: f64) -> f64 {
        if !self.state.running {
            return 0.0;
        }

        match self
            .iterations
            .iter()
            .rev()
            .find(|iteration| iteration.start <= now)
        {
            Some(iteration) => iteration.region.start + (now - iteration.start),
            None => self
                .iterations
                .first()
                .map_or((now - self.base_time).max(0.0), |iteration| {
                    iteration.region.start
                }),
        }
    }

    /// Transport-wide Play. Ignored while a single-track run is active.
    #[instrument(skip(self, device, tracks), fields(generation = self.generation))]
    pub fn play<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
    ) -> Result<PlayReport, DeviceError> {
        if self.state.running && matches!(self.scope, Some(PlayScope::Track(_))) {
            debug!("transport play ignored while a single track is playing");
            return Ok(PlayReport::default());
        }
        self.start_run(device, tracks, PlayScope::All)
    }

    /// Plays one track on its own. A track with nothing playable is a no-op
    /// and leaves any current run untouched.
    #[instrument(skip(self, device, tracks), fields(generation = self.generation))]
    pub fn play_track<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
        index: usize,
    ) -> Result<PlayReport, DeviceError> {
        let playable = tracks
            .get(index)
            .and_then(|track| track_window(track, self.state.bpm))
            .is_some();
        if !playable {
            debug!(track = index, "track has nothing to play");
            return Ok(PlayReport {
                started: 0,
                skipped: 1,
            });
        }
        self.start_run(device, tracks, PlayScope::Track(index))
    }

    /// Stops every voice and resets the transport. Safe to call repeatedly.
    #[instrument(skip(self, device), fields(generation = self.generation))]
    pub fn stop<D: AudioDevice + ?Sized>(&mut self, device: &mut D) {
        let stopped = self.halt(device);
        self.state.running = false;
        self.state.transport_time = 0.0;
        self.scope = None;
        info!(stopped, "transport stopped");
    }

    /// Per-frame work: advance `transport_time`, run due loop continuations,
    /// release voices that have finished.
    pub fn tick<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
    ) -> Result<TickReport, DeviceError> {
        let mut report = TickReport::default();
        if !self.state.running {
            return Ok(report);
        }

        let now = device.current_time();
        self.state.transport_time = self.state.transport_time.max(now - self.base_time);

        loop {
            report.iterations_skipped += self.skip_elapsed_iterations(now);
            let Some(continuation) = self.pending_continuation() else {
                break;
            };
            if continuation.start_time - now > self.timing.horizon_seconds {
                break;
            }
            if !self.run_continuation(device, tracks, continuation)? {
                break;
            }
            if self.looping {
                report.iterations_scheduled += 1;
            }
        }

        let before = self.voices.len();
        self.voices.retain(|voice| voice.end > now);
        report.voices_released = before - self.voices.len();

        if !self.looping && self.voices.is_empty() {
            self.state.running = false;
            self.scope = None;
            report.finished = true;
            info!(transport_time = self.state.transport_time, "playback finished");
        }

        Ok(report)
    }

    /// Schedules the loop iteration named by `continuation`.
    ///
    /// Returns `false` without touching the device when the token belongs to
    /// a stopped or restarted run.
    pub fn run_continuation<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
        continuation: Continuation,
    ) -> Result<bool, DeviceError> {
        if self.pending_continuation() != Some(continuation) {
            debug!(
                generation = continuation.generation,
                iteration = continuation.iteration,
                current_generation = self.generation,
                "ignored stale loop continuation"
            );
            return Ok(false);
        }

        let Some(region) = self.state.loop_region() else {
            debug!(
                iteration = continuation.iteration,
                "loop disabled at boundary, letting the last iteration finish"
            );
            self.looping = false;
            return Ok(true);
        };

        let start = continuation.start_time;
        let report =
            self.schedule_iteration(device, tracks, continuation.iteration, start, Some(region))?;
        self.record_iteration(LoopIteration {
            index: continuation.iteration,
            start,
            region,
        });
        debug!(
            iteration = continuation.iteration,
            start,
            loop_start = region.start,
            loop_end = region.end,
            started = report.started,
            "loop iteration scheduled"
        );
        Ok(true)
    }

    fn start_run<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
        scope: PlayScope,
    ) -> Result<PlayReport, DeviceError> {
        self.halt(device);
        if device.is_suspended() {
            device.resume()?;
        }

        let base = device.current_time() + self.timing.lookahead_seconds;
        let region = self.state.loop_region();
        self.base_time = base;
        self.scope = Some(scope);
        self.looping = region.is_some();
        self.state.running = true;
        self.state.transport_time = 0.0;

        let report = self.schedule_iteration(device, tracks, 0, base, region)?;
        if let Some(region) = region {
            self.record_iteration(LoopIteration {
                index: 0,
                start: base,
                region,
            });
        }

        info!(
            scope = ?scope,
            base_time = base,
            looping = self.looping,
            started = report.started,
            skipped = report.skipped,
            "transport started"
        );

        if !self.looping && self.voices.is_empty() {
            self.state.running = false;
            self.scope = None;
        }
        Ok(report)
    }

    fn schedule_iteration<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracks: &[Track; TRACK_COUNT],
        iteration: u64,
        iteration_start: f64,
        region: Option<LoopRegion>,
    ) -> Result<PlayReport, DeviceError> {
        let window_start = region.map_or(0.0, |region| region.start);
        let mut report = PlayReport::default();

        for index in self.scope_indices() {
            let Some(track) = tracks.get(index) else {
                continue;
            };
            let Some(buffer) = track.buffer.clone() else {
                report.skipped += 1;
                continue;
            };
            let window = match resolve_trim(&buffer, track.trim_start, track.trim_end) {
                Ok(window) => window,
                Err(error) => {
                    debug!(track = index, %error, "skipping track");
                    report.skipped += 1;
                    continue;
                }
            };

            let placement = placement_seconds(track.offset_beats, self.state.bpm);
            let Some(plan) = plan_voice(placement, window, region) else {
                continue;
            };

            let request = VoiceRequest {
                track: index,
                buffer,
                when: iteration_start + (plan.timeline_start - window_start),
                offset: plan.offset,
                duration: plan.duration,
            };
            let (start, end) = (request.when, request.end_time());
            match device.start_voice(request) {
                Ok(id) => {
                    self.voices.push(ActiveVoice {
                        id,
                        track: index,
                        iteration,
                        start,
                        end,
                    });
                    report.started += 1;
                }
                Err(error) => {
                    warn!(track = index, %error, "voice failed to start");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Moves the loop cursor past every iteration that ended before `now`
    /// without starting its voices. The skipped starts stay on the
    /// `start + k * duration` grid.
    fn skip_elapsed_iterations(&mut self, now: f64) -> usize {
        let (Some(continuation), Some(region)) =
            (self.pending_continuation(), self.state.loop_region())
        else {
            return 0;
        };

        let duration = region.duration();
        let elapsed = ((now - continuation.start_time) / duration).floor();
        if elapsed.is_nan() || elapsed < 1.0 {
            return 0;
        }

        let skipped = elapsed as u64;
        let last = skipped - 1;
        self.record_iteration(LoopIteration {
            index: continuation.iteration + last,
            start: continuation.start_time + last as f64 * duration,
            region,
        });
        warn!(
            skipped,
            first_skipped = continuation.iteration,
            now,
            "tick arrived late, skipped elapsed loop iterations"
        );
        usize::try_from(skipped).unwrap_or(usize::MAX)
    }

    fn record_iteration(&mut self, iteration: LoopIteration) {
        self.iterations.push(iteration);
        if self.iterations.len() > ITERATION_HISTORY {
            let excess = self.iterations.len() - ITERATION_HISTORY;
            self.iterations.drain(..excess);
        }
    }

    fn scope_indices(&self) -> std::ops::Range<usize> {
        match self.scope {
            Some(PlayScope::Track(index)) => index..index + 1,
            Some(PlayScope::All) | None => 0..TRACK_COUNT,
        }
    }

    fn halt<D: AudioDevice + ?Sized>(&mut self, device: &mut D) -> usize {
        let count = self.voices.len();
        for voice in self.voices.drain(..) {
            if let Err(error) = device.stop_voice(voice.id) {
                debug!(voice_id = %voice.id, %error, "voice already released");
            }
        }
        self.iterations.clear();
        self.looping = false;
        self.generation += 1;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: f64, end: f64) -> TrimWindow {
        TrimWindow { start, end }
    }

    #[test]
    fn plan_without_loop_plays_whole_trim() {
        let plan = plan_voice(1.5, window(0.25, 1.25), None).expect("voice should be planned");
        assert_eq!(
            plan,
            VoicePlan {
                timeline_start: 1.5,
                offset: 0.25,
                duration: 1.0
            }
        );
    }

    #[test]
    fn plan_seeks_into_clip_that_started_before_loop() {
        let region = LoopRegion::new(1.0, 3.0);
        let plan = plan_voice(0.5, window(0.0, 4.0), region).expect("voice should be planned");
        assert_eq!(plan.timeline_start, 1.0);
        assert_eq!(plan.offset, 0.5);
        assert_eq!(plan.duration, 2.0);
    }

    #[test]
    fn plan_skips_clip_outside_loop() {
        let region = LoopRegion::new(0.0, 2.0);
        assert!(plan_voice(2.0, window(0.0, 1.0), region).is_none());
        assert!(plan_voice(5.0, window(0.0, 1.0), region).is_none());
    }
}
