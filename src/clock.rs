//! The `Clock` core: reference mapping, drift/jitter estimation, buffering
//! control, and the public entry points that sit behind one mutex.

use parking_lot::Mutex;

use crate::average::Average;
use crate::config::ClockConfig;
use crate::error::{ClockError, ClockResult};
use crate::latency::LatencyStats;
use crate::ring::{ClockPoint, PointRing};
use crate::stats::ClockStats;
use crate::time::{MonotonicClock, SystemMonotonicClock};
use crate::{
    ts_valid, BUFFERING_RATE, BUFFERING_TARGET, CONTINUOUS_LATE_LIMIT,
    CONTINUOUS_LATE_THRESHOLD_US, CR_MAX_GAP, CR_MEAN_PTS_GAP, INPUT_CLOCK_LATE_COUNT,
    INVALID_TS, RATE_DEFAULT,
};

/// Outputs of [`Clock::convert_ts`]. `ts0`/`ts1` are `None` where
/// [`crate::INVALID_TS`] would otherwise apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedTs {
    pub rate: i64,
    pub ts0: Option<i64>,
    pub ts1: Option<i64>,
}

/// Snapshot returned by [`Clock::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPosition {
    pub ref_stream: i64,
    pub ref_system: i64,
    pub last_stream_offset: i64,
    pub last_system_offset: i64,
}

/// Rolling window of the last [`INPUT_CLOCK_LATE_COUNT`] lateness samples.
#[derive(Debug, Clone, Copy)]
struct LateRing {
    slots: [i64; INPUT_CLOCK_LATE_COUNT],
    idx: usize,
}

impl LateRing {
    fn new() -> Self {
        LateRing { slots: [0; INPUT_CLOCK_LATE_COUNT], idx: 0 }
    }

    fn push(&mut self, sample: i64) {
        self.slots[self.idx] = sample;
        self.idx = (self.idx + 1) % INPUT_CLOCK_LATE_COUNT;
    }

    /// Median of exactly 3 samples, computed as sum − min − max.
    fn median(&self) -> i64 {
        let sum: i64 = self.slots.iter().sum();
        let min = *self.slots.iter().min().unwrap();
        let max = *self.slots.iter().max().unwrap();
        sum - min - max
    }

    /// Shifts every sample by `-delta` (floored at 0), compacts the
    /// survivors to the front, and resets the write index.
    fn rebase(&mut self, delta: i64) {
        let mut compacted = [0i64; INPUT_CLOCK_LATE_COUNT];
        let mut i = 0;
        for &l in self.slots.iter() {
            let v = (l - delta).max(0);
            if v != 0 {
                compacted[i] = v;
                i += 1;
            }
        }
        self.slots = compacted;
        self.idx = 0;
    }
}

struct ClockState {
    reference: ClockPoint,
    last: ClockPoint,
    has_reference: bool,
    ts_max: i64,
    buffering_duration: i64,
    next_drift_update: i64,
    drift: Average,
    late: LateRing,
    continuous_late_count: u32,
    external_clock: i64,
    has_external_clock: bool,
    paused: bool,
    pause_date: i64,
    rate: i64,
    pts_delay: i64,
    clock_points: PointRing,
    stat: LatencyStats,
}

impl ClockState {
    fn new(config: ClockConfig) -> Self {
        ClockState {
            reference: ClockPoint::INVALID,
            last: ClockPoint::INVALID,
            has_reference: false,
            ts_max: INVALID_TS,
            buffering_duration: 0,
            next_drift_update: INVALID_TS,
            drift: Average::new(config.cr_average.max(10)),
            late: LateRing::new(),
            continuous_late_count: 0,
            external_clock: INVALID_TS,
            has_external_clock: false,
            paused: false,
            pause_date: INVALID_TS,
            rate: config.rate,
            pts_delay: config.pts_delay,
            clock_points: PointRing::new(),
            stat: LatencyStats::new(),
        }
    }

    // -- reference mapping --------------------------------------

    fn stream_to_system(&self, stream: i64) -> i64 {
        (stream - self.reference.i_stream) * self.rate / RATE_DEFAULT + self.reference.i_system
    }

    fn system_to_stream(&self, system: i64) -> i64 {
        (system - self.reference.i_system) * RATE_DEFAULT / self.rate + self.reference.i_stream
    }

    fn ts_offset(&self) -> i64 {
        self.pts_delay * (self.rate - RATE_DEFAULT) / RATE_DEFAULT
    }

    fn network_jitter(&self) -> i64 {
        self.drift.max_offset()
    }

    fn decoder_latency(&self) -> i64 {
        self.stat.max()
    }

    // -- update ------------------------------------------------------------

    fn update(&mut self, stream: i64, system: i64, can_pace: bool, buffering_allowed: bool) {
        let gap_too_large = self.last.is_valid() && (self.last.i_stream - stream).abs() > CR_MAX_GAP;
        let discontinuity = !self.has_reference || gap_too_large;

        if discontinuity {
            if gap_too_large {
                log::warn!(
                    "input clock: stream discontinuity ({} -> {}), resetting reference",
                    self.last.i_stream,
                    stream
                );
            }
            self.next_drift_update = INVALID_TS;
            self.drift.reset();
            self.stat.init();
            let base = if ts_valid(self.ts_max) { self.ts_max + CR_MEAN_PTS_GAP } else { i64::MIN };
            self.reference = ClockPoint::new(stream, base.max(system));
            self.has_reference = true;
            self.has_external_clock = false;
        }

        if !can_pace && self.next_drift_update < system {
            let sample = self.system_to_stream(system) - stream;
            self.drift.update(sample);
            self.next_drift_update = system;
        }

        if discontinuity {
            self.buffering_duration = 0;
        } else if !can_pace {
            self.buffering_duration = 0;
        } else if buffering_allowed {
            let delta = (stream - self.last.i_stream).max(0);
            self.buffering_duration += (delta * BUFFERING_RATE + 255) / 256;
            self.buffering_duration = self.buffering_duration.min(BUFFERING_TARGET);
        }

        self.last = ClockPoint::new(stream, system);
        self.clock_points.push(self.last);
    }

    // -- decoder latency --------------------------------------------------

    fn update_decoder_latency(&mut self, stream: i64, now: i64) {
        if let Some(point) = self.clock_points.find(stream) {
            let arrival = stream - point.i_stream + point.i_system;
            let sample = now + 500 - arrival;
            self.stat.update(sample);
        }
    }

    // -- convert_ts --------------------------------------------------------

    fn convert_ts(
        &mut self,
        ts0: Option<i64>,
        ts1: Option<i64>,
        ts_bound: i64,
        is_video: bool,
        now: i64,
    ) -> ClockResult<ConvertedTs> {
        if !self.has_reference {
            return Err(ClockError::NoReference);
        }

        if is_video {
            if let Some(stream) = ts0 {
                self.update_decoder_latency(stream, now);
            }
        }

        let ts_buffering = self.buffering_duration * self.rate / RATE_DEFAULT;
        let ts_delay = self.ts_offset() + self.network_jitter() + self.decoder_latency();

        let mut ts0_out: Option<i64> = None;
        if let Some(stream0) = ts0 {
            let mut converted = self.stream_to_system(stream0 + self.drift.get());
            self.ts_max = if ts_valid(self.ts_max) { self.ts_max.max(converted) } else { converted };
            converted += ts_delay;
            ts0_out = Some(converted);
        }

        let mut ts1_out: Option<i64> = None;
        if let Some(stream1) = ts1 {
            let converted = self.stream_to_system(stream1 + self.drift.get()) + ts_delay;
            ts1_out = Some(converted);
        }

        if let Some(converted0) = ts0_out {
            let lateness = now - converted0;
            if lateness >= CONTINUOUS_LATE_THRESHOLD_US {
                self.late.push(lateness);
                self.continuous_late_count += 1;
                if self.continuous_late_count > CONTINUOUS_LATE_LIMIT {
                    log::warn!(
                        "input clock: {} consecutive late deliveries, forcing reset",
                        self.continuous_late_count
                    );
                    self.reset();
                    self.continuous_late_count = 0;
                }
            } else {
                self.continuous_late_count = 0;
            }

            if ts_bound != i64::MAX && converted0 >= now + ts_delay + ts_buffering + ts_bound {
                return Err(ClockError::OutOfBound { ts0_us: converted0, now_us: now });
            }
        }

        Ok(ConvertedTs { rate: self.rate, ts0: ts0_out, ts1: ts1_out })
    }

    // -- rate, pause, origin, jitter ----------------------------------------

    fn change_rate(&mut self, new_rate: i64) {
        if self.has_reference {
            let old_rate = self.rate;
            self.reference.i_system = self.last.i_system
                - (self.last.i_system - self.reference.i_system) * new_rate / old_rate;
        }
        self.rate = new_rate;
    }

    fn change_pause(&mut self, pausing: bool, now: i64) {
        let resuming = self.paused && !pausing;
        if resuming && self.has_reference {
            let delta = now - self.pause_date;
            if delta > 0 {
                self.reference.i_system += delta;
                self.last.i_system += delta;
            }
        }
        self.pause_date = now;
        self.paused = pausing;
    }

    fn change_system_origin(&mut self, absolute: bool, system: i64) {
        if !self.has_reference {
            return;
        }
        let offset = if absolute {
            system - self.reference.i_system - self.ts_offset()
        } else {
            if !self.has_external_clock {
                self.external_clock = system;
                self.has_external_clock = true;
            }
            system - self.external_clock
        };
        self.reference.i_system += offset;
        self.last.i_system += offset;
    }

    fn set_jitter(&mut self, new_pts_delay: i64, cr_average: i64) {
        let delta = new_pts_delay - self.pts_delay;
        self.late.rebase(delta);
        if new_pts_delay > self.pts_delay {
            self.pts_delay = new_pts_delay;
        }
        let cr_average = cr_average.max(10);
        if cr_average != self.drift.divider() {
            self.drift.rescale(cr_average);
        }
    }

    fn get_jitter(&self) -> i64 {
        self.pts_delay + self.late.median()
    }

    fn get_wakeup(&self) -> i64 {
        if !self.has_reference {
            return 0;
        }
        self.stream_to_system(self.last.i_stream + self.drift.get() - self.buffering_duration)
    }

    fn get_state(&self) -> ClockResult<ClockPosition> {
        if !self.has_reference {
            return Err(ClockError::NoReference);
        }
        Ok(ClockPosition {
            ref_stream: self.reference.i_stream,
            ref_system: self.reference.i_system,
            last_stream_offset: self.last.i_stream - self.reference.i_stream,
            last_system_offset: self.last.i_system - self.reference.i_system,
        })
    }

    fn change_drift_start_point(&mut self, system: i64) {
        if !self.has_reference {
            return;
        }
        self.next_drift_update = system + 33_000;
    }

    fn reset(&mut self) {
        self.has_reference = false;
        self.has_external_clock = false;
        self.ts_max = INVALID_TS;
    }

    fn stats(&self) -> ClockStats {
        ClockStats {
            has_reference: self.has_reference,
            ref_stream: self.reference.i_stream,
            ref_system: self.reference.i_system,
            last_stream: self.last.i_stream,
            last_system: self.last.i_system,
            rate: self.rate,
            buffering_duration_us: self.buffering_duration,
            network_jitter_us: self.network_jitter(),
            decoder_latency_us: self.decoder_latency(),
            continuous_late_count: self.continuous_late_count,
            paused: self.paused,
        }
    }
}

/// Thread-safe facade over [`ClockState`]: one non-recursive mutex guards
/// every public entry point. `C` is the host monotonic-clock collaborator;
/// it defaults to [`SystemMonotonicClock`] and is only consulted by
/// [`Clock::convert_ts`].
pub struct Clock<C: MonotonicClock = SystemMonotonicClock> {
    state: Mutex<ClockState>,
    host_clock: C,
}

impl Clock<SystemMonotonicClock> {
    pub fn new(config: ClockConfig) -> Self {
        Clock { state: Mutex::new(ClockState::new(config)), host_clock: SystemMonotonicClock::new() }
    }
}

impl<C: MonotonicClock> Clock<C> {
    /// Constructs a clock against an injected host-clock collaborator;
    /// used by tests that need deterministic `now()`.
    pub fn with_clock(config: ClockConfig, host_clock: C) -> Self {
        Clock { state: Mutex::new(ClockState::new(config)), host_clock }
    }

    pub fn update(&self, stream: i64, system: i64, can_pace: bool, buffering_allowed: bool) {
        self.state.lock().update(stream, system, can_pace, buffering_allowed);
    }

    pub fn convert_ts(
        &self,
        ts0: Option<i64>,
        ts1: Option<i64>,
        ts_bound: i64,
        is_video: bool,
    ) -> ClockResult<ConvertedTs> {
        let now = self.host_clock.now_us();
        self.state.lock().convert_ts(ts0, ts1, ts_bound, is_video, now)
    }

    pub fn reset(&self) {
        self.state.lock().reset();
    }

    pub fn change_rate(&self, new_rate: i64) {
        self.state.lock().change_rate(new_rate);
    }

    pub fn change_pause(&self, pausing: bool, now: i64) {
        self.state.lock().change_pause(pausing, now);
    }

    pub fn change_system_origin(&self, absolute: bool, system: i64) {
        self.state.lock().change_system_origin(absolute, system);
    }

    pub fn set_jitter(&self, new_pts_delay: i64, cr_average: i64) {
        self.state.lock().set_jitter(new_pts_delay, cr_average);
    }

    pub fn get_jitter(&self) -> i64 {
        self.state.lock().get_jitter()
    }

    pub fn get_wakeup(&self) -> i64 {
        self.state.lock().get_wakeup()
    }

    pub fn get_state(&self) -> ClockResult<ClockPosition> {
        self.state.lock().get_state()
    }

    pub fn change_drift_start_point(&self, system: i64) {
        self.state.lock().change_drift_start_point(system);
    }

    pub fn stats(&self) -> ClockStats {
        self.state.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A `MonotonicClock` a test can move by hand.
    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn new(start: i64) -> Self {
            ManualClock(AtomicI64::new(start))
        }

        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl MonotonicClock for ManualClock {
        fn now_us(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn default_clock(now: i64) -> Clock<ManualClock> {
        Clock::with_clock(ClockConfig::default(), ManualClock::new(now))
    }

    #[test]
    fn update_sets_last_point() {
        let clock = default_clock(0);
        clock.update(1_000, 2_000_000, true, true);
        let state = clock.state.lock();
        assert_eq!(state.last, ClockPoint::new(1_000, 2_000_000));
    }

    #[test]
    fn buffering_duration_stays_in_bounds() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, true);
        for k in 1..2_000i64 {
            clock.update(k * 33_333, 1_000_000 + k * 33_333, true, true);
            let bd = clock.state.lock().buffering_duration;
            assert!((0..=BUFFERING_TARGET).contains(&bd));
        }
    }

    #[test]
    fn stream_system_round_trip_at_default_rate() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        let state = clock.state.lock();
        for x in [1_000_000i64, 2_000_000, 5_500_000] {
            let stream = state.system_to_stream(x);
            assert_eq!(state.stream_to_system(stream), x);
        }
    }

    #[test]
    fn pause_resume_shifts_conversion_by_exact_delta() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        let before = clock.convert_ts(Some(0), None, i64::MAX, false).unwrap();
        clock.change_pause(true, 1_500_000);
        clock.change_pause(false, 2_000_000);
        let after = clock.convert_ts(Some(0), None, i64::MAX, false).unwrap();
        assert_eq!(after.ts0.unwrap() - before.ts0.unwrap(), 500_000);
    }

    #[test]
    fn large_stream_gap_triggers_reference_reset() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        clock.update(70 * crate::CLOCK_FREQ, 1_000_100, true, false);
        let state = clock.state.lock();
        assert_eq!(state.reference.i_stream, 70 * crate::CLOCK_FREQ);
    }

    #[test]
    fn get_jitter_is_pts_delay_plus_median_of_three() {
        let clock = default_clock(0);
        {
            let mut state = clock.state.lock();
            state.pts_delay = 2_000;
            state.late = LateRing { slots: [5_000, 7_000, 4_000], idx: 0 };
        }
        // sum=16000, min=4000, max=7000 -> median = 5000
        assert_eq!(clock.get_jitter(), 2_000 + 5_000);
    }

    // AvgRescale preserving value*divider + residue is covered by
    // average::tests::rescale_preserves_iir_accumulator.

    #[test]
    fn reference_reset_invalidates_ts_max() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        clock.update(70 * crate::CLOCK_FREQ, 1_000_100, true, false);
        let state = clock.state.lock();
        assert!(!ts_valid(state.ts_max));
    }

    #[test]
    fn rate_halving_rotates_reference_origin() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        clock.update(1_000_000, 2_000_000, true, false);
        let ref_before = clock.state.lock().reference;
        clock.change_rate(500);
        let state = clock.state.lock();
        let expected = 2_000_000 - (2_000_000 - ref_before.i_system) * 500 / 1_000;
        assert_eq!(state.reference.i_system, expected);
    }

    #[test]
    fn late_watchdog_forces_reset_after_limit() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        // convert_ts(0) == ref.i_system (1_000_000) + seeded decoder latency
        // (1_000_000) == 2_000_000 with zero rate/drift/pts_delay. Advance
        // "now" far enough ahead that every call reports >=16ms late.
        for k in 0..133 {
            clock.host_clock.set(2_000_000 + 20_000 + k);
            let _ = clock.convert_ts(Some(0), None, i64::MAX, false);
        }
        assert!(clock.get_state().is_err());
    }

    #[test]
    fn set_jitter_rebases_late_ring() {
        let clock = default_clock(0);
        {
            let mut state = clock.state.lock();
            state.pts_delay = 2_000;
            state.late = LateRing { slots: [5_000, 7_000, 4_000], idx: 0 };
        }
        clock.set_jitter(3_000, 10);
        let state = clock.state.lock();
        assert_eq!(state.late.slots, [4_000, 6_000, 3_000]);
        assert_eq!(state.late.idx, 0);
        assert_eq!(state.pts_delay, 3_000);
    }

    #[test]
    fn convert_ts_without_reference_is_an_error() {
        let clock = default_clock(0);
        assert_eq!(clock.convert_ts(Some(0), None, i64::MAX, false), Err(ClockError::NoReference));
    }

    #[test]
    fn can_pace_false_feeds_the_drift_estimator() {
        let clock = default_clock(0);
        // First update establishes the reference; can_pace=true here so it
        // contributes no drift sample.
        clock.update(0, 1_000_000, true, false);
        assert_eq!(clock.state.lock().drift.get(), 0);

        // Each subsequent update arrives 5000us later than the affine
        // prediction, i.e. a constant residual of 5000us.
        for k in 1..5i64 {
            let stream = k * 100_000;
            let system = 1_000_000 + stream + 5_000;
            clock.update(stream, system, false, false);
        }
        let drift = clock.state.lock().drift.get();
        assert!(drift > 0, "expected the drift estimator to track the 5000us skew, got {drift}");
    }

    #[test]
    fn change_system_origin_absolute_shifts_reference() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        // rate == RATE_DEFAULT, so ts_offset() == 0: offset == system - ref.i_system.
        clock.change_system_origin(true, 2_000_000);
        let state = clock.state.lock();
        assert_eq!(state.reference.i_system, 2_000_000);
        assert_eq!(state.last.i_system, 2_000_000);
    }

    #[test]
    fn change_system_origin_relative_uses_first_call_as_baseline() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);

        // First relative call establishes external_clock; offset is zero.
        clock.change_system_origin(false, 500_000);
        {
            let state = clock.state.lock();
            assert!(state.has_external_clock);
            assert_eq!(state.reference.i_system, 1_000_000);
        }

        // Second relative call offsets by the delta from that baseline.
        clock.change_system_origin(false, 600_000);
        let state = clock.state.lock();
        assert_eq!(state.reference.i_system, 1_100_000);
        assert_eq!(state.last.i_system, 1_100_000);
    }

    #[test]
    fn get_wakeup_is_zero_without_reference() {
        let clock = default_clock(0);
        assert_eq!(clock.get_wakeup(), 0);
    }

    #[test]
    fn get_wakeup_subtracts_buffering_duration() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, true);
        clock.update(100_000, 1_100_000, true, true);
        let bd = clock.state.lock().buffering_duration;
        assert_eq!(bd, 18_750);
        // stream_to_system(last.stream + drift.get() - buffering_duration),
        // drift.get() == 0 here (can_pace was true throughout).
        assert_eq!(clock.get_wakeup(), 100_000 - bd + 1_000_000);
    }

    #[test]
    fn change_drift_start_point_suspends_next_drift_sample() {
        let clock = default_clock(0);
        clock.update(0, 1_000_000, true, false);
        clock.change_drift_start_point(2_000_000);
        assert_eq!(clock.state.lock().next_drift_update, 2_033_000);

        // system (2_010_000) is still below the suspended threshold
        // (2_033_000), so this update must not feed the drift estimator even
        // though can_pace is false.
        clock.update(100_000, 2_010_000, false, false);
        assert_eq!(clock.state.lock().drift.get(), 0);
    }
}
