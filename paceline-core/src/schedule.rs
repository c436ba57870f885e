use std::time::Duration;

use super::config::Stage;

// Absorbs float error when N(T) lands exactly on an integer.
const ARRIVAL_EPSILON: f64 = 1e-9;
// Relative slack when checking N(t) >= k; far below one nanosecond of arrivals at any
// practical rate.
const REACHED_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_rate: f64,
}

/// One stage, pre-integrated. Rates are per second.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: f64,
    duration: f64,
    start_rate: f64,
    end_rate: f64,
    /// Cumulative arrivals at `start`.
    arrivals_before: f64,
}

impl Segment {
    fn end(&self) -> f64 {
        self.start + self.duration
    }

    fn rate_at(&self, offset: f64) -> f64 {
        if self.duration <= 0.0 {
            return self.end_rate;
        }
        let frac = (offset / self.duration).clamp(0.0, 1.0);
        self.start_rate + (self.end_rate - self.start_rate) * frac
    }

    /// Arrivals accumulated `offset` seconds into the segment.
    fn arrivals_within(&self, offset: f64) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        let s = offset.clamp(0.0, self.duration);
        let slope = (self.end_rate - self.start_rate) / self.duration;
        self.start_rate * s + 0.5 * slope * s * s
    }

    fn arrivals_total(&self) -> f64 {
        0.5 * (self.start_rate + self.end_rate) * self.duration
    }

    /// Offset at which `want` arrivals (measured from the segment start) have accumulated.
    fn offset_for(&self, want: f64) -> f64 {
        if want <= 0.0 || self.duration <= 0.0 {
            return 0.0;
        }

        // Solve 0.5*slope*s^2 + r0*s - want = 0 in the form that stays stable for
        // slope -> 0 and for negative slopes (ramp-down).
        let r0 = self.start_rate;
        let slope = (self.end_rate - self.start_rate) / self.duration;
        let disc = (r0 * r0 + 2.0 * slope * want).max(0.0);
        let denom = r0 + disc.sqrt();
        if denom <= 0.0 {
            return self.duration;
        }

        (2.0 * want / denom).clamp(0.0, self.duration)
    }
}

/// Piecewise-linear target arrival rate `R(t)` and its integral `N(t)`.
///
/// Iteration `k` (1-based) is due at the smallest `t` with `N(t) >= k`.
#[derive(Debug, Clone)]
pub struct RateSchedule {
    start_rate: u64,
    time_unit: Duration,
    stages: Vec<Stage>,
    segments: Vec<Segment>,
    total: f64,
}

impl RateSchedule {
    pub fn new(start_rate: u64, time_unit: Duration, stages: Vec<Stage>) -> Self {
        let unit_s = time_unit.as_secs_f64().max(1e-9);
        let per_sec = |target: u64| target as f64 / unit_s;

        let mut segments = Vec::with_capacity(stages.len());
        let mut start = 0.0f64;
        let mut arrivals = 0.0f64;
        let mut prev_target = start_rate;

        for st in &stages {
            let seg = Segment {
                start,
                duration: st.duration.as_secs_f64(),
                start_rate: per_sec(prev_target),
                end_rate: per_sec(st.target),
                arrivals_before: arrivals,
            };
            start = seg.end();
            arrivals += seg.arrivals_total();
            prev_target = st.target;
            segments.push(seg);
        }

        Self {
            start_rate,
            time_unit,
            stages,
            segments,
            total: start,
        }
    }

    /// A single plateau at `rate` per `time_unit` for `duration`.
    pub fn constant(rate: u64, time_unit: Duration, duration: Duration) -> Self {
        Self::new(
            rate,
            time_unit,
            vec![Stage {
                duration,
                target: rate,
            }],
        )
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_rate(&self) -> u64 {
        self.start_rate
    }

    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    // Last segment whose start is <= t. Zero-length segments at t are skipped over so the
    // rate after a boundary jump is the one reported.
    fn segment_index_at(&self, t: f64) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        let idx = self.segments.partition_point(|s| s.start <= t);
        Some(idx.saturating_sub(1))
    }

    /// Instantaneous target rate in iterations per second.
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        let Some(idx) = self.segment_index_at(t) else {
            return self.start_rate as f64 / self.time_unit.as_secs_f64().max(1e-9);
        };
        let seg = &self.segments[idx];
        seg.rate_at(t - seg.start)
    }

    /// Cumulative target arrivals `N(t)`.
    pub fn arrivals_at(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64().min(self.total);
        let Some(idx) = self.segment_index_at(t) else {
            return 0.0;
        };
        let seg = &self.segments[idx];
        seg.arrivals_before + seg.arrivals_within(t - seg.start)
    }

    /// Total arrivals over the whole schedule, `N(T)`.
    pub fn total_arrivals(&self) -> f64 {
        self.segments
            .last()
            .map(|s| s.arrivals_before + s.arrivals_total())
            .unwrap_or(0.0)
    }

    /// Number of iterations the schedule releases in `[0, T]`.
    pub fn expected_iterations(&self) -> u64 {
        (self.total_arrivals() + ARRIVAL_EPSILON).floor().max(0.0) as u64
    }

    /// Instant (relative to the scenario start) at which iteration `k` is due, or `None` if
    /// `k` falls beyond the end of the schedule.
    pub fn instant_of(&self, k: u64) -> Option<Duration> {
        if k == 0 {
            return Some(Duration::ZERO);
        }
        let want = k as f64;
        if want > self.total_arrivals() + ARRIVAL_EPSILON {
            return None;
        }

        // First segment whose cumulative end reaches `want`.
        let idx = self
            .segments
            .partition_point(|s| s.arrivals_before + s.arrivals_total() + ARRIVAL_EPSILON < want);
        let seg = self.segments.get(idx)?;

        let t = seg.start + seg.offset_for(want - seg.arrivals_before);
        Some(self.first_nanosecond_reaching(want, t))
    }

    // Rounds `t` onto the nanosecond grid without landing before `N(t) >= want`.
    fn first_nanosecond_reaching(&self, want: f64, t: f64) -> Duration {
        const MAX_STEPS: u32 = 16;
        let total = self.total_duration();
        let floor_ns = (t.clamp(0.0, self.total) * 1e9).floor();
        let mut at = Duration::from_nanos(floor_ns as u64).min(total);
        for _ in 0..MAX_STEPS {
            if at >= total || self.arrivals_at(at) + want * REACHED_TOLERANCE >= want {
                break;
            }
            at += Duration::from_nanos(1);
        }
        at.min(total)
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let clamped = elapsed.min(self.total_duration());
        let t = clamped.as_secs_f64();
        let idx = if clamped >= self.total_duration() {
            self.stages.len() - 1
        } else {
            self.segment_index_at(t)?
        };

        let seg = &self.segments[idx];
        let stage_elapsed = Duration::from_secs_f64((t - seg.start).clamp(0.0, seg.duration));
        let stage_remaining = self.stages[idx].duration.saturating_sub(stage_elapsed);

        let start_target = if idx == 0 {
            self.start_rate
        } else {
            self.stages[idx - 1].target
        };

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target,
            end_target: self.stages[idx].target,
            current_rate: seg.rate_at(t - seg.start),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn stage(duration: Duration, target: u64) -> Stage {
        Stage { duration, target }
    }

    fn count_released(schedule: &RateSchedule) -> u64 {
        let total = schedule.total_duration();
        let mut k = 1;
        while let Some(t) = schedule.instant_of(k) {
            assert!(t <= total, "iteration {k} due after the end: {t:?}");
            k += 1;
        }
        k - 1
    }

    #[test]
    fn ramp_then_plateau_matches_integral() {
        let s = RateSchedule::new(
            0,
            secs(1),
            vec![stage(secs(240), 50), stage(secs(60), 50)],
        );

        assert!((s.total_arrivals() - 9000.0).abs() < 1e-6);
        let released = count_released(&s);
        assert!(
            released.abs_diff(9000) <= 1,
            "released={released}, expected ~9000"
        );
        assert_eq!(s.total_duration(), secs(300));
    }

    #[test]
    fn instants_are_monotonic_and_never_early() {
        let s = RateSchedule::new(
            3,
            secs(1),
            vec![stage(secs(5), 20), stage(secs(5), 0), stage(secs(5), 7)],
        );

        let mut prev = Duration::ZERO;
        let mut k = 1;
        while let Some(t) = s.instant_of(k) {
            assert!(t >= prev, "k={k} went backwards");
            // N(t_k) must have reached k (never early).
            assert!(s.arrivals_at(t) + 1e-6 >= k as f64, "k={k} released early");
            prev = t;
            k += 1;
        }
        assert!(count_released(&s).abs_diff(s.total_arrivals().floor() as u64) <= 1);
    }

    #[test]
    fn instants_reach_their_arrival_on_the_nanosecond_grid() {
        let mut seed = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for _ in 0..50 {
            let stages: Vec<Stage> = (0..1 + next(4))
                .map(|_| stage(Duration::from_millis(1 + next(20_000)), next(200)))
                .collect();
            let s = RateSchedule::new(next(100), secs(1), stages);
            let total = s.total_duration();

            let mut k = 1;
            while let Some(t) = s.instant_of(k) {
                if t < total {
                    let want = k as f64;
                    assert!(
                        s.arrivals_at(t) + want * REACHED_TOLERANCE >= want,
                        "k={k} at {t:?} is early: N={}",
                        s.arrivals_at(t)
                    );
                }
                k += 1;
            }
        }
    }

    #[test]
    fn zero_rate_stage_releases_nothing_but_advances_clock() {
        let s = RateSchedule::new(0, secs(1), vec![stage(secs(10), 0), stage(secs(10), 0)]);
        assert_eq!(s.instant_of(1), None);
        assert_eq!(s.expected_iterations(), 0);
        assert_eq!(s.total_duration(), secs(20));
    }

    #[test]
    fn plateau_after_zero_rate_gap() {
        // 10s of nothing, then a jump to 10/s for 2s.
        let s = RateSchedule::new(
            0,
            secs(1),
            vec![
                stage(secs(10), 0),
                stage(Duration::ZERO, 10),
                stage(secs(2), 10),
            ],
        );

        let first = s.instant_of(1).unwrap_or_else(|| panic!("expected an iteration"));
        assert!(first >= secs(10));
        assert!(first <= Duration::from_millis(10_101));
        assert_eq!(count_released(&s), 20);
    }

    #[test]
    fn zero_duration_stage_is_a_rate_jump() {
        let s = RateSchedule::new(5, secs(1), vec![stage(Duration::ZERO, 100), stage(secs(1), 100)]);
        assert_eq!(s.rate_at(Duration::from_millis(500)), 100.0);
        assert_eq!(count_released(&s), 100);
    }

    #[test]
    fn time_unit_scales_rate() {
        let s = RateSchedule::constant(30, Duration::from_secs(60), secs(120));
        assert!((s.rate_at(secs(1)) - 0.5).abs() < 1e-12);
        assert_eq!(count_released(&s), 60);

        let first = s.instant_of(1).unwrap_or_else(|| panic!("expected an iteration"));
        assert_eq!(first, secs(2));
    }

    #[test]
    fn constant_rate_spacing_is_even() {
        let s = RateSchedule::constant(4, secs(1), secs(2));
        let got: Vec<Duration> = (1..=8).filter_map(|k| s.instant_of(k)).collect();
        let want: Vec<Duration> = (1..=8).map(|k| Duration::from_millis(250 * k)).collect();
        for (g, w) in got.iter().zip(&want) {
            assert!(g.abs_diff(*w) < Duration::from_micros(1), "{g:?} vs {w:?}");
        }
        assert_eq!(s.instant_of(9), None);
    }

    #[test]
    fn ramp_down_inverts_correctly() {
        let s = RateSchedule::new(10, secs(1), vec![stage(secs(10), 0)]);
        assert!((s.total_arrivals() - 50.0).abs() < 1e-9);
        assert_eq!(count_released(&s), 50);

        // Half the arrivals happen in the first ~2.93s of a linear ramp-down.
        let t25 = s.instant_of(25).unwrap_or_else(|| panic!("expected an iteration"));
        assert!((t25.as_secs_f64() - 2.928_932).abs() < 1e-3, "{t25:?}");
    }

    #[test]
    fn stage_snapshot_reports_current_stage() {
        let s = RateSchedule::new(0, secs(1), vec![stage(secs(10), 10), stage(secs(10), 10)]);

        let snap = s
            .stage_snapshot_at(secs(5))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 0);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_remaining, secs(5));
        assert!((snap.current_rate - 5.0).abs() < 1e-9);

        let snap = s
            .stage_snapshot_at(secs(100))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.stage_remaining, Duration::ZERO);
    }
}
