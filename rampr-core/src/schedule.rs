use std::time::Duration;

use crate::config::Stage;

const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(10);
const MAX_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// What the target does once every stage has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterLastStage {
    /// Drop to zero: the scenario is over.
    #[default]
    Stop,
    /// Keep the last declared target.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over elapsed time.
///
/// Stage `i` owns the half-open interval `[S_i, S_i + D_i)`. Inside it the target moves linearly
/// from the previous stage's target (or `start`) towards `stages[i].target`, truncated towards the
/// starting value so a ramp never overshoots. A zero-length stage owns no time at all and acts as
/// an instantaneous jump for the stage that follows it.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
    after_last_stage: AfterLastStage,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
            after_last_stage: AfterLastStage::Stop,
        }
    }

    #[must_use]
    pub fn with_after_last_stage(mut self, after: AfterLastStage) -> Self {
        self.after_last_stage = after;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start)
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage owning `elapsed`, `None` once every stage is over.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let idx = self.cumulative_ends.partition_point(|end| *end <= elapsed);
        (idx < self.stages.len()).then_some(idx)
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(idx) = self.stage_index_at(elapsed) else {
            return self.after_end_target();
        };

        let (stage_start, stage_end) = self.bounds(idx);
        let start_target = self.start_target(idx);
        let end_target = self.stages[idx].target;

        // `idx` owns `elapsed`, so the stage is non-empty.
        let den = stage_end.saturating_sub(stage_start).as_nanos() as i128;
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;

        // Integer division truncates towards zero, i.e. towards `start_target`.
        let cur = start_i + delta.saturating_mul(num) / den.max(1);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let idx = self
            .stage_index_at(elapsed)
            .unwrap_or(self.stages.len() - 1);
        let (stage_start, stage_end) = self.bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start).min(stage_duration);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: self.start_target(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(elapsed),
        })
    }

    /// How often an executor should re-evaluate the target: a tenth of the shortest non-empty
    /// stage, kept within `[10ms, 1s]`.
    pub fn reconcile_interval(&self) -> Duration {
        self.stages
            .iter()
            .map(|s| s.duration)
            .filter(|d| !d.is_zero())
            .min()
            .map(|d| d / 10)
            .unwrap_or(MAX_RECONCILE_INTERVAL)
            .clamp(MIN_RECONCILE_INTERVAL, MAX_RECONCILE_INTERVAL)
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration) {
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, self.cumulative_ends[idx])
    }

    fn start_target(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    fn after_end_target(&self) -> u64 {
        match self.after_last_stage {
            AfterLastStage::Stop => 0,
            AfterLastStage::Hold => self.stages.last().map(|s| s.target).unwrap_or(self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn stage(d: Duration, target: u64) -> Stage {
        Stage::new(d, target)
    }

    fn load_profile() -> RampingSchedule {
        RampingSchedule::new(
            0,
            vec![
                stage(secs(120), 20),
                stage(secs(300), 20),
                stage(secs(120), 50),
                stage(secs(300), 50),
                stage(secs(120), 0),
            ],
        )
    }

    #[test]
    fn boundary_target_equals_declared_target_and_belongs_to_next_stage() {
        let profiles = [
            load_profile(),
            RampingSchedule::new(
                0,
                vec![
                    stage(secs(60), 100),
                    stage(secs(180), 100),
                    stage(secs(60), 200),
                    stage(secs(180), 200),
                    stage(secs(120), 0),
                ],
            ),
            RampingSchedule::new(3, vec![stage(ms(7), 11), stage(ms(13), 2), stage(ms(1), 9)]),
        ];

        for sched in &profiles {
            let mut boundary = Duration::ZERO;
            for (i, s) in sched.stages().iter().enumerate() {
                boundary += s.duration;
                if i + 1 == sched.stages().len() {
                    break;
                }
                assert_eq!(sched.target_at(boundary), s.target, "stage {i} end");
                assert_eq!(sched.stage_index_at(boundary), Some(i + 1), "stage {i} end");
                // Just before the boundary the ramp has not passed the declared target.
                let before = sched.target_at(boundary - Duration::from_nanos(1));
                let prev = if i == 0 {
                    sched.start()
                } else {
                    sched.stages()[i - 1].target
                };
                assert!(before >= prev.min(s.target) && before <= prev.max(s.target));
            }
        }
    }

    #[test]
    fn ramps_interpolate_linearly_without_overshoot() {
        let sched = load_profile();
        assert_eq!(sched.target_at(Duration::ZERO), 0);
        assert_eq!(sched.target_at(secs(60)), 10);
        assert_eq!(sched.target_at(secs(119)), 19);
        assert_eq!(sched.target_at(secs(300)), 20);
        assert_eq!(sched.target_at(secs(420 + 60)), 35);

        // Ramp-down truncates towards the starting value.
        assert_eq!(sched.target_at(secs(840 + 1)), 50);
        assert_eq!(sched.target_at(secs(840 + 3)), 49);
        assert_eq!(sched.target_at(secs(959)), 1);
    }

    #[test]
    fn after_the_last_stage_stops_or_holds() {
        let stop = RampingSchedule::new(0, vec![stage(secs(10), 5)]);
        assert_eq!(stop.target_at(secs(10)), 0);
        assert_eq!(stop.target_at(secs(99)), 0);
        assert!(stop.is_done(secs(10)));
        assert!(!stop.is_done(ms(9_999)));

        let hold = stop.clone().with_after_last_stage(AfterLastStage::Hold);
        assert_eq!(hold.target_at(secs(10)), 5);
        assert_eq!(hold.target_at(secs(99)), 5);
    }

    #[test]
    fn zero_duration_stages_jump_instantly() {
        let sched = RampingSchedule::new(
            1,
            vec![stage(secs(10), 10), stage(Duration::ZERO, 50), stage(secs(10), 50)],
        );
        assert_eq!(sched.target_at(ms(9_999)), 9);
        assert_eq!(sched.target_at(secs(10)), 50);
        assert_eq!(sched.stage_index_at(secs(10)), Some(2));
        assert_eq!(sched.target_at(secs(15)), 50);

        let leading = RampingSchedule::new(0, vec![stage(Duration::ZERO, 7), stage(secs(1), 7)]);
        assert_eq!(leading.target_at(Duration::ZERO), 7);
    }

    #[test]
    fn empty_schedule_is_immediately_done() {
        let sched = RampingSchedule::new(4, Vec::new());
        assert_eq!(sched.total_duration(), Duration::ZERO);
        assert_eq!(sched.target_at(Duration::ZERO), 0);
        assert!(sched.stage_snapshot_at(Duration::ZERO).is_none());
        assert_eq!(
            sched
                .with_after_last_stage(AfterLastStage::Hold)
                .target_at(secs(1)),
            4
        );
    }

    #[test]
    fn target_is_a_pure_function_of_elapsed() {
        let sched = load_profile();
        let probes = [secs(3), secs(200), secs(123), secs(3), secs(900), secs(200)];
        let first: Vec<u64> = probes.iter().map(|t| sched.target_at(*t)).collect();
        let second: Vec<u64> = probes.iter().map(|t| sched.target_at(*t)).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], first[3]);
    }

    #[test]
    fn snapshot_reports_stage_progress() {
        let sched = load_profile();
        let snap = sched
            .stage_snapshot_at(secs(150))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 5);
        assert_eq!(snap.stage_elapsed, secs(30));
        assert_eq!(snap.stage_remaining, secs(270));
        assert_eq!((snap.start_target, snap.end_target), (20, 20));
        assert_eq!(snap.current_target, 20);

        let end = sched
            .stage_snapshot_at(secs(10_000))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 4);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 0);
    }

    #[test]
    fn reconcile_interval_follows_shortest_stage() {
        assert_eq!(load_profile().reconcile_interval(), secs(1));
        let short = RampingSchedule::new(0, vec![stage(ms(500), 2), stage(secs(5), 2)]);
        assert_eq!(short.reconcile_interval(), ms(50));
        let tiny = RampingSchedule::new(0, vec![stage(ms(20), 2), stage(Duration::ZERO, 4)]);
        assert_eq!(tiny.reconcile_interval(), ms(10));
    }
}
