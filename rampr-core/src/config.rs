use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::schedule::RampingSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Command-line overrides. They take priority over anything a plan declares.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
}

impl RunConfig {
    pub fn has_overrides(&self) -> bool {
        self.vus.is_some() || self.duration.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioExecutor {
    /// A fixed pool of `vus` looping for `duration`.
    ConstantVus { vus: u64, duration: Duration },

    /// Ramp the number of active VUs up/down over time.
    RampingVus { start_vus: u64, stages: Vec<Stage> },
}

impl ScenarioExecutor {
    pub fn constant(vus: u64, duration: Duration) -> Self {
        Self::ConstantVus { vus, duration }
    }

    pub fn ramping(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self::RampingVus { start_vus, stages }
    }

    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::ConstantVus { .. } => ScenarioExecutorKind::ConstantVus,
            Self::RampingVus { .. } => ScenarioExecutorKind::RampingVus,
        }
    }

    /// Pool capacity: the largest target the executor can ever ask for.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::ConstantVus { vus, .. } => *vus,
            Self::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
        }
    }

    pub fn total_duration(&self) -> Duration {
        match self {
            Self::ConstantVus { duration, .. } => *duration,
            Self::RampingVus { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }

    /// Constant pools are a single flat stage.
    pub fn schedule(&self) -> RampingSchedule {
        match self {
            Self::ConstantVus { vus, duration } => {
                RampingSchedule::new(*vus, vec![Stage::new(*duration, *vus)])
            }
            Self::RampingVus { start_vus, stages } => {
                RampingSchedule::new(*start_vus, stages.clone())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ConstantVus { vus, duration } => {
                if *vus == 0 {
                    return Err(Error::InvalidVus);
                }
                if duration.is_zero() {
                    return Err(Error::InvalidDuration);
                }
            }
            Self::RampingVus { stages, .. } => {
                if stages.is_empty() || self.total_duration().is_zero() {
                    return Err(Error::InvalidStages);
                }
                if self.max_vus() == 0 {
                    return Err(Error::InvalidVus);
                }
            }
        }
        Ok(())
    }
}

/// Scenario executor kind (the string form used by plans and the CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(to_string = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "ramping-vus")]
    RampingVus,
}

impl ScenarioExecutorKind {
    #[must_use]
    pub fn is_ramping(self) -> bool {
        matches!(self, Self::RampingVus)
    }
}

/// Loosely-typed executor options as they come out of a plan file.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    /// Defaults to `constant-vus`.
    pub executor: Option<String>,
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,
}

/// Validates `opts` into an executor, applying `cfg` overrides.
///
/// When overrides are present a ramping scenario collapses into a constant pool: the profile no
/// longer matches what the user asked for, so only its peak and length are carried over.
pub fn executor_from_options(opts: &ScenarioOptions, cfg: &RunConfig) -> Result<ScenarioExecutor> {
    let executor_name = opts.executor.as_deref().unwrap_or("constant-vus");
    let kind: ScenarioExecutorKind = executor_name
        .parse()
        .map_err(|_| Error::InvalidExecutor(executor_name.to_string()))?;

    let executor = match kind {
        ScenarioExecutorKind::RampingVus if cfg.has_overrides() => {
            let ramp = ScenarioExecutor::ramping(opts.start_vus.unwrap_or(0), opts.stages.clone());
            let vus = cfg.vus.or(opts.vus).unwrap_or_else(|| ramp.max_vus());
            let duration = cfg
                .duration
                .or(opts.duration)
                .unwrap_or_else(|| ramp.total_duration());
            ScenarioExecutor::constant(vus, duration)
        }
        ScenarioExecutorKind::ConstantVus => {
            let vus = cfg.vus.or(opts.vus).unwrap_or(1);
            let duration = cfg
                .duration
                .or(opts.duration)
                .ok_or(Error::MissingDuration)?;
            ScenarioExecutor::constant(vus, duration)
        }
        ScenarioExecutorKind::RampingVus => {
            ScenarioExecutor::ramping(opts.start_vus.unwrap_or(0), opts.stages.clone())
        }
    };

    executor.validate()?;
    Ok(executor)
}

/// Think time between two iterations of the same VU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pause {
    #[default]
    None,
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl Pause {
    pub fn uniform(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidPause);
        }
        Ok(Self::Uniform { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if min >= max => min,
            Self::Uniform { min, max } => {
                let nanos = rng.gen_range(min.as_nanos()..=max.as_nanos());
                Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn constant_defaults_to_one_vu_and_requires_duration() {
        let opts = ScenarioOptions {
            duration: Some(secs(30)),
            ..Default::default()
        };
        let exec = executor_from_options(&opts, &RunConfig::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(exec, ScenarioExecutor::constant(1, secs(30)));

        let err = executor_from_options(&ScenarioOptions::default(), &RunConfig::default());
        assert!(matches!(err, Err(Error::MissingDuration)));
    }

    #[test]
    fn unknown_executor_is_rejected() {
        let opts = ScenarioOptions {
            executor: Some("per-vu-iterations".into()),
            ..Default::default()
        };
        assert!(matches!(
            executor_from_options(&opts, &RunConfig::default()),
            Err(Error::InvalidExecutor(name)) if name == "per-vu-iterations"
        ));
    }

    #[test]
    fn ramping_requires_stages_and_a_positive_peak() {
        let mut opts = ScenarioOptions {
            executor: Some("ramping-vus".into()),
            ..Default::default()
        };
        assert!(matches!(
            executor_from_options(&opts, &RunConfig::default()),
            Err(Error::InvalidStages)
        ));

        opts.stages = vec![Stage::new(secs(10), 0)];
        assert!(matches!(
            executor_from_options(&opts, &RunConfig::default()),
            Err(Error::InvalidVus)
        ));

        opts.stages = vec![Stage::new(Duration::ZERO, 5)];
        assert!(matches!(
            executor_from_options(&opts, &RunConfig::default()),
            Err(Error::InvalidStages)
        ));
    }

    #[test]
    fn overrides_collapse_ramping_into_constant() {
        let opts = ScenarioOptions {
            executor: Some("ramping-vus".into()),
            stages: vec![Stage::new(secs(60), 20), Stage::new(secs(60), 0)],
            ..Default::default()
        };

        let only_duration = RunConfig {
            duration: Some(secs(5)),
            ..Default::default()
        };
        assert_eq!(
            executor_from_options(&opts, &only_duration).ok(),
            Some(ScenarioExecutor::constant(20, secs(5)))
        );

        let only_vus = RunConfig {
            vus: Some(3),
            ..Default::default()
        };
        assert_eq!(
            executor_from_options(&opts, &only_vus).ok(),
            Some(ScenarioExecutor::constant(3, secs(120)))
        );
    }

    #[test]
    fn overrides_beat_plan_values_for_constant() {
        let opts = ScenarioOptions {
            vus: Some(10),
            duration: Some(secs(30)),
            ..Default::default()
        };
        let cfg = RunConfig {
            vus: Some(2),
            duration: None,
        };
        assert_eq!(
            executor_from_options(&opts, &cfg).ok(),
            Some(ScenarioExecutor::constant(2, secs(30)))
        );

        let zero = RunConfig {
            vus: Some(0),
            duration: None,
        };
        assert!(matches!(
            executor_from_options(&opts, &zero),
            Err(Error::InvalidVus)
        ));
    }

    #[test]
    fn executor_kind_parses_aliases() {
        assert_eq!(
            "constant".parse::<ScenarioExecutorKind>().ok(),
            Some(ScenarioExecutorKind::ConstantVus)
        );
        assert_eq!(ScenarioExecutorKind::RampingVus.to_string(), "ramping-vus");
        assert!(ScenarioExecutorKind::RampingVus.is_ramping());
    }

    #[test]
    fn uniform_pause_stays_in_range() {
        let pause = Pause::uniform(Duration::from_millis(10), Duration::from_millis(20))
            .unwrap_or_else(|e| panic!("{e}"));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let d = pause.sample(&mut rng);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert!(matches!(
            Pause::uniform(secs(2), secs(1)),
            Err(Error::InvalidPause)
        ));
        assert_eq!(Pause::None.sample(&mut rng), Duration::ZERO);
    }
}
