use std::time::Duration;

use rampr_core::{RunConfig, ScenarioExecutor, ScenarioOptions, Stage, executor_from_options};

#[test]
fn cli_overrides_convert_ramping_vus_to_constant_vus() {
    let opts = ScenarioOptions {
        executor: Some("ramping-vus".to_string()),
        // Missing ramp fields are irrelevant once the CLI dictates the shape.
        stages: vec![],
        start_vus: None,
        vus: None,
        duration: None,
    };

    let cfg = RunConfig {
        vus: Some(1),
        duration: Some(Duration::from_secs(2)),
    };

    let executor = executor_from_options(&opts, &cfg)
        .unwrap_or_else(|e| panic!("expected scenario to be valid: {e}"));
    assert_eq!(executor, ScenarioExecutor::constant(1, Duration::from_secs(2)));
}

#[test]
fn ramping_vus_still_validates_when_no_cli_overrides() {
    let opts = ScenarioOptions {
        executor: Some("ramping-vus".to_string()),
        stages: vec![Stage::new(Duration::from_secs(1), 2)],
        start_vus: Some(1),
        ..ScenarioOptions::default()
    };

    let executor = executor_from_options(&opts, &RunConfig::default())
        .unwrap_or_else(|e| panic!("expected scenario to be valid: {e}"));

    match executor {
        ScenarioExecutor::RampingVus { start_vus, stages } => {
            assert_eq!(start_vus, 1);
            assert_eq!(stages, vec![Stage::new(Duration::from_secs(1), 2)]);
        }
        other => panic!("expected ramping-vus executor, got {other:?}"),
    }

    let broken = ScenarioOptions {
        stages: vec![],
        ..opts
    };
    assert!(executor_from_options(&broken, &RunConfig::default()).is_err());
}
