use anyhow::Context as _;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rampr_core::rampr_http::HttpClient;
use rampr_core::{RunConfig, RunContext, RunResult};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::{plan, plan_yaml};

/// Applied to requests when neither the request nor the plan sets a timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let raw = read_plan(&args.plan).await.map_err(RunError::InvalidInput)?;
    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let cfg = run_config(&args);

    let doc = plan_yaml::parse_plan(&raw, &env)
        .with_context(|| format!("invalid plan: {}", args.plan.display()))
        .map_err(RunError::InvalidInput)?;
    let request_timeout = request_timeout(&doc);
    let mut plan = plan::build(doc, &cfg)
        .with_context(|| format!("invalid plan: {}", args.plan.display()))
        .map_err(RunError::InvalidInput)?;

    out.print_header(args.plan.as_path(), plan.scenarios());
    if let Some(progress) = out.progress() {
        plan = plan.progress(progress);
    }
    if let Some(timeout) = args.timeout {
        plan = plan.run_timeout(timeout);
    }

    let client = HttpClient::default().with_default_timeout(Some(request_timeout));
    let ctx = RunContext::new(Arc::new(client));
    let abort = ctx.abort.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping scenarios");
            abort.cancel();
        }
    });

    info!(plan = %args.plan.display(), "starting run");
    let result = rampr_core::run(plan, &ctx).await;
    ctrl_c.abort();
    let result = result?;

    out.print_summary(&result).map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_export {
        output::json::export_summary(path, &result)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    print_threshold_violations(&result);
    print_faults(&result);

    Ok(ExitCode::from_status(result.status))
}

async fn read_plan(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))
}

fn request_timeout(doc: &plan_yaml::PlanYaml) -> Duration {
    doc.request_timeout
        .map_or(DEFAULT_REQUEST_TIMEOUT, plan_yaml::YamlDuration::into_inner)
}

fn run_config(args: &RunArgs) -> RunConfig {
    RunConfig {
        vus: args.vus,
        duration: args.duration,
    }
}

fn print_threshold_violations(result: &RunResult) {
    let failed: Vec<_> = result.failed_thresholds().collect();
    if failed.is_empty() {
        return;
    }

    eprintln!("thresholds_failed: {}", failed.len());
    for v in failed {
        match v.observed {
            Some(o) => eprintln!(
                "threshold_failed: metric={} expr={} observed={o}",
                v.metric, v.expression
            ),
            None => eprintln!(
                "threshold_failed: metric={} expr={} observed=-",
                v.metric, v.expression
            ),
        }
    }
}

fn print_faults(result: &RunResult) {
    for f in &result.faults {
        eprintln!("fault: {f}");
    }
}

/// Process env first, `--env` entries on top.
fn merged_env(overrides: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut map: BTreeMap<String, String> = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(map)
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_splits_on_first_equals() {
        let (k, v) = parse_env_override("TOKEN=a=b").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(k, "TOKEN");
        assert_eq!(v, "a=b");

        let (_, empty) = parse_env_override("EMPTY=").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(empty, "");
    }

    #[test]
    fn env_override_rejects_malformed_entries() {
        assert!(parse_env_override("NOVALUE").is_err());
        assert!(parse_env_override("=value").is_err());
    }

    #[test]
    fn plan_request_timeout_falls_back_to_default() {
        let parse = |raw: &str| {
            plan_yaml::parse_plan(raw, &BTreeMap::new()).unwrap_or_else(|e| panic!("{e:#}"))
        };
        let scenarios = "scenarios:\n  - duration: 1s\n    requests: [{ url: 'http://x' }]\n";

        let doc = parse(scenarios);
        assert_eq!(request_timeout(&doc), DEFAULT_REQUEST_TIMEOUT);

        let doc = parse(&format!("requestTimeout: 250ms\n{scenarios}"));
        assert_eq!(request_timeout(&doc), Duration::from_millis(250));
    }

    #[test]
    fn cli_env_wins_over_process_env() {
        let env = merged_env(&[
            "PATH=/overridden".to_string(),
            "RAMPR_TEST_ONLY_VAR=1".to_string(),
        ])
        .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/overridden"));
        assert_eq!(env.get("RAMPR_TEST_ONLY_VAR").map(String::as_str), Some("1"));
    }
}
