use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use rampr_core::rampr_http::{HttpRequest, HttpResponse, Method};
use rampr_core::{
    ExecResult, HookContext, Iteration, Pause, RunConfig, RunPlan, Scenario, ScenarioOptions,
    Stage, ThresholdSet, choose, executor_from_options,
};
use tracing::debug;

use crate::plan_yaml::{
    CheckYaml, HookRequestYaml, PauseYaml, PlanYaml, RequestYaml, ScenarioYaml,
};

/// One assertion against a response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CheckKind {
    Status(u16),
    MaxDuration(Duration),
    JsonEquals {
        path: String,
        equals: serde_json::Value,
    },
    BodyContains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Check {
    pub name: String,
    pub kind: CheckKind,
}

impl Check {
    fn from_yaml(raw: CheckYaml) -> anyhow::Result<Self> {
        let CheckYaml {
            name,
            status,
            max_duration,
            json,
            body_contains,
        } = raw;

        let mut kinds = Vec::new();
        if let Some(code) = status {
            kinds.push(CheckKind::Status(code));
        }
        if let Some(d) = max_duration {
            kinds.push(CheckKind::MaxDuration(d.into_inner()));
        }
        if let Some(j) = json {
            kinds.push(CheckKind::JsonEquals {
                path: j.path,
                equals: j.equals,
            });
        }
        if let Some(s) = body_contains {
            kinds.push(CheckKind::BodyContains(s));
        }

        let kind = match kinds.len() {
            1 => kinds.remove(0),
            0 => anyhow::bail!(
                "check needs one of `status`, `maxDuration`, `json`, `bodyContains`"
            ),
            _ => anyhow::bail!("check declares more than one assertion; split it into several"),
        };

        let name = name.unwrap_or_else(|| default_check_name(&kind));
        Ok(Self { name, kind })
    }

    pub(crate) fn passes(&self, res: &HttpResponse) -> bool {
        match &self.kind {
            CheckKind::Status(code) => res.status == *code,
            CheckKind::MaxDuration(limit) => res.timings.duration <= *limit,
            CheckKind::JsonEquals { path, equals } => {
                serde_json::from_slice::<serde_json::Value>(&res.body)
                    .ok()
                    .and_then(|doc| doc.pointer(&json_pointer(path)).cloned())
                    .is_some_and(|found| found == *equals)
            }
            CheckKind::BodyContains(needle) => res
                .body_utf8()
                .is_some_and(|body| body.contains(needle.as_str())),
        }
    }
}

fn default_check_name(kind: &CheckKind) -> String {
    match kind {
        CheckKind::Status(code) => format!("status is {code}"),
        CheckKind::MaxDuration(d) => format!("duration < {}", humantime::format_duration(*d)),
        CheckKind::JsonEquals { path, equals } => format!("json {path} == {equals}"),
        CheckKind::BodyContains(s) => format!("body contains {s}"),
    }
}

/// `a.b.0` → `/a/b/0`.
fn json_pointer(path: &str) -> String {
    let mut out = String::new();
    for seg in path.split('.').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(&seg.replace('~', "~0").replace('/', "~1"));
    }
    out
}

/// A ready-to-send request template.
#[derive(Debug, Clone)]
pub(crate) struct RequestSpec {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Option<Duration>,
    pub checks: Vec<Check>,
}

impl RequestSpec {
    fn new(
        url: String,
        method: Option<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let method = match method {
            Some(m) => Method::from_str(&m.to_ascii_uppercase())
                .with_context(|| format!("invalid HTTP method `{m}`"))?,
            None => Method::GET,
        };

        let mut headers: Vec<(String, String)> = headers.into_iter().collect();
        let body = match body {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(v) => {
                if !headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("content-type".to_string(), "application/json".to_string()));
                }
                Some(serde_json::to_string(&v).context("failed to encode request body")?)
            }
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout,
            checks: Vec::new(),
        })
    }

    fn from_yaml(raw: RequestYaml) -> anyhow::Result<(Self, u32)> {
        let url = raw.url.clone();
        let mut spec = Self::new(
            raw.url,
            raw.method,
            raw.headers,
            raw.body,
            raw.timeout.map(|d| d.into_inner()),
        )
        .with_context(|| format!("request `{url}`"))?;
        spec.checks = raw
            .checks
            .into_iter()
            .map(Check::from_yaml)
            .collect::<anyhow::Result<_>>()
            .with_context(|| format!("request `{url}`"))?;
        Ok((spec, raw.weight))
    }

    pub(crate) fn to_request(&self) -> HttpRequest {
        let mut req = HttpRequest::new(self.method.clone(), self.url.clone());
        req.headers = self.headers.clone();
        if let Some(body) = &self.body {
            req = req.with_body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            req = req.with_timeout(timeout);
        }
        req
    }
}

/// What every VU of one scenario loops over.
#[derive(Debug)]
pub(crate) struct ScenarioWorkload {
    requests: Vec<(RequestSpec, u32)>,
    error_metric: Option<String>,
}

impl ScenarioWorkload {
    /// Picks one request by weight, sends it and runs its checks.
    async fn iterate(&self, mut it: Iteration<()>) -> ExecResult {
        let Some(spec) = choose(it.rng(), &self.requests) else {
            return Ok(None);
        };

        let res = match it.request(spec.to_request()).await {
            Ok(res) => res,
            Err(err) => {
                if let Some(metric) = &self.error_metric {
                    it.add_rate(metric, true, &[]);
                }
                return Err(err.into());
            }
        };

        let mut all_passed = true;
        for check in &spec.checks {
            all_passed &= it.check(&check.name, check.passes(&res));
        }
        if let Some(metric) = &self.error_metric {
            it.add_rate(metric, !all_passed, &[]);
        }

        Ok(None)
    }
}

/// Runs a hook request and enforces its expected status.
async fn run_hook_request(
    ctx: HookContext,
    spec: Arc<RequestSpec>,
    expect_status: Option<u16>,
) -> Result<(), rampr_core::ExecError> {
    let res = ctx.client.request(spec.to_request()).await?;
    if let Some(expected) = expect_status
        && res.status != expected
    {
        return Err(format!(
            "{} {} returned status {} (expected {expected})",
            spec.method, spec.url, res.status
        )
        .into());
    }
    debug!(url = spec.url.as_str(), status = res.status, "hook request done");
    Ok(())
}

fn hook_spec(raw: HookRequestYaml) -> anyhow::Result<(Arc<RequestSpec>, Option<u16>)> {
    let url = raw.url.clone();
    let spec = RequestSpec::new(
        raw.url,
        raw.method,
        raw.headers,
        raw.body,
        raw.timeout.map(|d| d.into_inner()),
    )
    .with_context(|| format!("hook request `{url}`"))?;
    Ok((Arc::new(spec), raw.expect_status))
}

fn pause_from_yaml(raw: Option<PauseYaml>) -> anyhow::Result<Pause> {
    Ok(match raw {
        None => Pause::None,
        Some(PauseYaml::Fixed(d)) if d.into_inner().is_zero() => Pause::None,
        Some(PauseYaml::Fixed(d)) => Pause::Fixed(d.into_inner()),
        Some(PauseYaml::Range { min, max }) => Pause::uniform(min.into_inner(), max.into_inner())?,
    })
}

fn scenario_from_yaml(
    raw: ScenarioYaml,
    index: usize,
    cfg: &RunConfig,
    error_metric: Option<&str>,
) -> anyhow::Result<Scenario<()>> {
    let name = raw
        .name
        .clone()
        .unwrap_or_else(|| format!("scenario_{}", index + 1));

    let opts = ScenarioOptions {
        executor: raw.executor,
        vus: raw.vus,
        duration: raw.duration.map(|d| d.into_inner()),
        start_vus: raw.start_vus,
        stages: raw
            .stages
            .into_iter()
            .map(|s| Stage::new(s.duration.into_inner(), s.target))
            .collect(),
    };
    let executor = executor_from_options(&opts, cfg)?;

    if raw.requests.is_empty() {
        anyhow::bail!("`requests` must not be empty");
    }
    let requests = raw
        .requests
        .into_iter()
        .map(RequestSpec::from_yaml)
        .collect::<anyhow::Result<Vec<_>>>()?;
    if requests.iter().all(|(_, w)| *w == 0) {
        anyhow::bail!("at least one request needs a positive `weight`");
    }

    let workload = Arc::new(ScenarioWorkload {
        requests,
        error_metric: error_metric.map(str::to_string),
    });

    let mut scenario = Scenario::new(name, executor, move |it| {
        let workload = workload.clone();
        async move { workload.iterate(it).await }
    })
    .with_tags(raw.tags)
    .with_pause(pause_from_yaml(raw.pause)?)
    .abort_on_transport_error(raw.abort_on_transport_error);

    if let Some(grace) = raw.graceful_stop {
        scenario = scenario.with_graceful_stop(grace.into_inner());
    }
    if let Some(seed) = raw.seed {
        scenario = scenario.with_seed(seed);
    }
    Ok(scenario)
}

fn thresholds_from_yaml(doc: &PlanYaml) -> anyhow::Result<Vec<ThresholdSet>> {
    doc.thresholds
        .iter()
        .map(|(metric, raw)| {
            let (exprs, abort_on_fail) = raw.clone().into_parts();
            if exprs.is_empty() {
                anyhow::bail!("invalid thresholds for `{metric}`: empty list");
            }
            let set = ThresholdSet::new(metric.clone(), exprs).abort_on_fail(abort_on_fail);
            set.compile()?;
            Ok(set)
        })
        .collect()
}

/// Turns a parsed plan into a runnable one. Everything is validated here so a bad plan never
/// starts traffic.
pub(crate) fn build(doc: PlanYaml, cfg: &RunConfig) -> anyhow::Result<RunPlan<()>> {
    let thresholds = thresholds_from_yaml(&doc)?;

    let setup = doc.setup.map(hook_spec).transpose().context("setup")?;
    let teardown = doc.teardown.map(hook_spec).transpose().context("teardown")?;

    let mut plan = match setup {
        Some((spec, expect)) => RunPlan::with_setup(move |ctx| run_hook_request(ctx, spec, expect)),
        None => RunPlan::new(),
    };

    let error_metric = doc.error_metric.as_deref();
    for (idx, raw) in doc.scenarios.into_iter().enumerate() {
        let label = raw
            .name
            .clone()
            .unwrap_or_else(|| format!("scenario_{}", idx + 1));
        let scenario = scenario_from_yaml(raw, idx, cfg, error_metric)
            .with_context(|| format!("scenario `{label}`"))?;
        plan = plan.scenario(scenario);
    }

    if let Some((spec, expect)) = teardown {
        plan = plan.teardown(move |ctx, _| run_hook_request(ctx, spec, expect));
    }

    Ok(plan.thresholds(thresholds))
}
