use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// Top-level plan document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanYaml {
    /// Rate metric fed with "some check failed" once per iteration.
    #[serde(default)]
    pub error_metric: Option<String>,

    /// Timeout for requests that do not set their own.
    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub setup: Option<HookRequestYaml>,

    #[serde(default)]
    pub teardown: Option<HookRequestYaml>,

    pub scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// Scenario name (metrics scenario tag).
    #[serde(default)]
    pub name: Option<String>,

    /// Executor kind: constant-vus | ramping-vus
    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default)]
    pub vus: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Scenario-level tags.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub pause: Option<PauseYaml>,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub abort_on_transport_error: bool,

    pub requests: Vec<RequestYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

/// `100ms` or `{ min: 0s, max: 2s }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PauseYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub headers: BTreeMap<String, String>,

    /// Strings are sent as-is; anything else is encoded as JSON.
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub checks: Vec<CheckYaml>,
}

fn default_weight() -> u32 {
    1
}

/// One-off request run by the setup or teardown hook.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct HookRequestYaml {
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub expect_status: Option<u16>,
}

/// Exactly one of the assertion fields must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    #[serde(default)]
    pub json: Option<JsonCheckYaml>,

    #[serde(default)]
    pub body_contains: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct JsonCheckYaml {
    /// Dot-separated; numeric segments index arrays.
    pub path: String,
    pub equals: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
    Detailed {
        thresholds: Vec<String>,
        #[serde(rename = "abortOnFail", default)]
        abort_on_fail: bool,
    },
}

impl ThresholdExprYaml {
    pub(crate) fn into_parts(self) -> (Vec<String>, bool) {
        match self {
            Self::One(s) => (vec![s], false),
            Self::Many(v) => (v, false),
            Self::Detailed {
                thresholds,
                abort_on_fail,
            } => (thresholds, abort_on_fail),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0.0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// Replaces every `${NAME}` with its value from `env`. Unknown names are an error so a typo
/// does not silently send traffic to a half-built URL.
pub(crate) fn substitute_env(raw: &str, env: &BTreeMap<String, String>) -> anyhow::Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated `${{` in plan near `{}`", preview(&rest[start..])))?;
        let name = after[..end].trim();
        if name.is_empty() {
            anyhow::bail!("empty `${{}}` placeholder in plan");
        }
        let value = env
            .get(name)
            .with_context(|| format!("plan references undefined variable `{name}` (set it in the environment or pass --env {name}=...)"))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn preview(s: &str) -> &str {
    let end = s.char_indices().nth(24).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

/// Substitutes inside every string key and value of a parsed document; comments are gone by then.
///
/// A value that is exactly one placeholder is read back as a YAML number or bool when the
/// substituted text is one, so `vus: ${VUS}` stays an integer.
fn substitute_value(value: &mut serde_yaml::Value, env: &BTreeMap<String, String>) -> anyhow::Result<()> {
    use serde_yaml::Value;

    match value {
        Value::String(s) if s.contains("${") => {
            let whole = is_single_placeholder(s);
            let out = substitute_env(s, env)?;
            *value = if whole { typed_scalar(out) } else { Value::String(out) };
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_value(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (k, mut v) in std::mem::take(map) {
                let k = match k {
                    Value::String(s) => Value::String(substitute_env(&s, env)?),
                    other => other,
                };
                substitute_value(&mut v, env)?;
                map.insert(k, v);
            }
        }
        Value::Tagged(tagged) => substitute_value(&mut tagged.value, env)?,
        _ => {}
    }
    Ok(())
}

fn is_single_placeholder(s: &str) -> bool {
    let t = s.trim();
    t.len() > 3 && t.starts_with("${") && t.find('}') == Some(t.len() - 1)
}

fn typed_scalar(text: String) -> serde_yaml::Value {
    match serde_yaml::from_str::<serde_yaml::Value>(&text) {
        Ok(v @ (serde_yaml::Value::Number(_) | serde_yaml::Value::Bool(_))) => v,
        _ => serde_yaml::Value::String(text),
    }
}

/// Parses the document, substitutes variables in its values, then maps it onto [`PlanYaml`].
pub(crate) fn parse_plan(raw: &str, env: &BTreeMap<String, String>) -> anyhow::Result<PlanYaml> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(raw).context("failed to parse plan YAML")?;
    substitute_value(&mut value, env)?;
    let doc: PlanYaml = serde_yaml::from_value(value).context("failed to parse plan YAML")?;
    if doc.scenarios.is_empty() {
        anyhow::bail!("plan declares no scenarios");
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const PLAN: &str = r#"
errorMetric: errors
requestTimeout: 15s
setup: { url: "${BASE_URL}/api/performance/fast", expectStatus: 200 }
scenarios:
  - name: baseline
    executor: constant-vus
    vus: 10
    duration: 30s
    gracefulStop: 5s
    tags: { test_type: baseline, build: 42 }
    pause: 100ms
    requests:
      - url: "${BASE_URL}/api/performance/fast"
        weight: 40
        checks:
          - status: 200
          - maxDuration: 100ms
          - json: { path: message, equals: "Fast response" }
          - bodyContains: "Fast"
            name: body mentions fast
      - url: "${BASE_URL}/api/performance/data"
        method: POST
        body: { fields: 3 }
  - name: ramp
    executor: ramping-vus
    startVUs: 0
    pause: { min: 0s, max: 2s }
    stages:
      - { duration: 10s, target: 5 }
      - { duration: 1.5, target: 0 }
    requests:
      - url: "${BASE_URL}/api/performance/random"
thresholds:
  http_req_duration: ["p(95)<500", "p(99)<1000"]
  http_req_failed: "rate<0.1"
  "checks{scenario:ramp}": { thresholds: ["rate>0.9"], abortOnFail: true }
"#;

    #[test]
    fn parses_full_plan() {
        let doc = parse_plan(PLAN, &env(&[("BASE_URL", "http://localhost:1")]))
            .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(doc.error_metric.as_deref(), Some("errors"));
        assert_eq!(
            doc.request_timeout.map(YamlDuration::into_inner),
            Some(Duration::from_secs(15))
        );
        let setup = doc.setup.unwrap_or_else(|| panic!("missing setup"));
        assert_eq!(setup.url, "http://localhost:1/api/performance/fast");
        assert_eq!(setup.expect_status, Some(200));

        assert_eq!(doc.scenarios.len(), 2);
        let baseline = &doc.scenarios[0];
        assert_eq!(baseline.vus, Some(10));
        assert_eq!(
            baseline.graceful_stop.map(YamlDuration::into_inner),
            Some(Duration::from_secs(5))
        );
        assert_eq!(baseline.tags.get("build").map(String::as_str), Some("42"));
        assert!(matches!(baseline.pause, Some(PauseYaml::Fixed(d)) if d.into_inner() == Duration::from_millis(100)));
        assert_eq!(baseline.requests[0].weight, 40);
        assert_eq!(baseline.requests[0].checks.len(), 4);
        assert_eq!(
            baseline.requests[0].checks[3].name.as_deref(),
            Some("body mentions fast")
        );
        assert_eq!(baseline.requests[1].weight, 1);

        let ramp = &doc.scenarios[1];
        assert_eq!(ramp.start_vus, Some(0));
        assert_eq!(ramp.stages[1].duration.into_inner(), Duration::from_millis(1500));
        assert!(matches!(ramp.pause, Some(PauseYaml::Range { .. })));

        let (exprs, abort) = doc.thresholds["checks{scenario:ramp}"].clone().into_parts();
        assert_eq!(exprs, vec!["rate>0.9".to_string()]);
        assert!(abort);
        let (exprs, abort) = doc.thresholds["http_req_failed"].clone().into_parts();
        assert_eq!(exprs, vec!["rate<0.1".to_string()]);
        assert!(!abort);
    }

    #[test]
    fn substitution_fills_known_and_rejects_unknown_variables() {
        let vars = env(&[("HOST", "example.test"), ("PORT", "8080")]);
        assert_eq!(
            substitute_env("http://${HOST}:${ PORT }/x", &vars).unwrap_or_else(|e| panic!("{e:#}")),
            "http://example.test:8080/x"
        );
        assert_eq!(
            substitute_env("no placeholders", &vars).unwrap_or_else(|e| panic!("{e:#}")),
            "no placeholders"
        );

        let err = substitute_env("${MISSING}/x", &vars).err();
        assert!(err.is_some_and(|e| e.to_string().contains("MISSING")));
        assert!(substitute_env("${HOST", &vars).is_err());
        assert!(substitute_env("${}", &vars).is_err());
    }

    #[test]
    fn unknown_fields_and_empty_plans_are_rejected() {
        let typo = "scenarios:\n  - name: a\n    vu: 3\n    requests: [{ url: http://x }]\n";
        assert!(parse_plan(typo, &BTreeMap::new()).is_err());

        assert!(parse_plan("scenarios: []\n", &BTreeMap::new()).is_err());
    }

    #[test]
    fn durations_accept_strings_and_numbers() {
        let d: YamlDuration = serde_yaml::from_str("250ms").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(d.into_inner(), Duration::from_millis(250));
        let d: YamlDuration = serde_yaml::from_str("3").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(d.into_inner(), Duration::from_secs(3));
        assert!(serde_yaml::from_str::<YamlDuration>("-1").is_err());
        assert!(serde_yaml::from_str::<YamlDuration>("soon").is_err());
    }

    #[test]
    fn variables_in_comments_are_ignored_and_whole_placeholders_keep_their_type() {
        let raw = r#"
# point ${UNSET_IN_COMMENT} at staging when needed
scenarios:
  - name: "${NAME}"   # ${ALSO_UNSET}
    vus: ${VUS}
    duration: ${DURATION}
    requests:
      - url: "${BASE_URL}/api/performance/fast"
thresholds:
  "http_reqs{scenario:${NAME}}": "count>0"
"#;
        let vars = env(&[
            ("NAME", "smoke"),
            ("VUS", "5"),
            ("DURATION", "1.5"),
            ("BASE_URL", "http://127.0.0.1:9"),
        ]);
        let doc = parse_plan(raw, &vars).unwrap_or_else(|e| panic!("{e:#}"));

        let s = &doc.scenarios[0];
        assert_eq!(s.name.as_deref(), Some("smoke"));
        assert_eq!(s.vus, Some(5));
        assert_eq!(s.duration.map(YamlDuration::into_inner), Some(Duration::from_millis(1500)));
        assert_eq!(s.requests[0].url, "http://127.0.0.1:9/api/performance/fast");
        assert!(doc.thresholds.contains_key("http_reqs{scenario:smoke}"));

        let err = parse_plan(raw, &env(&[("NAME", "smoke")])).err();
        assert!(err.is_some_and(|e| format!("{e:#}").contains("VUS")));
    }

    #[test]
    fn out_of_range_float_durations_are_errors() {
        assert!(serde_yaml::from_str::<YamlDuration>("1e30").is_err());
        assert!(serde_yaml::from_str::<YamlDuration>(".nan").is_err());
        assert!(serde_yaml::from_str::<YamlDuration>(".inf").is_err());
        assert!(serde_yaml::from_str::<YamlDuration>("-0.5").is_err());

        let huge = "scenarios:\n  - duration: 1e30\n    requests: [{ url: 'http://x' }]\n";
        let err = parse_plan(huge, &BTreeMap::new()).err();
        assert!(err.is_some_and(|e| format!("{e:#}").contains("invalid duration")));
    }
}
