use std::fmt;

use crate::error::{Error, Result};

/// Thresholds declared for one metric selector, e.g. `http_req_duration{scenario:load}`.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
    /// Re-evaluate while the run is in flight and cancel it on the first failure.
    pub abort_on_fail: bool,
}

impl ThresholdSet {
    pub fn new(metric: impl Into<String>, expressions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
            abort_on_fail: false,
        }
    }

    #[must_use]
    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    pub fn compile(&self) -> Result<Vec<Threshold>> {
        let invalid = |error: String| Error::InvalidThreshold {
            metric: self.metric.clone(),
            error,
        };

        let selector = parse_selector(&self.metric).map_err(invalid)?;
        self.expressions
            .iter()
            .map(|raw| {
                let expr = parse_threshold_expr(raw).map_err(invalid)?;
                Ok(Threshold {
                    selector: selector.clone(),
                    source: raw.trim().to_string(),
                    expr,
                    abort_on_fail: self.abort_on_fail,
                })
            })
            .collect()
    }
}

/// Metric name plus an optional tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.tags.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub selector: MetricSelector,
    /// The expression as written by the user.
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Lte => observed <= expected,
            Self::Gt => observed > expected,
            Self::Gte => observed >= expected,
            Self::Eq => observed == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// `name` or `name{key:value,...}`.
pub fn parse_selector(raw: &str) -> std::result::Result<MetricSelector, String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() || raw.contains('}') {
            return Err(format!("invalid metric name `{raw}`"));
        }
        return Ok(MetricSelector {
            name: raw.to_string(),
            tags: Vec::new(),
        });
    };

    let name = raw[..open].trim();
    let inner = raw[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag filter in `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("missing metric name in `{raw}`"));
    }

    let mut tags = Vec::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once(':')
            .ok_or_else(|| format!("tag filter `{pair}` must be `key:value`"))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(format!("tag filter `{pair}` must be `key:value`"));
        }
        tags.push((k.to_string(), v.to_string()));
    }

    Ok(MetricSelector {
        name: name.to_string(),
        tags,
    })
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}` in threshold: {raw}"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}
