use std::time::Duration;

pub(crate) fn format_bytes(b: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];

    UNITS
        .iter()
        .find(|(_, size)| b >= *size)
        .map_or_else(
            || format!("{b}B"),
            |(unit, size)| format!("{:.2}{unit}", b as f64 / *size as f64),
        )
}

/// `{k=v k2=v2}` sorted by key, or nothing when no tag survives `exclude`.
pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut kept: Vec<&(String, String)> = tags
        .iter()
        .filter(|(k, _)| !exclude.contains(&k.as_str()))
        .collect();
    if kept.is_empty() {
        return String::new();
    }
    kept.sort();

    let inner = kept
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{{{inner}}}")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

/// Single rounded component: `us`, `ms` or `s` (with one decimal below a minute).
pub(crate) fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        return format!("{micros}us");
    }
    if micros < 1_000_000 {
        return format!("{:.2}ms", micros as f64 / 1_000.0);
    }
    if micros < 60_000_000 {
        return format!("{:.1}s", d.as_secs_f64());
    }
    format!("{}s", (d.as_secs_f64()).round() as u64)
}

/// Trend values are milliseconds.
pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    match ms {
        Some(v) if v.is_finite() && v >= 0.0 => format_duration(Duration::from_secs_f64(v / 1_000.0)),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MiB");
    }

    #[test]
    fn tags_are_sorted_and_filtered() {
        let tags = vec![
            ("status".to_string(), "200".to_string()),
            ("scenario".to_string(), "s1".to_string()),
            ("method".to_string(), "GET".to_string()),
        ];
        assert_eq!(format_tags_inline(&tags, &["scenario"]), "{method=GET status=200}");
        assert_eq!(format_tags_inline(&tags[1..2], &["scenario"]), "");
    }

    #[test]
    fn durations_pick_one_unit() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_micros(12_340)), "12.34ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_ms_opt(Some(2.5)), "2.50ms");
        assert_eq!(format_ms_opt(None), "-");
    }
}
