pub(crate) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

/// `host[:port]`; `Url::port` is already `None` for the scheme's default port.
pub(crate) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

pub(crate) fn parse_http_url(raw: &str) -> crate::Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|_| crate::Error::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(crate::Error::UnsupportedScheme(raw.to_string())),
    }
}
