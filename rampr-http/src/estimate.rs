use crate::util::{has_header, host_header_value, parse_http_url};
use crate::{Error, HttpRequest, Result};

/// Estimated HTTP/1.1 wire size of `req`: request line, headers, blank line and body.
///
/// Host and Content-Length are counted even when the caller did not set them, since the client
/// always sends them.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    estimate_http_request_bytes_parts(&req.method, &req.url, &req.headers, req.body.len() as u64)
}

pub(crate) fn estimate_http_request_bytes_parts(
    method: &http::Method,
    url: &str,
    headers: &[(String, String)],
    body_len: u64,
) -> Result<u64> {
    let parsed = parse_http_url(url)?;
    let uri: hyper::Uri = url
        .parse()
        .map_err(|_| Error::InvalidUrl(url.to_string()))?;

    let mut bytes = 0u64;
    bytes = bytes.saturating_add(estimate_http1_request_line_bytes(method, &uri));

    for (k, v) in headers {
        bytes = bytes.saturating_add(estimate_http1_header_bytes(k.as_bytes(), v.as_bytes()));
    }

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        bytes = bytes.saturating_add(estimate_http1_header_bytes(b"host", host.as_bytes()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(estimate_http1_header_bytes(b"content-length", v.as_bytes()));
    }

    bytes = bytes.saturating_add(2);
    bytes = bytes.saturating_add(body_len);
    Ok(bytes)
}

fn estimate_http1_request_line_bytes(method: &http::Method, uri: &hyper::Uri) -> u64 {
    let method_len = method.as_str().len() as u64;
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let path_len = path.len() as u64;
    let version_len = "HTTP/1.1".len() as u64;

    // "METHOD SP path SP HTTP/1.1 CRLF"
    method_len
        .saturating_add(1)
        .saturating_add(path_len)
        .saturating_add(1)
        .saturating_add(version_len)
        .saturating_add(2)
}

pub(crate) fn estimate_http1_response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let mut bytes = 0u64;
    bytes = bytes.saturating_add(estimate_http1_status_line_bytes(version, status));
    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(estimate_http1_header_bytes(
            name.as_str().as_bytes(),
            value.as_bytes(),
        ));
    }
    bytes.saturating_add(2)
}

fn estimate_http1_status_line_bytes(version: http::Version, status: http::StatusCode) -> u64 {
    let version_str = match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2",
        http::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };

    // "HTTP/1.1 SP 200 CRLF"; the reason phrase is not counted.
    (version_str.len() as u64)
        .saturating_add(1)
        .saturating_add(status.as_str().len() as u64)
        .saturating_add(2)
}

fn estimate_http1_header_bytes(name: &[u8], value: &[u8]) -> u64 {
    // "name: value\r\n"
    (name.len() as u64)
        .saturating_add(2)
        .saturating_add(value.len() as u64)
        .saturating_add(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_counts_request_line_host_and_blank_line() {
        let req = HttpRequest::get("http://127.0.0.1:8080/api/performance/fast");
        let expected = "GET /api/performance/fast HTTP/1.1\r\n".len()
            + "host: 127.0.0.1:8080\r\n".len()
            + "\r\n".len();
        assert_eq!(estimate_http_request_bytes(&req).ok(), Some(expected as u64));
    }

    #[test]
    fn body_adds_content_length_and_payload() {
        let req = HttpRequest::post("http://h/data", "{\"a\":1}").with_header("x-test", "1");
        let expected = "POST /data HTTP/1.1\r\n".len()
            + "x-test: 1\r\n".len()
            + "host: h\r\n".len()
            + "content-length: 7\r\n".len()
            + "\r\n".len()
            + 7;
        assert_eq!(estimate_http_request_bytes(&req).ok(), Some(expected as u64));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let req = HttpRequest::get("ws://h/socket");
        assert!(matches!(
            estimate_http_request_bytes(&req),
            Err(Error::UnsupportedScheme(_))
        ));
    }
}
