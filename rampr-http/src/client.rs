use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::estimate::{estimate_http_request_bytes_parts, estimate_http1_response_head_bytes};
use crate::util::{has_header, host_header_value, parse_http_url};
use crate::{Error, HttpRequest, HttpResponse, HttpTransport, Result, Timings};

/// Pooled hyper client (HTTP/1.1 over plain TCP or rustls).
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    default_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // Keep unreachable hosts from stalling a short run on the OS connect timeout.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self {
            inner,
            default_timeout: None,
        }
    }

    /// Timeout applied to requests that do not carry their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.execute(HttpRequest::get(url)).await
    }

    pub async fn execute(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout.or(self.default_timeout);
        let started = Instant::now();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.exchange(req, started)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => self.exchange(req, started).await,
        }
    }

    async fn exchange(&self, req: HttpRequest, started: Instant) -> Result<HttpResponse> {
        let parsed = parse_http_url(&req.url)?;
        let bytes_sent = estimate_http_request_bytes_parts(
            &req.method,
            &req.url,
            &req.headers,
            req.body.len() as u64,
        )?;

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Send Host/Content-Length explicitly so the byte estimate matches what goes out.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;
        let res: hyper::Response<Incoming> = self.inner.request(request).await?;
        let head_at = Instant::now();

        let (parts, body) = res.into_parts();
        let headers = merge_headers(&parts.headers);
        let head_bytes =
            estimate_http1_response_head_bytes(parts.version, parts.status, &parts.headers);

        let body = body.collect().await?.to_bytes();
        let done_at = Instant::now();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            body,
            headers,
            timings: Timings {
                waiting: head_at.saturating_duration_since(started),
                receiving: done_at.saturating_duration_since(head_at),
                duration: done_at.saturating_duration_since(started),
            },
            bytes_sent,
        })
    }
}

/// Lowercased names; repeated headers are joined with ", ".
fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
        merged
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|cur| {
                if !cur.is_empty() {
                    cur.push_str(", ");
                }
                cur.push_str(&v);
            })
            .or_insert(v);
    }
    merged.into_iter().collect()
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        self.execute(req).await
    }
}
