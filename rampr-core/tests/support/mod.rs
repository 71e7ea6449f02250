#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rampr_core::rampr_http::{self, HttpRequest, HttpResponse, HttpTransport, Timings};

/// In-process transport answering every request after a fixed latency.
#[derive(Debug)]
pub struct StubTransport {
    latency: Duration,
    status: u16,
    fail: bool,
    completed: AtomicU64,
}

impl StubTransport {
    pub fn ok(latency: Duration) -> Self {
        Self::with_status(latency, 200)
    }

    pub fn with_status(latency: Duration, status: u16) -> Self {
        Self {
            latency,
            status,
            fail: false,
            completed: AtomicU64::new(0),
        }
    }

    /// Every request times out.
    pub fn failing(latency: Duration) -> Self {
        Self {
            fail: true,
            ..Self::ok(latency)
        }
    }

    /// Exchanges that ran to completion (successful or not).
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn request(&self, _req: HttpRequest) -> rampr_http::Result<HttpResponse> {
        tokio::time::sleep(self.latency).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(rampr_http::Error::Timeout(self.latency));
        }
        Ok(HttpResponse {
            status: self.status,
            body: Bytes::from_static(br#"{"message":"Fast response"}"#),
            headers: vec![("content-type".into(), "application/json".into())],
            timings: Timings {
                waiting: self.latency,
                receiving: Duration::ZERO,
                duration: self.latency,
            },
            bytes_sent: 64,
            bytes_received: 128,
        })
    }
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub const FAST_URL: &str = "http://stub.local/api/performance/fast";
