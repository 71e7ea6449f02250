use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const API_PREFIX: &str = "/api/performance";

pub const PATH_FAST: &str = "/api/performance/fast";
pub const PATH_SLOW: &str = "/api/performance/slow";
pub const PATH_VARIABLE: &str = "/api/performance/variable/{complexity}";
pub const PATH_RANDOM: &str = "/api/performance/random";
pub const PATH_DATA: &str = "/api/performance/data";
pub const PATH_MEMORY: &str = "/api/performance/memory";
pub const PATH_METRICS: &str = "/api/performance/metrics";
pub const PATH_STATUS: &str = "/status/{code}";

const DEFAULT_SLOW_DELAY_MS: u64 = 500;
const MAX_DATA_PROCESSING_MS: u64 = 1_000;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    fast: Arc<AtomicU64>,
    slow: Arc<AtomicU64>,
    variable: Arc<AtomicU64>,
    random: Arc<AtomicU64>,
    data: Arc<AtomicU64>,
    memory: Arc<AtomicU64>,
}

impl TestServerStats {
    fn hit(&self, endpoint: &AtomicU64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        endpoint.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn fast_calls(&self) -> u64 {
        self.fast.load(Ordering::Relaxed)
    }

    pub fn slow_calls(&self) -> u64 {
        self.slow.load(Ordering::Relaxed)
    }

    fn to_json(&self) -> Value {
        json!({
            "requests_total": self.requests_total(),
            "performance.fast.calls": self.fast.load(Ordering::Relaxed),
            "performance.slow.calls": self.slow.load(Ordering::Relaxed),
            "performance.variable.calls": self.variable.load(Ordering::Relaxed),
            "performance.random.calls": self.random.load(Ordering::Relaxed),
            "performance.data.calls": self.data.load(Ordering::Relaxed),
            "performance.memory.calls": self.memory.load(Ordering::Relaxed),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub fast: String,
    pub slow: String,
    pub random: String,
    pub data: String,
    pub memory: String,
    pub metrics: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            fast: format!("{base_url}{PATH_FAST}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            random: format!("{base_url}{PATH_RANDOM}"),
            data: format!("{base_url}{PATH_DATA}"),
            memory: format!("{base_url}{PATH_MEMORY}"),
            metrics: format!("{base_url}{PATH_METRICS}"),
            base_url,
        }
    }

    pub fn slow_with_delay(&self, delay_ms: u64) -> String {
        format!("{}?delayMs={delay_ms}", self.slow)
    }

    pub fn variable(&self, complexity: u32) -> String {
        format!("{}{API_PREFIX}/variable/{complexity}", self.base_url)
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

async fn handle_fast(State(stats): State<TestServerStats>) -> Json<Value> {
    stats.hit(&stats.fast);
    Json(json!({ "message": "Fast response", "timestamp": now_millis() }))
}

#[derive(Debug, Deserialize)]
struct SlowQuery {
    #[serde(rename = "delayMs")]
    delay_ms: Option<u64>,
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<SlowQuery>,
) -> Json<Value> {
    let delay_ms = query.delay_ms.unwrap_or(DEFAULT_SLOW_DELAY_MS);
    sleep(Duration::from_millis(delay_ms)).await;
    stats.hit(&stats.slow);
    Json(json!({
        "message": "Slow response completed",
        "delayMs": delay_ms,
        "timestamp": now_millis(),
    }))
}

/// Burns CPU proportionally to `complexity`.
pub fn variable_work(complexity: u32) -> f64 {
    let mut result = 0.0f64;
    for i in 0..u64::from(complexity).saturating_mul(10_000) {
        let x = i as f64;
        result += x.sqrt() * x.sin();
    }
    std::hint::black_box(result)
}

async fn handle_variable(
    State(stats): State<TestServerStats>,
    Path(complexity): Path<u32>,
) -> Json<Value> {
    let result = variable_work(complexity);
    stats.hit(&stats.variable);
    Json(json!({
        "message": "Variable complexity completed",
        "complexity": complexity,
        "result": result as i64,
        "timestamp": now_millis(),
    }))
}

async fn handle_random(State(stats): State<TestServerStats>) -> Json<Value> {
    let delay_ms: u64 = rand::thread_rng().gen_range(50..500);
    sleep(Duration::from_millis(delay_ms)).await;
    stats.hit(&stats.random);
    Json(json!({
        "message": "Random response completed",
        "actualDelay": delay_ms,
        "timestamp": now_millis(),
    }))
}

/// Simulated processing time for a payload with `fields` top-level fields.
pub fn data_processing_ms(fields: usize) -> u64 {
    (fields as u64)
        .saturating_mul(10)
        .min(MAX_DATA_PROCESSING_MS)
}

async fn handle_data(
    State(stats): State<TestServerStats>,
    Json(data): Json<Map<String, Value>>,
) -> Json<Value> {
    let processing_ms = data_processing_ms(data.len());
    sleep(Duration::from_millis(processing_ms)).await;
    stats.hit(&stats.data);
    Json(json!({
        "message": "Data processed successfully",
        "inputSize": data.len(),
        "processingTime": processing_ms,
        "timestamp": now_millis(),
    }))
}

async fn handle_memory(State(stats): State<TestServerStats>) -> Json<Value> {
    stats.hit(&stats.memory);
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    Json(json!({
        "totalMemory": sys.total_memory(),
        "freeMemory": sys.free_memory(),
        "usedMemory": sys.used_memory(),
        "timestamp": now_millis(),
    }))
}

async fn handle_metrics(State(stats): State<TestServerStats>) -> Json<Value> {
    Json(stats.to_json())
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
) -> (StatusCode, Json<Value>) {
    stats.requests_total.fetch_add(1, Ordering::Relaxed);
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({ "status": status.as_u16() })))
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_FAST, get(handle_fast))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_VARIABLE, get(handle_variable))
        .route(PATH_RANDOM, get(handle_random))
        .route(PATH_DATA, post(handle_data))
        .route(PATH_MEMORY, get(handle_memory))
        .route(PATH_METRICS, get(handle_metrics))
        .route(PATH_STATUS, get(handle_status))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0".parse().map_err(std::io::Error::other)?).await
    }

    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Server root, e.g. `http://127.0.0.1:4312`; plans append `/api/performance/...`.
    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_processing_time_is_capped() {
        assert_eq!(data_processing_ms(0), 0);
        assert_eq!(data_processing_ms(3), 30);
        assert_eq!(data_processing_ms(5_000), MAX_DATA_PROCESSING_MS);
    }

    #[test]
    fn urls_are_rooted_under_the_api_prefix() {
        let urls = TestServerUrls::new("http://127.0.0.1:1".to_string());
        assert_eq!(urls.fast, "http://127.0.0.1:1/api/performance/fast");
        assert_eq!(
            urls.slow_with_delay(200),
            "http://127.0.0.1:1/api/performance/slow?delayMs=200"
        );
        assert_eq!(urls.variable(5), "http://127.0.0.1:1/api/performance/variable/5");
        assert_eq!(urls.status(503), "http://127.0.0.1:1/status/503");
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start failed: {e}"));
        assert_ne!(server.addr().port(), 0);
        assert!(server.base_url().starts_with("http://127.0.0.1:"));
        server.shutdown().await;
    }
}
