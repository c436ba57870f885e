use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_PRODUCE: &str = "/v1/produce";
pub const PATH_PRODUCE_ITEM: &str = "/v1/produce/{code}";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_FAIL: &str = "/fail";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceItem {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    produce_added: Arc<AtomicU64>,
    produce_listed: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn produce_added(&self) -> u64 {
        self.produce_added.load(Ordering::Relaxed)
    }

    pub fn produce_listed(&self) -> u64 {
        self.produce_listed.load(Ordering::Relaxed)
    }
}

/// In-memory produce catalog keyed by lowercased code.
#[derive(Debug, Clone, Default)]
struct AppState {
    stats: TestServerStats,
    produce: Arc<RwLock<BTreeMap<String, ProduceItem>>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: &'static str,
}

fn error(status: StatusCode) -> Response {
    let message = status.canonical_reason().unwrap_or("error");
    (status, Json(ErrorBody { message })).into_response()
}

async fn handle_add_produce(State(state): State<AppState>, body: Bytes) -> Response {
    state.stats.inc_requests_total();

    let items: Vec<ProduceItem> = match serde_json::from_slice(&body) {
        Ok(items) => items,
        Err(_) => return error(StatusCode::BAD_REQUEST),
    };

    let mut produce = state.produce.write();
    let keys: Vec<String> = items.iter().map(|i| i.code.to_lowercase()).collect();
    if keys
        .iter()
        .enumerate()
        .any(|(i, k)| k.is_empty() || produce.contains_key(k) || keys[..i].contains(k))
    {
        return error(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let added = items.len() as u64;
    for (key, item) in keys.into_iter().zip(items) {
        produce.insert(key, item);
    }
    state
        .stats
        .produce_added
        .fetch_add(added, Ordering::Relaxed);

    StatusCode::CREATED.into_response()
}

async fn handle_list_produce(State(state): State<AppState>) -> Json<Vec<ProduceItem>> {
    state.stats.inc_requests_total();
    state.stats.produce_listed.fetch_add(1, Ordering::Relaxed);
    Json(state.produce.read().values().cloned().collect())
}

async fn handle_delete_produce(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Response {
    state.stats.inc_requests_total();
    match state.produce.write().remove(&code.to_lowercase()) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND),
    }
}

async fn handle_health(State(state): State<AppState>) -> &'static str {
    state.stats.inc_requests_total();
    "ok"
}

async fn handle_slow(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    state.stats.inc_requests_total();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(50);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn handle_fail(State(state): State<AppState>) -> Response {
    state.stats.inc_requests_total();
    error(StatusCode::INTERNAL_SERVER_ERROR)
}

fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route(
            PATH_PRODUCE,
            get(handle_list_produce).post(handle_add_produce),
        )
        .route(PATH_PRODUCE_ITEM, delete(handle_delete_produce))
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_FAIL, get(handle_fail).post(handle_fail))
        .with_state(state)
}

pub fn router(stats: TestServerStats) -> Router {
    router_with_state(AppState {
        stats,
        ..AppState::default()
    })
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
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
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
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
