use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_HELLO: &str = "/hello";
pub const PATH_STATUS: &str = "/status";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    hello_total: Arc<AtomicU64>,
    error_responses: Arc<AtomicU64>,
}

impl TestServerStats {
    pub fn hello_total(&self) -> u64 {
        self.hello_total.load(Ordering::Relaxed)
    }

    pub fn error_responses(&self) -> u64 {
        self.error_responses.load(Ordering::Relaxed)
    }
}

async fn handle_hello(State(stats): State<TestServerStats>) -> &'static str {
    stats.hello_total.fetch_add(1, Ordering::Relaxed);
    "Hello World!"
}

/// Answers with the status code taken from the path.
async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
) -> StatusCode {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    if !status.is_success() {
        stats.error_responses.fetch_add(1, Ordering::Relaxed);
    }
    status
}

fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HELLO, get(handle_hello))
        .route(&format!("{PATH_STATUS}/{{code}}"), get(handle_status))
        .with_state(stats)
}

/// In-process HTTP target for end-to-end runs.
pub struct TestServer {
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
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
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
