use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;

use crate::config::AppConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::ops::shutdown::Shutdown;
use crate::time::now_ms;

const LIVENESS_BODY: &str = "Server running - price tracker is active";

/// A publish older than this many poll intervals marks the report degraded.
const STALE_INTERVALS: i64 = 3;

#[derive(Clone)]
pub struct HealthState {
    inner: Arc<HealthInner>,
}

struct HealthInner {
    started_ms: i64,
    interval_ms: i64,
    cycle_running: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    last_publish_ms: AtomicI64,
    last_publish_rows: AtomicU64,
}

impl HealthState {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            inner: Arc::new(HealthInner {
                started_ms: now_ms(),
                interval_ms: cfg.poller.interval_s as i64 * 1_000,
                cycle_running: AtomicBool::new(false),
                cycles_completed: AtomicU64::new(0),
                cycles_skipped: AtomicU64::new(0),
                last_publish_ms: AtomicI64::new(0),
                last_publish_rows: AtomicU64::new(0),
            }),
        }
    }

    pub fn cycle_started(&self) {
        self.inner.cycle_running.store(true, Ordering::Relaxed);
    }

    pub fn mark_published(&self, rows: usize, ts_ms: i64) {
        self.inner.cycle_running.store(false, Ordering::Relaxed);
        self.inner.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.inner.last_publish_ms.store(ts_ms, Ordering::Relaxed);
        self.inner
            .last_publish_rows
            .store(rows as u64, Ordering::Relaxed);
    }

    pub fn mark_skipped(&self) {
        self.inner.cycle_running.store(false, Ordering::Relaxed);
        self.inner.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, now_ms: i64) -> HealthReport {
        let last_publish_ms = self.inner.last_publish_ms.load(Ordering::Relaxed);
        let last_publish_age_ms = if last_publish_ms > 0 {
            Some(now_ms.saturating_sub(last_publish_ms))
        } else {
            None
        };

        let stale = matches!(
            last_publish_age_ms,
            Some(age) if age > STALE_INTERVALS * self.inner.interval_ms
        );
        let status = if self.inner.cycle_running.load(Ordering::Relaxed) {
            "running"
        } else if stale {
            "degraded"
        } else {
            "idle"
        };

        HealthReport {
            ok: !stale,
            status,
            now_ms,
            uptime_ms: now_ms.saturating_sub(self.inner.started_ms),
            cycles_completed: self.inner.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.inner.cycles_skipped.load(Ordering::Relaxed),
            last_publish_ms,
            last_publish_age_ms,
            last_publish_rows: self.inner.last_publish_rows.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub status: &'static str,
    pub now_ms: i64,
    pub uptime_ms: i64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub last_publish_ms: i64,
    pub last_publish_age_ms: Option<i64>,
    pub last_publish_rows: u64,
}

/// Binds the liveness server, falling back to the secondary port when the
/// configured one is taken, then serves until shutdown.
pub async fn serve(
    primary: SocketAddr,
    fallback: SocketAddr,
    health: HealthState,
    shutdown: Shutdown,
) -> TrackerResult<()> {
    let make_svc = make_service_fn(move |_| {
        let health = health.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, health.clone()))) }
    });

    let server = match hyper::Server::try_bind(&primary) {
        Ok(builder) => {
            tracing::info!(target: "health", bind = %primary, "health server starting");
            builder
        }
        Err(err) => {
            tracing::warn!(
                target: "health",
                bind = %primary,
                fallback = %fallback,
                error = %err,
                "health bind failed; retrying on fallback port"
            );
            hyper::Server::try_bind(&fallback).map_err(|e| {
                TrackerError::Other(format!("health bind failed on fallback {fallback}: {e}"))
            })?
        }
    };

    let server = server.serve(make_svc).with_graceful_shutdown(shutdown.wait());
    server
        .await
        .map_err(|e| TrackerError::Other(format!("health server error: {e}")))
}

async fn handle(req: Request<Body>, health: HealthState) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(response_with_status(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        ));
    }

    match req.uri().path() {
        "/" => Ok(Response::new(Body::from(LIVENESS_BODY))),
        "/healthz" => {
            let report = health.report(now_ms());
            let body = serde_json::to_vec(&report).unwrap_or_else(|_| b"{}".to_vec());
            let mut resp = Response::new(Body::from(body));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            Ok(resp)
        }
        _ => Ok(response_with_status(StatusCode::NOT_FOUND, "not found")),
    }
}

fn response_with_status(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from(body.to_string())))
}
