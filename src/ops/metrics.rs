use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{TrackerError, TrackerResult};
use crate::ops::shutdown::Shutdown;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cycles_total: IntCounter,
    pub cycles_skipped_total: IntCounter,
    pub rows_published_total: IntCounter,
    pub publish_chunk_failures_total: IntCounter,
    pub instruments_discovered: IntGauge,
    pub cycle_duration_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cycles_total = register(
            &registry,
            IntCounter::new("cycles_total", "Completed publish cycles").unwrap(),
        );
        let cycles_skipped_total = register(
            &registry,
            IntCounter::new(
                "cycles_skipped_total",
                "Cycles skipped because discovery yielded nothing",
            )
            .unwrap(),
        );
        let rows_published_total = register(
            &registry,
            IntCounter::new("rows_published_total", "Report rows written to the sink").unwrap(),
        );
        let publish_chunk_failures_total = register(
            &registry,
            IntCounter::new(
                "publish_chunk_failures_total",
                "Sink chunks abandoned after their retry",
            )
            .unwrap(),
        );
        let instruments_discovered = register(
            &registry,
            IntGauge::new(
                "instruments_discovered",
                "Instruments matched by the last discovery pass",
            )
            .unwrap(),
        );
        let cycle_duration_ms = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("cycle_duration_ms", "Full cycle duration in ms")
                    .buckets(prometheus::exponential_buckets(50.0, 2.0, 12).unwrap()),
            )
            .unwrap(),
        );

        Self {
            registry,
            cycles_total,
            cycles_skipped_total,
            rows_published_total,
            publish_chunk_failures_total,
            instruments_discovered,
            cycle_duration_ms,
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(
                target: "metrics",
                error = %err,
                "failed to encode prometheus metrics"
            );
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn serve(addr: SocketAddr, metrics: Metrics, shutdown: Shutdown) -> TrackerResult<()> {
    tracing::info!(target: "metrics", bind = %addr, "metrics server starting");

    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, metrics.clone()))) }
    });

    let server = hyper::Server::try_bind(&addr)
        .map_err(|e| TrackerError::Other(format!("metrics bind failed: {e}")))?;
    let server = server.serve(make_svc).with_graceful_shutdown(shutdown.wait());

    server
        .await
        .map_err(|e| TrackerError::Other(format!("metrics server error: {e}")))
}

async fn handle(req: Request<Body>, metrics: Metrics) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(response_with_status(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        ));
    }

    match req.uri().path() {
        "/metrics" => {
            let body = metrics.render();
            let mut resp = Response::new(Body::from(body));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
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

fn register<M>(registry: &Registry, metric: M) -> M
where
    M: Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registration");
    metric
}
