use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts as PromOpts,
    Registry, TextEncoder,
};

use podclip::ProcessReport;

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    runs_total: IntCounterVec,
    clips_produced_total: IntCounter,
    clips_failed_total: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Register `collector` and hand it back for recording.
fn registered<C>(registry: &Registry, collector: C) -> C
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .expect("metrics must register");
    collector
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();
        let by_status = &["status"];
        const INVALID: &str = "metrics definition must be valid";

        let http_requests_total = IntCounterVec::new(
            PromOpts::new(
                "podclip_http_requests_total",
                "Total HTTP requests served by podclip-server.",
            ),
            by_status,
        )
        .expect(INVALID);

        // Runs take minutes, so the buckets reach well past typical web latencies.
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "podclip_http_request_duration_seconds",
                "HTTP request latency in seconds.",
            )
            .buckets(vec![0.1, 1.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
            by_status,
        )
        .expect(INVALID);

        let http_in_flight_requests = IntGauge::new(
            "podclip_http_in_flight_requests",
            "Current number of in-flight HTTP requests.",
        )
        .expect(INVALID);

        let runs_total = IntCounterVec::new(
            PromOpts::new("podclip_runs_total", "Clipping runs by outcome."),
            by_status,
        )
        .expect(INVALID);

        let clips_produced_total =
            IntCounter::new("podclip_clips_produced_total", "Clips rendered and uploaded.")
                .expect(INVALID);

        let clips_failed_total = IntCounter::new(
            "podclip_clips_failed_total",
            "Planned clips that failed to render or upload.",
        )
        .expect(INVALID);

        Metrics {
            http_requests_total: registered(&registry, http_requests_total),
            http_request_duration_seconds: registered(&registry, http_request_duration_seconds),
            http_in_flight_requests: registered(&registry, http_in_flight_requests),
            runs_total: registered(&registry, runs_total),
            clips_produced_total: registered(&registry, clips_produced_total),
            clips_failed_total: registered(&registry, clips_failed_total),
            registry,
        }
    })
}

pub fn init() {
    let _ = metrics();
}

/// Count one finished run and its clips.
pub fn record_run(report: &ProcessReport) {
    let m = metrics();
    let produced = report.clips.len();
    let status = if produced == report.clips_planned {
        "ok"
    } else {
        "partial"
    };
    m.runs_total.with_label_values(&[status]).inc();
    m.clips_produced_total.inc_by(produced as u64);
    m.clips_failed_total
        .inc_by(report.clips_planned.saturating_sub(produced) as u64);
}

/// Count a run that failed before any clip was attempted.
pub fn record_failed_run() {
    metrics().runs_total.with_label_values(&["error"]).inc();
}

pub async fn prometheus_metrics() -> Response {
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

/// Count and time every request except scrapes and health checks.
pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path(), MatchedPath::as_str);
    if matches!(route, "/metrics" | "/healthz") {
        return next.run(req).await;
    }

    let m = metrics();
    let started = Instant::now();
    m.http_in_flight_requests.inc();
    let response = next.run(req).await;
    m.http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    m.http_requests_total.with_label_values(&[&status]).inc();
    m.http_request_duration_seconds
        .with_label_values(&[&status])
        .observe(started.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use podclip::clipper::RunStatus;

    use super::*;

    #[test]
    fn failed_clips_are_planned_minus_produced() {
        let before = metrics().clips_failed_total.get();
        record_run(&ProcessReport {
            status: RunStatus::Partial,
            clips_planned: 3,
            s3_prefix: "uploads/abc".into(),
            language: None,
            clips: Vec::new(),
        });
        assert_eq!(metrics().clips_failed_total.get() - before, 3);
    }
}
