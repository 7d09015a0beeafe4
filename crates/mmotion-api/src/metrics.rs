//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;
use std::sync::LazyLock;
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "mmotion_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "mmotion_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "mmotion_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "mmotion_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "mmotion_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "mmotion_ws_messages_sent_total";

    // Submission metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "mmotion_jobs_submitted_total";
    pub const SUBMISSIONS_REJECTED_TOTAL: &str = "mmotion_submissions_rejected_total";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "mmotion_queue_length";
    pub const QUEUE_REJECTED_LENGTH: &str = "mmotion_queue_rejected_length";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "mmotion_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message sent.
pub fn record_ws_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Record an accepted submission.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record a refused submission with its reason.
pub fn record_submission_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::SUBMISSIONS_REJECTED_TOTAL, &labels).increment(1);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Update rejected stream length gauge.
pub fn set_rejected_length(length: u64) {
    gauge!(names::QUEUE_REJECTED_LENGTH).set(length as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit() {
    counter!(names::RATE_LIMIT_HITS_TOTAL).increment(1);
}

/// Matches v4 UUID path segments; compiled once at first use.
static JOB_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("job id pattern")
});

/// Sanitize path for metrics labels (replace job ids with a placeholder).
fn sanitize_path(path: &str) -> String {
    JOB_ID_RE.replace_all(path, ":job_id").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000"),
            "/api/jobs/:job_id"
        );
        assert_eq!(sanitize_path("/api/jobs"), "/api/jobs");
    }
}
