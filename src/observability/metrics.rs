// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

/// Prometheus metrics definitions for pcbook
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    CounterVec, HistogramVec, IntCounter, IntCounterVec, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;

lazy_static! {
    // ============================================================================
    // gRPC Metrics
    // ============================================================================

    /// gRPC request duration in seconds
    pub static ref GRPC_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method", "status"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// gRPC request count
    pub static ref GRPC_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    ).unwrap();

    // ============================================================================
    // Authentication Metrics
    // ============================================================================

    /// Authorization decisions taken by the interceptor
    pub static ref AUTH_TOTAL: CounterVec = register_counter_vec!(
        "auth_total",
        "Total authorization decisions",
        &["result", "method"]
    ).unwrap();

    /// Login attempts
    pub static ref LOGIN_TOTAL: CounterVec = register_counter_vec!(
        "login_total",
        "Total login attempts",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Catalog Metrics
    // ============================================================================

    /// Bytes accepted by image uploads
    pub static ref UPLOAD_BYTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "upload_bytes_total",
        "Total bytes of stored images",
        &["result"]
    ).unwrap();

    /// Laptops streamed back by searches
    pub static ref SEARCH_MATCHES_TOTAL: IntCounter = register_int_counter!(
        "search_matches_total",
        "Total laptops returned by searches"
    ).unwrap();

    /// Scores applied through the rating stream
    pub static ref RATINGS_TOTAL: IntCounter = register_int_counter!(
        "ratings_total",
        "Total scores recorded"
    ).unwrap();
}

/// Increment authorization success counter
pub fn increment_auth_success(method: &str) {
    AUTH_TOTAL.with_label_values(&["success", method]).inc();
}

/// Increment authorization failure counter
pub fn increment_auth_failure(method: &str, reason: &str) {
    AUTH_TOTAL.with_label_values(&[reason, method]).inc();
}

pub fn increment_login(result: &str) {
    LOGIN_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_upload(result: &str, bytes: usize) {
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[result])
        .inc_by(bytes as u64);
}

pub fn increment_search_matches(count: u64) {
    SEARCH_MATCHES_TOTAL.inc_by(count);
}

pub fn increment_ratings() {
    RATINGS_TOTAL.inc();
}

/// Increment gRPC request counter
pub fn increment_grpc_request(method: &str, status: &str) {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, status])
        .inc();
}

/// Record gRPC request duration
pub fn record_grpc_duration(method: &str, status: &str, duration: f64) {
    GRPC_REQUEST_DURATION
        .with_label_values(&[method, status])
        .observe(duration);
}

/// Records count and duration of one finished call.
pub fn record_grpc_call(method: &str, ok: bool, duration: f64) {
    let status = if ok { "success" } else { "error" };
    record_grpc_duration(method, status, duration);
    increment_grpc_request(method, status);
}

/// Gather all metrics for Prometheus exposition
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    buffer
}

/// Router answering `GET /metrics` with the text exposition format.
pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], gather_metrics())
}

/// Serves the metrics router until the listener fails.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "serving metrics");
    axum::serve(listener, router()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_auth_metrics() {
        increment_auth_success("/test.Metrics/Auth");
        increment_auth_failure("/test.Metrics/Auth", "unauthenticated");

        assert_eq!(
            AUTH_TOTAL
                .with_label_values(&["success", "/test.Metrics/Auth"])
                .get(),
            1.0
        );
        assert_eq!(
            AUTH_TOTAL
                .with_label_values(&["unauthenticated", "/test.Metrics/Auth"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_upload_metrics() {
        record_upload("metrics-test", 1024);
        record_upload("metrics-test", 1);
        assert_eq!(
            UPLOAD_BYTES_TOTAL
                .with_label_values(&["metrics-test"])
                .get(),
            1025
        );
    }

    #[test]
    fn test_grpc_call_metrics() {
        record_grpc_call("metrics_test_call", true, 0.01);
        record_grpc_call("metrics_test_call", false, 0.02);
        assert_eq!(
            GRPC_REQUESTS_TOTAL
                .with_label_values(&["metrics_test_call", "error"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_gather_metrics() {
        increment_grpc_request("gather_test", "success");

        let output = gather_metrics();
        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("grpc_requests_total"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text_format() {
        increment_grpc_request("endpoint_test_call", "success");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(serve(listener));

        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).await.unwrap();
        let response = String::from_utf8_lossy(&raw);

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(TEXT_FORMAT));
        assert!(response.contains("endpoint_test_call"));
        handle.abort();
    }
}
