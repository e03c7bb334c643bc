//! HTTP request handlers: root page, metrics scrape and config reload.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{error, warn};

use sshping_core::config::MAX_DEVICE_TIMEOUT;
use sshping_core::exposition;
use sshping_core::scrape::{ScrapeError, ScrapeRequest};

use crate::state::AppState;

/// Header Prometheus uses to announce its scrape timeout.
pub(crate) const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

// ============================================================
// Root page
// ============================================================

pub(crate) async fn handle_root(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>SSH Ping Exporter</title></head>\n\
         <body>\n\
         <h1>SSH Ping Exporter</h1>\n\
         <p>Version {}</p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        sshping_core::VERSION,
        state.telemetry_path
    ))
}

// ============================================================
// Metrics
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MetricsParams {
    dest: Option<String>,
    target: Option<String>,
}

pub(crate) async fn handle_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
    headers: HeaderMap,
) -> Response {
    let request = ScrapeRequest {
        dest: params.dest,
        target: params.target,
        deadline: scrape_deadline(&headers),
    };

    let snapshot = match state.orchestrator.scrape(request).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "scrape rejected");
            let status = match e {
                ScrapeError::UnknownTarget(_) => StatusCode::NOT_FOUND,
                ScrapeError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            };
            return (status, format!("ERROR - {}", e)).into_response();
        }
    };

    match exposition::encode(&snapshot) {
        Ok(body) => ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, generation = snapshot.generation, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Deadline derived from the scraper's announced timeout, if present and sane.
///
/// Values beyond the longest allowed device timeout are clamped to it.
pub(crate) fn scrape_deadline(headers: &HeaderMap) -> Option<Instant> {
    let seconds = headers
        .get(SCRAPE_TIMEOUT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()?;
    if seconds.is_nan() || seconds <= 0.0 {
        return None;
    }
    let timeout = Duration::try_from_secs_f64(seconds)
        .unwrap_or(MAX_DEVICE_TIMEOUT)
        .min(MAX_DEVICE_TIMEOUT);
    Instant::now().checked_add(timeout)
}

// ============================================================
// Reload
// ============================================================

pub(crate) async fn handle_reload(State(state): State<AppState>) -> Response {
    match state.exporter().reload().await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!(error = %e, trigger = "http", "configuration reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to reload config: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_scrape_deadline_from_header() {
        let before = Instant::now();
        let deadline = scrape_deadline(&headers("9.5")).unwrap();
        assert!(deadline >= before + Duration::from_millis(9500));
        assert!(deadline <= Instant::now() + Duration::from_millis(9500));
    }

    #[test]
    fn test_scrape_deadline_ignores_bad_values() {
        assert!(scrape_deadline(&HeaderMap::new()).is_none());
        assert!(scrape_deadline(&headers("soon")).is_none());
        assert!(scrape_deadline(&headers("0")).is_none());
        assert!(scrape_deadline(&headers("-3")).is_none());
        assert!(scrape_deadline(&headers("NaN")).is_none());
    }

    #[test]
    fn test_scrape_deadline_clamps_huge_values() {
        for value in ["1e20", "inf", "18446744073709551616"] {
            let deadline = scrape_deadline(&headers(value)).unwrap();
            assert!(deadline <= Instant::now() + MAX_DEVICE_TIMEOUT);
        }
    }
}
