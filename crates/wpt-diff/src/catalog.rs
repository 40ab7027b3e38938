//! Test catalog resolution against the wpt.fyi results API.
//!
//! The latest aligned stable Chrome run gives us both the list of test
//! paths to run and the baseline report we later diff against.

use crate::report::WptReport;
use crate::result::{WptDiffError, WptDiffResult};
use serde_json::Value;
use std::time::Duration;

/// Query selecting the latest aligned stable Chrome run
const CHROME_RUN_QUERY: &str = "api/run?label=master&label=stable&product=chrome&aligned";

/// Resolved test catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Chrome's full report; its `results` are the candidate tests
    pub chrome_report: WptReport,
}

impl Catalog {
    /// Candidate test paths, in baseline order
    #[must_use]
    pub fn test_paths(&self) -> Vec<String> {
        self.chrome_report
            .results
            .iter()
            .map(|r| r.test.clone())
            .collect()
    }
}

/// Build the HTTP client used for catalog and manifest requests
#[must_use]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}

/// Fetch the latest Chrome run and its raw per-test results
pub async fn resolve(client: &reqwest::Client, api_base: &str) -> WptDiffResult<Catalog> {
    let runs_url = format!("{}/{CHROME_RUN_QUERY}", api_base.trim_end_matches('/'));
    let run = fetch_json(client.get(&runs_url), &runs_url, "the latest Chrome run").await?;

    let raw_results_url = run
        .get("raw_results_url")
        .and_then(Value::as_str)
        .ok_or_else(|| WptDiffError::Schema {
            message: "latest Chrome run has no raw_results_url".to_string(),
        })?
        .to_string();

    let raw = fetch_json(
        client.get(&raw_results_url),
        &raw_results_url,
        "the Chrome WPT report",
    )
    .await?;
    let chrome_report: WptReport =
        serde_json::from_value(raw).map_err(|e| WptDiffError::Schema {
            message: format!("Chrome WPT report does not match the wptreport format: {e}"),
        })?;

    tracing::info!(
        tests = chrome_report.results.len(),
        url = %raw_results_url,
        "resolved Chrome baseline"
    );
    Ok(Catalog { chrome_report })
}

/// Send a request and decode the body as JSON.
///
/// Transport failures and non-success statuses are fetch errors; a body
/// that is not JSON is a parse error.
pub(crate) async fn fetch_json(
    request: reqwest::RequestBuilder,
    url: &str,
    what: &str,
) -> WptDiffResult<Value> {
    let resp = request.send().await.map_err(|e| WptDiffError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| WptDiffError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !status.is_success() {
        return Err(WptDiffError::Fetch {
            url: url.to_string(),
            message: format!("HTTP {}", status.as_u16()),
        });
    }

    serde_json::from_str(&body).map_err(|e| WptDiffError::Parse {
        what: what.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::manifest::{fetch_update_manifest, LONG_TIMEOUT_SECS};
    use axum::http::StatusCode;
    use axum::routing::{MethodRouter, get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn fake_api() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let raw_url = format!("{base}/raw.json");
        let router = Router::new()
            .route(
                "/api/run",
                get(move || {
                    let raw_url = raw_url.clone();
                    async move { Json(json!({"id": 1, "raw_results_url": raw_url})) }
                }),
            )
            .route(
                "/raw.json",
                get(|| async {
                    Json(json!({
                        "run_info": {"product": "chrome"},
                        "results": [
                            {"test": "/dom/a.html", "status": "OK", "message": null, "subtests": [], "known_intermittent": []},
                            {"test": "/fetch/b.html", "status": "OK", "message": null, "subtests": [], "known_intermittent": []}
                        ]
                    }))
                }),
            )
            .route(
                "/tools/runner/update_manifest.py",
                post(|| async {
                    Json(json!({
                        "items": {"testharness": {"dom/a.html": [["dom/a.html", {"timeout": "long"}]]}},
                        "url_base": "/"
                    }))
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        base
    }

    /// API whose latest run points at `/raw.json`, served by `raw`
    async fn api_with_raw(raw: MethodRouter) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let raw_url = format!("{base}/raw.json");
        let router = Router::new()
            .route(
                "/api/run",
                get(move || {
                    let raw_url = raw_url.clone();
                    async move { Json(json!({"id": 1, "raw_results_url": raw_url})) }
                }),
            )
            .route("/raw.json", raw);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn test_resolve_follows_raw_results_url() {
        let base = fake_api().await;
        let catalog = resolve(&http_client(), &base).await.unwrap();
        assert_eq!(catalog.test_paths(), vec!["/dom/a.html", "/fetch/b.html"]);
        assert_eq!(catalog.chrome_report.run_info["product"], json!("chrome"));
    }

    #[tokio::test]
    async fn test_fetch_update_manifest() {
        let base = fake_api().await;
        let map = fetch_update_manifest(&http_client(), &base).await.unwrap();
        assert_eq!(map.get("/dom/a.html"), Some(LONG_TIMEOUT_SECS));
    }

    #[tokio::test]
    async fn test_missing_raw_results_url_is_schema_error() {
        let base = serve(Router::new().route("/api/run", get(|| async { Json(json!({"id": 1})) }))).await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        assert!(matches!(err, WptDiffError::Schema { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_non_json_body_is_parse_error() {
        let base = serve(Router::new().route("/api/run", get(|| async { "<html>oops</html>" }))).await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        assert!(matches!(err, WptDiffError::Parse { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let err = resolve(&http_client(), &base).await.unwrap_err();
        assert!(matches!(err, WptDiffError::Fetch { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_run_lookup_server_error_is_fetch_error() {
        let base = serve(Router::new().route(
            "/api/run",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        assert!(matches!(err, WptDiffError::Fetch { ref message, .. } if message == "HTTP 503"), "{err}");
    }

    #[tokio::test]
    async fn test_raw_results_server_error_is_fetch_error() {
        let base = api_with_raw(get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") })).await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        match err {
            WptDiffError::Fetch { url, message } => {
                assert!(url.ends_with("/raw.json"), "{url}");
                assert_eq!(message, "HTTP 500");
            }
            other => panic!("expected a fetch error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_raw_results_not_json_is_parse_error() {
        let base = api_with_raw(get(|| async { "results unavailable" })).await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        match err {
            WptDiffError::Parse { what, .. } => assert_eq!(what, "the Chrome WPT report"),
            other => panic!("expected a parse error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_raw_results_wrong_shape_is_schema_error() {
        let base = api_with_raw(get(|| async { Json(json!({"results": "none"})) })).await;
        let err = resolve(&http_client(), &base).await.unwrap_err();
        assert!(matches!(err, WptDiffError::Schema { .. }), "{err}");
    }
}
