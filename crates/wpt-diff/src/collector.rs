//! Result bridge between in-page `testharness.js` and the host.
//!
//! A single host binding, `collectWptResults`, receives a JSON string with
//! the harness's subtest verdicts. Under a proxy the tests run inside a
//! cross-origin iframe, so the page-side hook posts the same JSON string to
//! the parent window and an init script on the parent relays it to the
//! binding. The payload stays a string end to end because the proxy's
//! content rewriting corrupts structured-clone objects.

use crate::driver::PageDriver;
use crate::result::{WptDiffError, WptDiffResult};
use crate::types::{ResultsTable, SubtestResult};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Name of the host function exposed to every page context
pub const BINDING_NAME: &str = "collectWptResults";
/// `type` tag on messages relayed from the proxied iframe
pub const RESULTS_MESSAGE_TYPE: &str = "wpt-results";

/// Parent-window listener relaying iframe results to the binding
const PROXY_LISTENER_SCRIPT: &str = r#"
(() => {
    window.addEventListener("message", (event) => {
        const raw = event.data;
        if (typeof raw !== "string") return;
        let data;
        try {
            data = JSON.parse(raw);
        } catch (_) {
            return;
        }
        if (data && data.type === "wpt-results" && typeof window.collectWptResults === "function") {
            console.debug("Forwarding WPT results from the proxied frame");
            window.collectWptResults(raw);
        }
    });
})();
"#;

/// Serializes harness output to the wire payload
const SERIALIZE_RESULTS: &str = r#"
    const wptPayload = (tests, harness_status) => JSON.stringify({
        type: "wpt-results",
        tests: tests.map((t) => ({ name: t.name, status: t.status, message: t.message, stack: t.stack })),
        harness_status: harness_status ? { status: harness_status.status, message: harness_status.message } : null,
    });
"#;

/// Harness verdicts as delivered through the bridge
#[derive(Debug, Deserialize)]
struct BridgePayload {
    #[serde(default)]
    tests: Vec<SubtestResult>,
}

#[derive(Debug)]
struct CurrentTest {
    path: String,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct Session {
    results: ResultsTable,
    current: Option<CurrentTest>,
}

/// Host side of the result bridge.
///
/// Owns the run's [`ResultsTable`] and the single in-flight test. Clones
/// share state, so the task draining binding calls and the run loop see
/// the same table.
#[derive(Debug, Clone)]
pub struct ResultCollector {
    session: Arc<Mutex<Session>>,
    under_proxy: bool,
}

impl ResultCollector {
    #[must_use]
    pub fn new(under_proxy: bool) -> Self {
        Self::with_results(under_proxy, ResultsTable::new())
    }

    /// Start from previously collected results, e.g. a restored checkpoint
    #[must_use]
    pub fn with_results(under_proxy: bool, results: ResultsTable) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                results,
                current: None,
            })),
            under_proxy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expose the binding on the page and start draining its calls.
    ///
    /// Under a proxy this also installs the parent-window relay, which has
    /// to be present in every document the page loads.
    pub async fn start(&self, page: &dyn PageDriver) -> WptDiffResult<()> {
        tracing::info!("Exposing {BINDING_NAME} to the page");
        let calls = page.expose_binding(BINDING_NAME).await?;
        self.spawn_drain(calls);

        if self.under_proxy {
            page.add_init_script(PROXY_LISTENER_SCRIPT).await?;
        }
        Ok(())
    }

    fn spawn_drain(&self, mut calls: mpsc::UnboundedReceiver<String>) {
        let collector = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = calls.recv().await {
                if let Err(e) = collector.deliver(&payload) {
                    tracing::warn!("Dropping malformed WPT results: {e}");
                }
            }
            tracing::debug!("{BINDING_NAME} channel closed");
        });
    }

    /// Attribute subsequent deliveries to `path`.
    ///
    /// The returned receiver resolves once results for `path` arrive. Arming
    /// a new test replaces any previous one.
    pub fn set_current_test(&self, path: impl Into<String>) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        let path = path.into();
        let mut session = self.lock();
        if let Some(previous) = session.current.as_ref() {
            tracing::debug!(previous = %previous.path, next = %path, "replacing armed test");
        }
        session.current = Some(CurrentTest {
            path,
            done: Some(done),
        });
        rx
    }

    /// Stop attributing deliveries to any test
    pub fn clear_current_test(&self) {
        self.lock().current = None;
    }

    /// Record a bridge payload for the current test.
    ///
    /// The first delivery for a path wins; later ones are dropped. A
    /// delivery with no current test is dropped with a warning.
    pub fn deliver(&self, payload: &str) -> WptDiffResult<()> {
        let payload: BridgePayload =
            serde_json::from_str(payload).map_err(|e| WptDiffError::Binding {
                message: e.to_string(),
            })?;

        let mut session = self.lock();
        let Some(current) = session.current.as_mut() else {
            tracing::warn!(
                subtests = payload.tests.len(),
                "{BINDING_NAME} called with no current test"
            );
            return Ok(());
        };
        let path = current.path.clone();
        let done = current.done.take();

        tracing::debug!(path = %path, subtests = payload.tests.len(), "collecting WPT results");
        if !session.results.insert_if_absent(path.clone(), payload.tests) {
            tracing::warn!(path = %path, "duplicate WPT results dropped");
            return Ok(());
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
        Ok(())
    }

    /// Write the synthetic timeout verdict for `path` unless results exist
    pub fn record_timeout(&self, path: &str) {
        let mut session = self.lock();
        session
            .results
            .insert_if_absent(path.to_string(), vec![SubtestResult::timed_out()]);
        if session.current.as_ref().is_some_and(|c| c.path == path) {
            session.current = None;
        }
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.lock().results.contains(path)
    }

    /// Results collected for one path
    #[must_use]
    pub fn results_for(&self, path: &str) -> Option<Vec<SubtestResult>> {
        self.lock().results.get(path).map(<[SubtestResult]>::to_vec)
    }

    /// Snapshot of everything collected so far
    #[must_use]
    pub fn results(&self) -> ResultsTable {
        self.lock().results.clone()
    }

    #[must_use]
    pub const fn under_proxy(&self) -> bool {
        self.under_proxy
    }

    /// In-page hook appended to or injected after the harness
    #[must_use]
    pub fn body_addition(&self) -> String {
        body_addition(self.under_proxy)
    }
}

/// Harness completion hook for the given mode
#[must_use]
pub fn body_addition(under_proxy: bool) -> String {
    let deliver = if under_proxy {
        r#"
        if (window.parent && window.parent !== window) {
            window.parent.postMessage(wptPayload(tests, harness_status), "*");
        }"#
    } else {
        "
        window.collectWptResults(wptPayload(tests, harness_status));"
    };
    format!(
        "\n;(() => {{{SERIALIZE_RESULTS}
    add_completion_callback((tests, harness_status) => {{
        console.debug(\"WPT completion callback fired\");{deliver}
    }});
}})();\n"
    )
}
