//! Page driver abstraction and the navigation/session state machine.
//!
//! [`PageDriver`] is the seam between the run loop and a real browser. The
//! chromiumoxide implementation lives in [`crate::browser`]; [`MockPage`]
//! stands in for it in unit tests.

use crate::iterator::TestRunInfo;
use crate::result::{WptDiffError, WptDiffResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// CSS selector of the proxy demo's address bar
pub const ADDRESS_BAR_SELECTOR: &str = ".bar";
/// Pause after submitting the address bar before waiting on the page
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
/// How long the default proxy setup waits for a service worker to appear
pub const SERVICE_WORKER_WAIT: Duration = Duration::from_secs(10);

/// Handle to an installed init script
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptId(pub String);

/// Browser page operations the runner needs
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Expose a host function to every page context.
    ///
    /// Each in-page call delivers its single string argument on the
    /// returned channel.
    async fn expose_binding(&self, name: &str) -> WptDiffResult<mpsc::UnboundedReceiver<String>>;

    /// Run `source` in every new document before its own scripts
    async fn add_init_script(&self, source: &str) -> WptDiffResult<ScriptId>;

    /// Uninstall an init script
    async fn remove_init_script(&self, id: &ScriptId) -> WptDiffResult<()>;

    /// Append `addition` to the body of every response for `url`
    async fn intercept_script(&self, url: &str, addition: &str) -> WptDiffResult<()>;

    /// Navigate and return once the navigation commits
    async fn navigate(&self, url: &str) -> WptDiffResult<()>;

    /// Wait for the `load` lifecycle event of the current document
    async fn wait_for_load(&self) -> WptDiffResult<()>;

    /// Replace the value of the element matching `selector` and press Enter
    async fn fill_and_submit(&self, selector: &str, value: &str) -> WptDiffResult<()>;

    /// Number of service workers running in the browser
    async fn service_worker_count(&self) -> WptDiffResult<usize>;

    /// Close the page and its browser
    async fn close(&self) -> WptDiffResult<()>;
}

/// Establishes a proxied browsing session on the first test.
///
/// Implementations are expected to leave a service worker registered.
#[async_trait]
pub trait ProxySetup: Send + Sync {
    async fn setup_page(&self, page: &dyn PageDriver, url: &str) -> WptDiffResult<()>;
}

/// Opens the proxy front page and submits the first test through its
/// address bar, then waits for the proxy's service worker.
#[derive(Debug, Clone)]
pub struct UrlBarProxySetup {
    pub proxy_base: String,
    pub selector: String,
    pub settle_delay: Duration,
    pub service_worker_wait: Duration,
}

impl UrlBarProxySetup {
    #[must_use]
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
            selector: ADDRESS_BAR_SELECTOR.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            service_worker_wait: SERVICE_WORKER_WAIT,
        }
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_service_worker_wait(mut self, wait: Duration) -> Self {
        self.service_worker_wait = wait;
        self
    }
}

#[async_trait]
impl ProxySetup for UrlBarProxySetup {
    async fn setup_page(&self, page: &dyn PageDriver, url: &str) -> WptDiffResult<()> {
        tracing::debug!(proxy = %self.proxy_base, first = %url, "setting up the proxy session");
        page.navigate(&self.proxy_base).await?;
        page.wait_for_load().await?;
        page.fill_and_submit(&self.selector, url).await?;
        tokio::time::sleep(self.settle_delay).await;

        let deadline = tokio::time::Instant::now() + self.service_worker_wait;
        while page.service_worker_count().await? == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Ok(())
    }
}

/// Proxy session lifecycle. Direct runs go straight to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    ProxyBootstrapped,
    Ready,
}

/// Init script splicing `body_addition` in right after the harness report
/// script. Scoped to one document, so it is reinstalled per navigation.
#[must_use]
pub fn harness_observer_script(body_addition: &str) -> String {
    let literal = serde_json::to_string(body_addition).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"
(() => {{
    const addition = {literal};
    new MutationObserver((mutations) => {{
        for (const mutation of mutations) {{
            for (const node of mutation.addedNodes) {{
                if (node instanceof HTMLScriptElement && node.src && node.src.endsWith("testharnessreport.js")) {{
                    console.debug("Injecting the WPT completion hook after testharnessreport.js");
                    const hook = document.createElement("script");
                    hook.textContent = addition;
                    node.after(hook);
                }}
            }}
        }}
    }}).observe(document, {{ childList: true, subtree: true }});
}})();
"#
    )
}

/// Drives one page through a sequence of tests, directly or through a
/// proxy's own address bar.
pub struct NavigationDriver {
    page: Arc<dyn PageDriver>,
    proxy: Option<Arc<dyn ProxySetup>>,
    body_addition: String,
    state: SessionState,
    observer: Option<ScriptId>,
    settle_delay: Duration,
    /// Test the proxy setup already opened
    opened_by_setup: Option<String>,
}

impl std::fmt::Debug for NavigationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationDriver")
            .field("under_proxy", &self.proxy.is_some())
            .field("state", &self.state)
            .field("observer", &self.observer)
            .finish()
    }
}

impl NavigationDriver {
    /// Navigate the page straight to each test
    #[must_use]
    pub fn direct(page: Arc<dyn PageDriver>, body_addition: impl Into<String>) -> Self {
        Self {
            page,
            proxy: None,
            body_addition: body_addition.into(),
            state: SessionState::NotStarted,
            observer: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            opened_by_setup: None,
        }
    }

    /// Reach each test through a proxy session bootstrapped by `setup`
    #[must_use]
    pub fn proxied(
        page: Arc<dyn PageDriver>,
        setup: Arc<dyn ProxySetup>,
        body_addition: impl Into<String>,
    ) -> Self {
        Self {
            proxy: Some(setup),
            ..Self::direct(page, body_addition)
        }
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn under_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// One-time setup before the first test.
    ///
    /// Direct runs intercept the harness script once for the whole session.
    pub async fn prepare(&mut self, test_base: &str) -> WptDiffResult<()> {
        if self.proxy.is_none() && self.state == SessionState::NotStarted {
            let harness = format!("{}/resources/testharness.js", test_base.trim_end_matches('/'));
            tracing::debug!(url = %harness, "intercepting the test harness");
            self.page
                .intercept_script(&harness, &self.body_addition)
                .await?;
            self.state = SessionState::Ready;
        }
        Ok(())
    }

    /// Whether the next test has to establish the proxy session first
    #[must_use]
    pub fn needs_bootstrap(&self) -> bool {
        self.proxy.is_some() && self.state == SessionState::NotStarted
    }

    /// Establish the proxy session, opening `info`'s test through it.
    ///
    /// The following [`navigate`](Self::navigate) for the same test only
    /// waits for the load. Every failure here is a `ProxySetup` error.
    pub async fn bootstrap(&mut self, info: &TestRunInfo) -> WptDiffResult<()> {
        let Some(setup) = self.proxy.clone() else {
            return Ok(());
        };
        if self.state != SessionState::NotStarted {
            return Ok(());
        }

        let url = info.raw_full_url.as_str();
        self.reinstall_observer().await?;
        setup
            .setup_page(self.page.as_ref(), url)
            .await
            .map_err(|e| match e {
                WptDiffError::ProxySetup { .. } => e,
                other => WptDiffError::proxy_setup(format!("proxy session setup failed: {other}")),
            })?;
        let workers = self.page.service_worker_count().await?;
        if workers == 0 {
            return Err(WptDiffError::proxy_setup(
                "Failed to find any SWs in the browser context",
            ));
        }
        tracing::debug!(workers, "proxy session established");
        self.state = SessionState::ProxyBootstrapped;
        self.opened_by_setup = Some(info.test_path.clone());
        Ok(())
    }

    /// Bring the page to `info`'s test and wait for it to load
    pub async fn navigate(&mut self, info: &TestRunInfo) -> WptDiffResult<()> {
        let url = info.raw_full_url.as_str();
        if self.proxy.is_none() {
            if self.state == SessionState::NotStarted {
                return Err(WptDiffError::page(
                    "navigation driver used before prepare()",
                ));
            }
            self.page.navigate(url).await?;
        } else {
            if self.state == SessionState::NotStarted {
                self.bootstrap(info).await?;
            }
            if self.opened_by_setup.take().as_deref() == Some(info.test_path.as_str()) {
                tracing::debug!(url, "already opened by the proxy setup");
            } else {
                self.reinstall_observer().await?;
                tracing::debug!(url, "navigating through the proxy address bar");
                self.page
                    .fill_and_submit(ADDRESS_BAR_SELECTOR, url)
                    .await?;
                tokio::time::sleep(self.settle_delay).await;
                self.state = SessionState::Ready;
            }
        }
        self.page.wait_for_load().await
    }

    async fn reinstall_observer(&mut self) -> WptDiffResult<()> {
        if let Some(previous) = self.observer.take() {
            self.page.remove_init_script(&previous).await?;
        }
        let id = self
            .page
            .add_init_script(&harness_observer_script(&self.body_addition))
            .await?;
        self.observer = Some(id);
        Ok(())
    }
}

/// What a [`MockPage`] does when a URL is opened
#[derive(Debug, Clone)]
enum MockBehavior {
    /// Deliver this payload through the binding
    Respond(String),
    /// Fail the navigation with this message
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    binding: Option<mpsc::UnboundedSender<String>>,
    init_scripts: Vec<(ScriptId, String)>,
    intercepts: Vec<(String, String)>,
    next_script: usize,
    closed: bool,
}

/// In-memory page for unit tests.
///
/// Opening a URL, by navigation or through the address bar, replays the
/// behaviour registered for it; unknown URLs never report results.
#[derive(Debug, Default)]
pub struct MockPage {
    behaviors: HashMap<String, MockBehavior>,
    service_workers: usize,
    load_delay: Duration,
    state: Mutex<MockState>,
    call_history: Mutex<Vec<String>>,
}

impl MockPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` through the binding when `url` is opened
    #[must_use]
    pub fn with_response(mut self, url: impl Into<String>, payload: impl Into<String>) -> Self {
        self.behaviors
            .insert(url.into(), MockBehavior::Respond(payload.into()));
        self
    }

    /// Fail navigation to `url` with `message`
    #[must_use]
    pub fn with_failure(mut self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.behaviors
            .insert(url.into(), MockBehavior::Fail(message.into()));
        self
    }

    #[must_use]
    pub const fn with_service_workers(mut self, count: usize) -> Self {
        self.service_workers = count;
        self
    }

    /// Make every `wait_for_load` take `delay`
    #[must_use]
    pub const fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Recorded calls, e.g. `navigate:https://...`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.history().iter().any(|c| c.starts_with(method))
    }

    /// Number of recorded calls starting with `method`
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.history().iter().filter(|c| c.starts_with(method)).count()
    }

    /// Sources of the init scripts currently installed
    #[must_use]
    pub fn init_scripts(&self) -> Vec<String> {
        self.state()
            .init_scripts
            .iter()
            .map(|(_, source)| source.clone())
            .collect()
    }

    /// Installed `(url, addition)` interceptions
    #[must_use]
    pub fn intercepts(&self) -> Vec<(String, String)> {
        self.state().intercepts.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn open(&self, url: &str) -> WptDiffResult<()> {
        let state = self.state();
        if state.closed {
            return Err(WptDiffError::page("Target closed"));
        }
        match self.behaviors.get(url) {
            Some(MockBehavior::Fail(message)) => Err(WptDiffError::Navigation {
                url: url.to_string(),
                message: message.clone(),
            }),
            Some(MockBehavior::Respond(payload)) => {
                if let Some(binding) = state.binding.as_ref() {
                    let _ = binding.send(payload.clone());
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn expose_binding(&self, name: &str) -> WptDiffResult<mpsc::UnboundedReceiver<String>> {
        self.record(format!("expose_binding:{name}"));
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().binding = Some(tx);
        Ok(rx)
    }

    async fn add_init_script(&self, source: &str) -> WptDiffResult<ScriptId> {
        self.record("add_init_script".to_string());
        let mut state = self.state();
        state.next_script += 1;
        let id = ScriptId(state.next_script.to_string());
        state.init_scripts.push((id.clone(), source.to_string()));
        Ok(id)
    }

    async fn remove_init_script(&self, id: &ScriptId) -> WptDiffResult<()> {
        self.record(format!("remove_init_script:{}", id.0));
        self.state().init_scripts.retain(|(existing, _)| existing != id);
        Ok(())
    }

    async fn intercept_script(&self, url: &str, addition: &str) -> WptDiffResult<()> {
        self.record(format!("intercept_script:{url}"));
        self.state()
            .intercepts
            .push((url.to_string(), addition.to_string()));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> WptDiffResult<()> {
        self.record(format!("navigate:{url}"));
        self.open(url)
    }

    async fn wait_for_load(&self) -> WptDiffResult<()> {
        self.record("wait_for_load".to_string());
        if self.state().closed {
            return Err(WptDiffError::page("Target closed"));
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        Ok(())
    }

    async fn fill_and_submit(&self, selector: &str, value: &str) -> WptDiffResult<()> {
        self.record(format!("fill_and_submit:{selector}:{value}"));
        self.open(value)
    }

    async fn service_worker_count(&self) -> WptDiffResult<usize> {
        self.record("service_worker_count".to_string());
        Ok(self.service_workers)
    }

    async fn close(&self) -> WptDiffResult<()> {
        self.record("close".to_string());
        let mut state = self.state();
        state.closed = true;
        state.binding = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::MaxTests;
    use crate::iterator::TestIterator;

    fn infos(paths: &[&str]) -> Vec<TestRunInfo> {
        let paths = paths.iter().map(|s| (*s).to_string()).collect();
        TestIterator::new("https://wpt.live", paths, MaxTests::All)
            .map(Result::unwrap)
            .collect()
    }

    fn fast_setup() -> Arc<dyn ProxySetup> {
        Arc::new(
            UrlBarProxySetup::new("http://localhost:1337")
                .with_settle_delay(Duration::ZERO)
                .with_service_worker_wait(Duration::ZERO),
        )
    }

    mod direct_tests {
        use super::*;

        #[tokio::test]
        async fn test_prepare_intercepts_harness_once() {
            let page = Arc::new(MockPage::new());
            let mut driver = NavigationDriver::direct(page.clone(), "HOOK");
            driver.prepare("https://wpt.live/").await.unwrap();
            driver.prepare("https://wpt.live/").await.unwrap();
            assert_eq!(
                page.intercepts(),
                vec![("https://wpt.live/resources/testharness.js".to_string(), "HOOK".to_string())]
            );
            assert_eq!(driver.state(), SessionState::Ready);
        }

        #[tokio::test]
        async fn test_navigates_directly_then_waits_for_load() {
            let page = Arc::new(MockPage::new());
            let mut driver = NavigationDriver::direct(page.clone(), "HOOK");
            driver.prepare("https://wpt.live").await.unwrap();
            for info in infos(&["/a.html", "/b.html"]) {
                driver.navigate(&info).await.unwrap();
            }
            let history = page.history();
            assert_eq!(
                &history[1..],
                &[
                    "navigate:https://wpt.live/a.html",
                    "wait_for_load",
                    "navigate:https://wpt.live/b.html",
                    "wait_for_load",
                ]
            );
            assert!(!page.was_called("add_init_script"));
        }

        #[tokio::test]
        async fn test_navigate_before_prepare_errors() {
            let mut driver = NavigationDriver::direct(Arc::new(MockPage::new()), "HOOK");
            let info = &infos(&["/a.html"])[0];
            assert!(driver.navigate(info).await.is_err());
        }
    }

    mod proxied_tests {
        use super::*;

        #[tokio::test]
        async fn test_first_test_bootstraps_then_uses_address_bar() {
            let page = Arc::new(MockPage::new().with_service_workers(1));
            let mut driver = NavigationDriver::proxied(page.clone(), fast_setup(), "HOOK")
                .with_settle_delay(Duration::ZERO);
            driver.prepare("https://wpt.live").await.unwrap();
            assert_eq!(driver.state(), SessionState::NotStarted);

            let tests = infos(&["/a.html", "/b.html", "/c.html"]);
            driver.navigate(&tests[0]).await.unwrap();
            assert_eq!(driver.state(), SessionState::ProxyBootstrapped);
            assert!(page.was_called("navigate:http://localhost:1337"));

            driver.navigate(&tests[1]).await.unwrap();
            driver.navigate(&tests[2]).await.unwrap();
            assert_eq!(driver.state(), SessionState::Ready);

            assert_eq!(page.call_count("navigate:"), 1);
            assert_eq!(page.call_count("fill_and_submit:.bar:"), 3);
            assert!(page.was_called("fill_and_submit:.bar:https://wpt.live/c.html"));
            assert!(page.intercepts().is_empty());
        }

        #[tokio::test]
        async fn test_observer_reinstalled_each_navigation() {
            let page = Arc::new(MockPage::new().with_service_workers(2));
            let mut driver = NavigationDriver::proxied(page.clone(), fast_setup(), "HOOK")
                .with_settle_delay(Duration::ZERO);
            for info in infos(&["/a.html", "/b.html", "/c.html"]) {
                driver.navigate(&info).await.unwrap();
            }
            assert_eq!(page.call_count("add_init_script"), 3);
            assert_eq!(page.call_count("remove_init_script"), 2);
            // Only the latest observer stays installed
            let scripts = page.init_scripts();
            assert_eq!(scripts.len(), 1);
            assert!(scripts[0].contains("testharnessreport.js"));
            assert!(scripts[0].contains("\"HOOK\""));
        }

        #[tokio::test]
        async fn test_missing_service_worker_is_proxy_setup_error() {
            let page = Arc::new(MockPage::new());
            let mut driver = NavigationDriver::proxied(page, fast_setup(), "HOOK");
            let err = driver.navigate(&infos(&["/a.html"])[0]).await.unwrap_err();
            assert!(matches!(err, WptDiffError::ProxySetup { .. }));
            assert!(err.to_string().contains("Failed to find any SWs"));
            assert_eq!(driver.state(), SessionState::NotStarted);
        }

        #[tokio::test]
        async fn test_bootstrap_then_navigate_only_waits_for_load() {
            let page = Arc::new(MockPage::new().with_service_workers(1));
            let mut driver = NavigationDriver::proxied(page.clone(), fast_setup(), "HOOK")
                .with_settle_delay(Duration::ZERO);
            let tests = infos(&["/a.html", "/b.html"]);

            assert!(driver.needs_bootstrap());
            driver.bootstrap(&tests[0]).await.unwrap();
            assert!(!driver.needs_bootstrap());
            let submits = page.call_count("fill_and_submit:");

            driver.navigate(&tests[0]).await.unwrap();
            assert_eq!(page.call_count("fill_and_submit:"), submits);
            assert_eq!(page.history().last().map(String::as_str), Some("wait_for_load"));

            driver.navigate(&tests[1]).await.unwrap();
            assert!(page.was_called("fill_and_submit:.bar:https://wpt.live/b.html"));
        }

        #[tokio::test]
        async fn test_setup_failure_becomes_proxy_setup_error() {
            let page = Arc::new(
                MockPage::new()
                    .with_service_workers(1)
                    .with_failure("http://localhost:1337", "net::ERR_CONNECTION_REFUSED"),
            );
            let mut driver = NavigationDriver::proxied(page, fast_setup(), "HOOK");
            let err = driver.bootstrap(&infos(&["/a.html"])[0]).await.unwrap_err();
            assert!(matches!(err, WptDiffError::ProxySetup { .. }));
            assert!(err.to_string().contains("ERR_CONNECTION_REFUSED"));
        }

        #[test]
        fn test_direct_never_needs_bootstrap() {
            let driver = NavigationDriver::direct(Arc::new(MockPage::new()), "HOOK");
            assert!(!driver.needs_bootstrap());
        }
    }

    #[test]
    fn test_observer_script_escapes_addition() {
        let script = harness_observer_script("console.log(`x`); \"quoted\"\n");
        assert!(script.contains(r#"const addition = "console.log(`x`); \"quoted\"\n";"#));
        assert!(script.contains("node.after(hook)"));
    }

    #[tokio::test]
    async fn test_mock_page_close_marks_target_closed() {
        let page = MockPage::new();
        page.close().await.unwrap();
        let err = page.navigate("https://wpt.live/a.html").await.unwrap_err();
        assert!(err.is_target_closed());
        assert!(page.is_closed());
    }
}
