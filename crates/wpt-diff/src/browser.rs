//! Chromium control over CDP.
//!
//! [`BrowserConfig`] is always available so callers can build it without
//! the `browser` feature; launching needs chromiumoxide.

use crate::console::ConsoleForwarder;
use std::path::PathBuf;

/// Browser launch configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a visible window
    pub headless: bool,
    /// Chromium binary to use instead of the detected one
    pub chromium_path: Option<PathBuf>,
    /// Keep the Chromium sandbox enabled
    pub sandbox: bool,
    /// Tests run inside a proxy's iframe; affects console filtering
    pub under_proxy: bool,
    /// Forward the page's console output into the log
    pub verbose: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            sandbox: true,
            under_proxy: false,
            verbose: false,
        }
    }
}

impl BrowserConfig {
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_chromium_path(mut self, path: Option<PathBuf>) -> Self {
        self.chromium_path = path;
        self
    }

    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    #[must_use]
    pub const fn with_under_proxy(mut self, under_proxy: bool) -> Self {
        self.under_proxy = under_proxy;
        self
    }

    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Page console forwarding, only for verbose runs
    #[must_use]
    pub const fn console_forwarder(&self) -> Option<ConsoleForwarder> {
        if self.verbose {
            Some(ConsoleForwarder::new(self.under_proxy))
        } else {
            None
        }
    }
}

// ============================================================================
// Real CDP implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
mod cdp {
    use super::BrowserConfig;
    use crate::console::{ConsoleForwarder, ConsoleLevel};
    use crate::driver::{PageDriver, ScriptId};
    use crate::result::{WptDiffError, WptDiffResult};
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::fetch::{
        ContinueRequestParams, EnableParams, EventRequestPaused, FulfillRequestParams,
        GetResponseBodyParams, HeaderEntry, RequestPattern, RequestStage,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
        RemoveScriptToEvaluateOnNewDocumentParams, ScriptIdentifier,
    };
    use chromiumoxide::cdp::browser_protocol::target::GetTargetsParams;
    use chromiumoxide::cdp::js_protocol::runtime::{
        AddBindingParams, EventBindingCalled, EventConsoleApiCalled, RemoteObject,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex as StdMutex, PoisonError};
    use tokio::sync::{Mutex, mpsc};
    use tokio::task::JoinHandle;

    fn page_error(e: impl std::fmt::Display) -> WptDiffError {
        WptDiffError::page(e.to_string())
    }

    /// Browser instance with a live CDP connection
    #[derive(Debug)]
    pub struct Browser {
        config: BrowserConfig,
        inner: Arc<Mutex<CdpBrowser>>,
        handle: JoinHandle<()>,
    }

    impl Browser {
        /// Launch Chromium
        pub async fn launch(config: BrowserConfig) -> WptDiffResult<Self> {
            let mut builder = CdpConfig::builder();

            if !config.headless {
                builder = builder.with_head();
            }

            if !config.sandbox {
                builder = builder.no_sandbox();
            }

            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }

            let cdp_config = builder
                .build()
                .map_err(|message| WptDiffError::BrowserLaunch { message })?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
                WptDiffError::BrowserLaunch {
                    message: e.to_string(),
                }
            })?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        tracing::debug!("CDP handler stopped: {e}");
                        break;
                    }
                }
            });

            tracing::info!(headless = config.headless, "Browser launched");
            Ok(Self {
                config,
                inner: Arc::new(Mutex::new(browser)),
                handle,
            })
        }

        /// Open a blank page, forwarding its console when verbose
        pub async fn new_page(&self) -> WptDiffResult<CdpPageDriver> {
            let page = self
                .inner
                .lock()
                .await
                .new_page("about:blank")
                .await
                .map_err(page_error)?;

            let driver = CdpPageDriver {
                page,
                browser: self.inner.clone(),
                tasks: StdMutex::new(Vec::new()),
            };
            if let Some(forwarder) = self.config.console_forwarder() {
                driver.forward_console(forwarder).await?;
            }
            Ok(driver)
        }
    }

    impl Drop for Browser {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    /// [`PageDriver`] over one chromiumoxide page
    #[derive(Debug)]
    pub struct CdpPageDriver {
        page: CdpPage,
        browser: Arc<Mutex<CdpBrowser>>,
        tasks: StdMutex<Vec<JoinHandle<()>>>,
    }

    impl CdpPageDriver {
        fn track(&self, task: JoinHandle<()>) {
            self.tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task);
        }

        async fn forward_console(&self, forwarder: ConsoleForwarder) -> WptDiffResult<()> {
            let mut events = self
                .page
                .event_listener::<EventConsoleApiCalled>()
                .await
                .map_err(page_error)?;
            self.track(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let Some(level) = ConsoleLevel::from_cdp(event.r#type.as_ref()) else {
                        continue;
                    };
                    let source = event
                        .stack_trace
                        .as_ref()
                        .and_then(|trace| trace.call_frames.first())
                        .map_or("", |frame| frame.url.as_str());
                    let text = event
                        .args
                        .iter()
                        .map(remote_object_text)
                        .collect::<Vec<_>>()
                        .join(" ");
                    forwarder.forward(level, source, &text);
                }
            }));
            Ok(())
        }
    }

    fn remote_object_text(object: &RemoteObject) -> String {
        match object.value.as_ref() {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => object.description.clone().unwrap_or_default(),
        }
    }

    /// Answer a paused response with the original body plus `addition`
    async fn fulfill_with_addition(
        page: &CdpPage,
        event: &EventRequestPaused,
        addition: &str,
    ) -> WptDiffResult<()> {
        let original = page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
            .map_err(page_error)?;
        let mut body = if original.base64_encoded {
            STANDARD.decode(&original.body).map_err(page_error)?
        } else {
            original.body.clone().into_bytes()
        };
        body.extend_from_slice(addition.as_bytes());

        let fulfill = FulfillRequestParams::builder()
            .request_id(event.request_id.clone())
            .response_code(200)
            .response_header(HeaderEntry::new("Content-Type", "text/javascript"))
            .body(STANDARD.encode(&body))
            .build()
            .map_err(WptDiffError::page)?;
        page.execute(fulfill).await.map_err(page_error)?;
        Ok(())
    }

    #[async_trait]
    impl PageDriver for CdpPageDriver {
        async fn expose_binding(
            &self,
            name: &str,
        ) -> WptDiffResult<mpsc::UnboundedReceiver<String>> {
            let mut calls = self
                .page
                .event_listener::<EventBindingCalled>()
                .await
                .map_err(page_error)?;
            self.page
                .execute(AddBindingParams::new(name))
                .await
                .map_err(|e| WptDiffError::Binding {
                    message: e.to_string(),
                })?;

            let (tx, rx) = mpsc::unbounded_channel();
            let name = name.to_string();
            self.track(tokio::spawn(async move {
                while let Some(call) = calls.next().await {
                    if call.name == name && tx.send(call.payload.clone()).is_err() {
                        break;
                    }
                }
            }));
            Ok(rx)
        }

        async fn add_init_script(&self, source: &str) -> WptDiffResult<ScriptId> {
            let added = self
                .page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
                .await
                .map_err(page_error)?;
            Ok(ScriptId(added.identifier.inner().clone()))
        }

        async fn remove_init_script(&self, id: &ScriptId) -> WptDiffResult<()> {
            self.page
                .execute(RemoveScriptToEvaluateOnNewDocumentParams::new(
                    ScriptIdentifier::new(id.0.clone()),
                ))
                .await
                .map_err(page_error)?;
            Ok(())
        }

        async fn intercept_script(&self, url: &str, addition: &str) -> WptDiffResult<()> {
            let mut paused = self
                .page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(page_error)?;
            let pattern = RequestPattern::builder()
                .url_pattern(url)
                .request_stage(RequestStage::Response)
                .build();
            self.page
                .execute(EnableParams::builder().pattern(pattern).build())
                .await
                .map_err(page_error)?;

            let page = self.page.clone();
            let addition = addition.to_string();
            self.track(tokio::spawn(async move {
                while let Some(event) = paused.next().await {
                    tracing::debug!(url = %event.request.url, "appending the completion hook");
                    if let Err(e) = fulfill_with_addition(&page, &event, &addition).await {
                        tracing::warn!("Failed to rewrite {}: {e}", event.request.url);
                        let _ = page
                            .execute(ContinueRequestParams::new(event.request_id.clone()))
                            .await;
                    }
                }
            }));
            Ok(())
        }

        async fn navigate(&self, url: &str) -> WptDiffResult<()> {
            let navigated = self
                .page
                .execute(NavigateParams::new(url))
                .await
                .map_err(|e| WptDiffError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            match navigated.error_text.as_ref() {
                Some(message) => Err(WptDiffError::Navigation {
                    url: url.to_string(),
                    message: message.clone(),
                }),
                None => Ok(()),
            }
        }

        async fn wait_for_load(&self) -> WptDiffResult<()> {
            self.page.wait_for_navigation().await.map_err(page_error)?;
            Ok(())
        }

        async fn fill_and_submit(&self, selector: &str, value: &str) -> WptDiffResult<()> {
            let input = self.page.find_element(selector).await.map_err(page_error)?;
            input.click().await.map_err(page_error)?;
            input
                .call_js_fn("function() { this.value = ''; }", false)
                .await
                .map_err(page_error)?;
            input.type_str(value).await.map_err(page_error)?;
            input.press_key("Enter").await.map_err(page_error)?;
            Ok(())
        }

        async fn service_worker_count(&self) -> WptDiffResult<usize> {
            let targets = self
                .page
                .execute(GetTargetsParams::default())
                .await
                .map_err(page_error)?;
            Ok(targets
                .target_infos
                .iter()
                .filter(|target| target.r#type == "service_worker")
                .count())
        }

        async fn close(&self) -> WptDiffResult<()> {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            for task in tasks {
                task.abort();
            }
            let mut browser = self.browser.lock().await;
            browser.close().await.map_err(|e| WptDiffError::BrowserLaunch {
                message: e.to_string(),
            })?;
            let _ = browser.wait().await;
            Ok(())
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::{Browser, CdpPageDriver};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_headless_and_sandboxed() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert!(config.sandbox);
        assert!(config.chromium_path.is_none());
    }

    #[test]
    fn test_builders() {
        let config = BrowserConfig::default()
            .with_headless(false)
            .with_no_sandbox()
            .with_chromium_path(Some(PathBuf::from("/usr/bin/chromium")))
            .with_under_proxy(true);
        assert!(!config.headless);
        assert!(!config.sandbox);
        assert!(config.under_proxy);
        assert_eq!(config.chromium_path, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn test_console_forwarding_needs_verbose() {
        assert!(BrowserConfig::default().console_forwarder().is_none());
        assert!(BrowserConfig::default()
            .with_under_proxy(true)
            .console_forwarder()
            .is_none());

        let forwarder = BrowserConfig::default()
            .with_under_proxy(true)
            .with_verbose(true)
            .console_forwarder()
            .unwrap();
        assert_eq!(forwarder.prefix(), "[Iframe Console]");
        assert_eq!(
            BrowserConfig::default().with_verbose(true).console_forwarder().unwrap().prefix(),
            "[Browser Console]"
        );
    }
}
