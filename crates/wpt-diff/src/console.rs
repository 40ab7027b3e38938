//! Forwarding of page console output into the host's tracing output.

/// Console API call kinds we forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map a CDP `Runtime.consoleAPICalled` type name
    #[must_use]
    pub fn from_cdp(kind: &str) -> Option<Self> {
        match kind {
            "log" | "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Substrings of proxy bootstrap chatter that are never forwarded
const PROXY_NOISE: &[&str] = &[
    "bare-mux:",
    "[dreamland.js]",
    "config loaded",
    "handleSubmit",
    "rewrite",
    "initializing scramjet client",
];

/// Decides which page console messages reach the log
#[derive(Debug, Clone, Copy)]
pub struct ConsoleForwarder {
    under_proxy: bool,
}

impl ConsoleForwarder {
    #[must_use]
    pub const fn new(under_proxy: bool) -> Self {
        Self { under_proxy }
    }

    /// Under a proxy only messages from the proxied frame are kept, minus
    /// known bootstrap noise
    #[must_use]
    pub fn should_forward(&self, source_url: &str, text: &str) -> bool {
        if !self.under_proxy {
            return true;
        }
        let from_frame = source_url.contains("/scram/") || source_url.contains("/scramjet/");
        from_frame && !PROXY_NOISE.iter().any(|noise| text.contains(noise))
    }

    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        if self.under_proxy {
            "[Iframe Console]"
        } else {
            "[Browser Console]"
        }
    }

    /// Emit one console message if it passes the filter
    pub fn forward(&self, level: ConsoleLevel, source_url: &str, text: &str) {
        if !self.should_forward(source_url, text) {
            return;
        }
        let prefix = self.prefix();
        match level {
            ConsoleLevel::Debug => tracing::debug!(target: "wpt_diff::page", "{prefix} {text}"),
            ConsoleLevel::Info => tracing::info!(target: "wpt_diff::page", "{prefix} {text}"),
            ConsoleLevel::Warning => tracing::warn!(target: "wpt_diff::page", "{prefix} {text}"),
            ConsoleLevel::Error => tracing::error!(target: "wpt_diff::page", "{prefix} {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_forwards_everything() {
        let f = ConsoleForwarder::new(false);
        assert!(f.should_forward("https://wpt.live/dom/a.html", "rewrite happened"));
        assert_eq!(f.prefix(), "[Browser Console]");
    }

    #[test]
    fn test_proxy_keeps_only_frame_messages() {
        let f = ConsoleForwarder::new(true);
        assert!(f.should_forward("http://localhost:1337/scram/https%3A%2F%2Fwpt.live/a.html", "assert failed"));
        assert!(!f.should_forward("http://localhost:1337/index.js", "assert failed"));
        assert_eq!(f.prefix(), "[Iframe Console]");
    }

    #[test]
    fn test_proxy_hides_noise() {
        let f = ConsoleForwarder::new(true);
        for noise in PROXY_NOISE {
            assert!(!f.should_forward("http://localhost:1337/scramjet/x.js", &format!("{noise} hello")));
        }
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(ConsoleLevel::from_cdp("log"), Some(ConsoleLevel::Info));
        assert_eq!(ConsoleLevel::from_cdp("warning"), Some(ConsoleLevel::Warning));
        assert_eq!(ConsoleLevel::from_cdp("table"), None);
    }
}
