//! Test selection pipeline.
//!
//! Stages run in a fixed order, each narrowing the set:
//!
//! 1. explicit paths or scope prefix
//! 2. category exclusion
//! 3. shard partition
//! 4. max-test cap
//! 5. runnability (path must be a known testharness test)

use crate::config::TestOptions;
use crate::manifest::TimeoutMap;
use crate::shard::ShardConfig;

/// Top-level directories that need WebDriver-style automation we do not
/// provide. Like the other directory lists, entries match as path prefixes.
pub const TESTDRIVER_DIRS: &[&str] = &[
    "/webdriver/",
    "/permissions/",
    "/permissions-policy/",
    "/permissions-request/",
    "/geolocation/",
    "/geolocation-API/",
    "/notifications/",
    "/screen-wake-lock/",
    "/web-bluetooth/",
    "/webusb/",
    "/webhid/",
    "/web-nfc/",
    "/serial/",
    "/clipboard-apis/",
    "/fullscreen/",
    "/pointerlock/",
    "/screen-orientation/",
    "/storage-access-api/",
    "/credential-management/",
    "/webauthn/",
    "/idle-detection/",
    "/contacts/",
    "/printing/",
    "/virtual-keyboard/",
];

/// Directories whose tests simulate user input
pub const INTERACTION_DIRS: &[&str] = &[
    "/touch-events/",
    "/pointerevents/",
    "/uievents/",
    "/input-events/",
    "/keyboard-lock/",
    "/keyboard-map/",
    "/html/user-activation/",
    "/html/interaction/",
    "/editing/",
    "/selection/",
    "/dnd/",
    "/html/editing/dnd/",
];

/// Filename fragments that indicate automation or input simulation
pub const TESTDRIVER_PATTERNS: &[&str] = &["testdriver", "user-activation", "automation", "interaction"];

/// Directories where a network proxy cannot change the outcome
pub const PROXY_IRRELEVANT_DIRS: &[&str] = &[
    "/WebCryptoAPI/",
    "/webcrypto/",
    "/crypto/",
    "/generic-sensor/",
    "/accelerometer/",
    "/gyroscope/",
    "/magnetometer/",
    "/orientation-sensor/",
    "/ambient-light/",
    "/proximity/",
    "/battery-status/",
    "/device-memory/",
    "/wasm/",
    "/js/",
    "/fs/",
    "/file-system-access/",
    "/native-file-system/",
    "/webrtc/",
    "/webrtc-extensions/",
    "/webrtc-stats/",
    "/webrtc-encoded-transform/",
    "/mediacapture-streams/",
    "/mediacapture-record/",
    "/webcodecs/",
    "/webgpu/",
    "/webxr/",
    "/webnn/",
    "/accessibility/",
    "/accname/",
    "/wai-aria/",
    "/core-aam/",
    "/html-aam/",
    "/svg-aam/",
    "/dpub-aam/",
    "/graphics-aam/",
    "/devtools/",
    "/infrastructure/",
    "/speech-api/",
    "/gamepad/",
    "/vibration/",
    "/media-source/",
    "/encrypted-media/",
    "/audio-output/",
    "/webaudio/",
    "/compute-pressure/",
    "/shape-detection/",
];

/// Filename fragments for tests a proxy cannot meaningfully affect
pub const PROXY_IRRELEVANT_PATTERNS: &[&str] = &[
    "idlharness",
    ".tentative.",
    ".https.",
    "-manual.",
    "rendering",
    "layout",
    "/css/",
    "css-",
    "-css",
    "payment",
    "financial",
    "file-upload",
    "fileupload",
    "file-input",
];

/// Why a path was dropped during category exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Reference or manual test, not testharness
    NotTestharness,
    Testdriver,
    Interaction,
    ProxyIrrelevant,
}

/// The category that excludes `path`, if any
#[must_use]
pub fn exclusion_reason(path: &str) -> Option<ExclusionReason> {
    let path_lower = path.to_ascii_lowercase();
    let has_dir = |dirs: &[&str]| dirs.iter().any(|dir| path.starts_with(dir));
    let has_pattern = |patterns: &[&str]| patterns.iter().any(|p| path_lower.contains(p));

    if path.contains("/reftest/") || path.contains("/manual/") {
        Some(ExclusionReason::NotTestharness)
    } else if has_dir(TESTDRIVER_DIRS) || has_pattern(TESTDRIVER_PATTERNS) {
        Some(ExclusionReason::Testdriver)
    } else if has_dir(INTERACTION_DIRS) {
        Some(ExclusionReason::Interaction)
    } else if has_dir(PROXY_IRRELEVANT_DIRS) || has_pattern(PROXY_IRRELEVANT_PATTERNS) {
        Some(ExclusionReason::ProxyIrrelevant)
    } else {
        None
    }
}

/// Run the selection pipeline over candidate paths
#[must_use]
pub fn filter_tests(paths: &[String], timeouts: &TimeoutMap, options: &TestOptions) -> Vec<String> {
    let mut selected: Vec<String> = if options.test_paths.is_empty() {
        match options.scope.as_deref() {
            Some(scope) => paths.iter().filter(|p| p.starts_with(scope)).cloned().collect(),
            None => paths.to_vec(),
        }
    } else {
        paths
            .iter()
            .filter(|p| matches_requested(p, &options.test_paths))
            .cloned()
            .collect()
    };
    tracing::debug!(remaining = selected.len(), "after scope filter");

    selected.retain(|p| exclusion_reason(p).is_none());
    tracing::debug!(remaining = selected.len(), "after category exclusion");

    if let (Some(shard), Some(total)) = (options.shard, options.total_shards) {
        match ShardConfig::new(shard, total) {
            Ok(config) => {
                selected = config.filter_tests(&selected);
                tracing::debug!(shard = %config, remaining = selected.len(), "after sharding");
            }
            Err(e) => {
                tracing::error!(shard, total, "invalid shard configuration: {e}");
                return Vec::new();
            }
        }
    }

    if let Some(limit) = options.max_tests.limit() {
        selected.truncate(limit);
    }

    selected.retain(|p| timeouts.contains(p));
    tracing::debug!(remaining = selected.len(), "after runnability filter");
    selected
}

/// Exact `.html` match or containment under a requested directory
fn matches_requested(path: &str, requested: &[String]) -> bool {
    requested.iter().any(|want| {
        if want.ends_with(".html") {
            path == want
        } else {
            let dir = if want.ends_with('/') {
                want.clone()
            } else {
                format!("{want}/")
            };
            path.starts_with(&dir)
        }
    })
}
