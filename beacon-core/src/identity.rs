//! Session and device identity
//!
//! Neither identifier requires server-side authentication and neither ever
//! touches the network:
//!
//! - The **session id** is created lazily on first read and then frozen for
//!   the lifetime of the [`IdentityProvider`] and all of its clones. Clones
//!   play the role of page instances in the same tab group. Nothing is
//!   persisted, so a process restart starts a new session.
//! - The **device fingerprint** is a hash over environment signals,
//!   recomputed on every call. It is only as stable as the signals are, and
//!   two devices with identical signals collide.

use crate::config::IdentityConfig;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

/// Signals the fingerprint is derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSignals {
    /// Rendering surface, `WIDTHxHEIGHT` or `unknown`
    pub screen: String,
    pub locale: String,
    /// Minutes east of UTC
    pub timezone_offset_minutes: i32,
    pub user_agent: String,
}

impl EnvironmentSignals {
    /// Read the current environment, applying configured overrides
    pub fn detect(overrides: &IdentityConfig) -> Self {
        let screen = overrides.screen.clone().unwrap_or_else(detect_screen);
        let locale = overrides.locale.clone().unwrap_or_else(detect_locale);
        let user_agent = overrides
            .user_agent
            .clone()
            .unwrap_or_else(default_user_agent);
        let timezone_offset_minutes = chrono::Local::now().offset().local_minus_utc() / 60;

        Self {
            screen,
            locale,
            timezone_offset_minutes,
            user_agent,
        }
    }

    /// Stable 32-char hex digest of the signals
    pub fn fingerprint(&self) -> String {
        let hash_input = format!(
            "{}|{}|{}|{}",
            self.screen, self.locale, self.timezone_offset_minutes, self.user_agent
        );

        let mut hasher = Sha256::new();
        hasher.update(hash_input.as_bytes());
        let result = hasher.finalize();

        hex::encode(&result[..16])
    }
}

fn detect_screen() -> String {
    let dim = |name: &str| {
        std::env::var(name)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
    };
    match (dim("COLUMNS"), dim("LINES")) {
        (Some(w), Some(h)) => format!("{}x{}", w, h),
        _ => "unknown".to_string(),
    }
}

/// POSIX locale (`en_US.UTF-8`) to a BCP 47 tag (`en-US`)
fn detect_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
        .map(|raw| normalize_locale(&raw))
        .unwrap_or_else(|| "und".to_string())
}

fn normalize_locale(raw: &str) -> String {
    let base = raw.split(['.', '@']).next().unwrap_or(raw);
    if base.is_empty() || base == "C" || base == "POSIX" {
        return "und".to_string();
    }
    base.replace('_', "-")
}

fn default_user_agent() -> String {
    format!(
        "beacon/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn new_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// Hands out the session id and device fingerprint for event envelopes
#[derive(Debug, Clone, Default)]
pub struct IdentityProvider {
    session: Arc<OnceLock<String>>,
    overrides: IdentityConfig,
}

impl IdentityProvider {
    pub fn new(overrides: IdentityConfig) -> Self {
        Self {
            session: Arc::new(OnceLock::new()),
            overrides,
        }
    }

    /// Session id, created on first call
    pub fn session_id(&self) -> String {
        self.session.get_or_init(new_session_id).clone()
    }

    /// Device fingerprint, recomputed from the current signals
    pub fn device_fingerprint(&self) -> String {
        EnvironmentSignals::detect(&self.overrides).fingerprint()
    }
}
