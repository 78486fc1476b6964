use std::path::PathBuf;
use std::time::Duration;

use pulse_core::privacy::PrivacyMode;

pub const DETECTOR_URL_ENV: &str = "PULSE_DETECTOR_URL";
pub const DETECTOR_TIMEOUT_MS_ENV: &str = "PULSE_DETECTOR_TIMEOUT_MS";
pub const SCAFFOLD_DIR_ENV: &str = "PULSE_SCAFFOLD_DIR";
pub const AUDIT_LOG_ENV: &str = "PULSE_AUDIT_LOG";
pub const DEFAULT_PRIVACY_MODE_ENV: &str = "PULSE_DEFAULT_PRIVACY_MODE";

pub const DETECTOR_TIMEOUT_MS_DEFAULT: u64 = 2_000;
pub const DETECTOR_TIMEOUT_MS_MIN: u64 = 50;
pub const DETECTOR_TIMEOUT_MS_MAX: u64 = 30_000;

/// `PULSE_AUDIT_LOG=default` resolves to this file under the platform data dir.
const DEFAULT_AUDIT_FILE: &str = "audit.jsonl";

/// Runtime settings shared by the stdio server, the HTTP API and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub detector_url: Option<String>,
    pub detector_timeout: Duration,
    pub scaffold_dir: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub default_privacy_mode: PrivacyMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            detector_url: None,
            detector_timeout: Duration::from_millis(DETECTOR_TIMEOUT_MS_DEFAULT),
            scaffold_dir: None,
            audit_log: None,
            default_privacy_mode: PrivacyMode::Strict,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests need not touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (timeout_ms, timeout_overridden) = parse_env_u64_with_bounds(
            lookup(DETECTOR_TIMEOUT_MS_ENV),
            DETECTOR_TIMEOUT_MS_MIN,
            DETECTOR_TIMEOUT_MS_MAX,
            DETECTOR_TIMEOUT_MS_DEFAULT,
        );
        if timeout_overridden {
            tracing::debug!(timeout_ms, "detector timeout overridden from environment");
        }

        let default_privacy_mode = match non_empty(lookup(DEFAULT_PRIVACY_MODE_ENV)) {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring {DEFAULT_PRIVACY_MODE_ENV}, using strict");
                PrivacyMode::Strict
            }),
            None => PrivacyMode::Strict,
        };

        Self {
            detector_url: non_empty(lookup(DETECTOR_URL_ENV)),
            detector_timeout: Duration::from_millis(timeout_ms),
            scaffold_dir: non_empty(lookup(SCAFFOLD_DIR_ENV)).map(PathBuf::from),
            audit_log: non_empty(lookup(AUDIT_LOG_ENV)).and_then(|raw| resolve_audit_path(&raw)),
            default_privacy_mode,
        }
    }

    pub fn detector_timeout_ms(&self) -> u64 {
        u64::try_from(self.detector_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_audit_path(raw: &str) -> Option<PathBuf> {
    if raw.eq_ignore_ascii_case("default") {
        return dirs::data_dir().map(|dir| dir.join("pulse").join(DEFAULT_AUDIT_FILE));
    }
    Some(PathBuf::from(raw))
}

pub(crate) fn parse_env_u64_with_bounds(
    raw: Option<String>,
    min: u64,
    max: u64,
    default: u64,
) -> (u64, bool) {
    match raw.and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(parsed) => (parsed.clamp(min, max), true),
        None => (default, false),
    }
}
