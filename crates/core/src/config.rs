//! Manager configuration
//!
//! [`ManagerConfig`] holds the defaults every request starts from; each
//! request may override them through [`RequestOptions`].
//!
//! ## Loading Strategy
//! 1. Start from [`ManagerConfig::default`] or a config file
//! 2. Apply `ARLM_*` environment overrides on top
//! 3. Validate the result
//!
//! ## Environment Variables
//! - `ARLM_TTL_MS`: freshness window for successful entries (0 = no expiry)
//! - `ARLM_RETRY_MAX_ATTEMPTS`: total attempts per fetch, including the first
//! - `ARLM_RETRY_BASE_DELAY_MS`: first backoff delay
//! - `ARLM_RETRY_MAX_DELAY_MS`: backoff cap
//! - `ARLM_RETRY_JITTER_RATIO`: jitter as a fraction of the delay, `[0, 1]`
//! - `ARLM_DEBOUNCE_MS`: quiet period for debounced requests
//! - `ARLM_DEDUP_WINDOW_MS`: how long a settled entry answers repeat requests
//! - `ARLM_TIMEOUT_MS`: per-attempt timeout (`0` or `none` disables it)
//! - `ARLM_EVICTION_GRACE_MS`: how long an unobserved entry survives
//!
//! ## File Locations
//! When no path is given, `./arlm.toml` then `./arlm.json` are tried.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arlm_common::error::CommonError;
use arlm_common::resilience::{BackoffStrategy, Jitter, RetryConfig};
use arlm_common::{duration_millis, option_duration_millis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// Global defaults for a [`ResourceManager`](crate::ResourceManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Freshness window of a successful entry; zero means it never goes stale
    #[serde(rename = "ttl_ms", with = "duration_millis")]
    pub ttl: Duration,

    pub retry: RetrySettings,

    #[serde(rename = "debounce_ms", with = "duration_millis")]
    pub debounce: Duration,

    /// Settled entries (success or failure) answer repeat requests for this long
    #[serde(rename = "dedup_window_ms", with = "duration_millis")]
    pub dedup_window: Duration,

    #[serde(rename = "timeout_ms", with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Unobserved entries older than this are dropped by `evict_idle`
    #[serde(rename = "eviction_grace_ms", with = "duration_millis")]
    pub eviction_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::ZERO,
            retry: RetrySettings::default(),
            debounce: Duration::from_millis(200),
            dedup_window: Duration::ZERO,
            timeout: None,
            eviction_grace: Duration::from_secs(300),
        }
    }
}

/// Serialized form of the retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.1,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        let jitter = if self.jitter_ratio != 0.0 {
            Jitter::Proportional { ratio: self.jitter_ratio }
        } else {
            Jitter::None
        };

        RetryConfig {
            max_attempts: self.max_attempts,
            backoff: BackoffStrategy::Exponential {
                initial_delay: self.base_delay,
                base: 2.0,
                max_delay: self.max_delay,
            },
            jitter,
        }
    }
}

impl ManagerConfig {
    /// Options a request gets when it does not override anything
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            ttl: self.ttl,
            retry: self.retry.to_retry_config(),
            dedup_window: self.dedup_window,
            debounce: self.debounce,
            timeout: self.timeout,
            intent: None,
        }
    }

    /// # Errors
    ///
    /// [`ResourceError::Config`] naming the offending field.
    pub fn validate(&self) -> ResourceResult<()> {
        self.retry.to_retry_config().validate()?;

        if self.timeout == Some(Duration::ZERO) {
            return Err(CommonError::config_field(
                "timeout_ms",
                "timeout must be positive; omit it to disable",
            )
            .into());
        }

        Ok(())
    }
}

/// Per-request settings, seeded from [`ManagerConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub ttl: Duration,
    pub retry: RetryConfig,
    pub dedup_window: Duration,
    pub debounce: Duration,
    pub timeout: Option<Duration>,
    /// Requests dedup against a pending fetch only when their intents match
    pub intent: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        ManagerConfig::default().request_options()
    }
}

impl RequestOptions {
    /// How long a success answers repeat requests without refetching
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Retry budget and backoff for transient failures
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Single attempt; failures settle immediately
    pub fn no_retry(mut self) -> Self {
        self.retry.max_attempts = 1;
        self
    }

    /// Window in which a same-intent request joins the pending fetch
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Quiet period for [`request_debounced`](crate::ResourceManager::request_debounced)
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce = delay;
        self
    }

    /// Deadline per attempt; overruns fail with [`FetchError::Timeout`](crate::FetchError::Timeout)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Label distinguishing requests on one key that must not be merged
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

/// Load configuration: file (explicit or discovered) as the base, environment on
/// top, then validation
///
/// A missing discovered file is not an error; defaults are used instead.
///
/// # Errors
/// Returns [`ResourceError::Config`] if an explicit file is missing, a file
/// or variable cannot be parsed, or the result fails validation.
pub fn load(path: Option<&Path>) -> ResourceResult<ManagerConfig> {
    let mut config = match path.map(Path::to_path_buf).or_else(find_config_path) {
        Some(path) => load_from_file(&path)?,
        None => {
            debug!("No config file found, starting from defaults");
            ManagerConfig::default()
        }
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus `ARLM_*` overrides
///
/// # Errors
/// Returns [`ResourceError::Config`] if a variable holds an invalid value.
pub fn load_from_env() -> ResourceResult<ManagerConfig> {
    let mut config = ManagerConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Parse a TOML or JSON file, picked by extension
///
/// Missing fields take their defaults. The result is not validated.
///
/// # Errors
/// Returns [`ResourceError::Config`] if the file is missing, unreadable, in
/// an unsupported format, or malformed.
pub fn load_from_file(path: &Path) -> ResourceResult<ManagerConfig> {
    if !path.exists() {
        let message = format!("Config file not found: {}", path.display());
        return Err(CommonError::config(message).into());
    }

    info!(path = %path.display(), "Loading manager configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CommonError::config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, path)
}

fn parse_config(contents: &str, path: &Path) -> ResourceResult<ManagerConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    let parsed: Result<ManagerConfig, CommonError> = match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CommonError::serialization_format("toml", e.to_string())),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CommonError::serialization_format("json", e.to_string())),
        other => Err(CommonError::config(format!("Unsupported config format: {}", other))),
    };

    Ok(parsed?)
}

/// First existing `arlm.toml` / `arlm.json` in the working directory
pub fn find_config_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    [cwd.join("arlm.toml"), cwd.join("arlm.json")].into_iter().find(|path| path.exists())
}

/// Apply `ARLM_*` overrides read through `lookup`
///
/// # Errors
/// Returns [`ResourceError::Config`] naming the variable that failed to parse.
pub fn apply_env_overrides<F>(config: &mut ManagerConfig, lookup: F) -> ResourceResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_TTL_MS")? {
        config.ttl = Duration::from_millis(ms);
    }
    if let Some(attempts) = env_parse::<u32, _>(&lookup, "ARLM_RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = attempts;
    }
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_RETRY_MAX_DELAY_MS")? {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(ratio) = env_parse::<f64, _>(&lookup, "ARLM_RETRY_JITTER_RATIO")? {
        config.retry.jitter_ratio = ratio;
    }
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_DEBOUNCE_MS")? {
        config.debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_DEDUP_WINDOW_MS")? {
        config.dedup_window = Duration::from_millis(ms);
    }
    if let Some(raw) = lookup("ARLM_TIMEOUT_MS") {
        config.timeout = match raw.trim() {
            "" | "0" | "none" => None,
            value => Some(Duration::from_millis(parse_var("ARLM_TIMEOUT_MS", value)?)),
        };
    }
    if let Some(ms) = env_parse::<u64, _>(&lookup, "ARLM_EVICTION_GRACE_MS")? {
        config.eviction_grace = Duration::from_millis(ms);
    }
    Ok(())
}

fn env_parse<T, F>(lookup: &F, name: &str) -> ResourceResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|raw| parse_var(name, raw.trim())).transpose()
}

fn parse_var<T>(name: &str, raw: &str) -> ResourceResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        let message = format!("invalid value '{}': {}", raw, e);
        ResourceError::Config(CommonError::config_field(name, message))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ManagerConfig::default();
        config.validate().expect("defaults validate");

        let options = config.request_options();
        assert_eq!(options.ttl, Duration::ZERO);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.jitter, Jitter::Proportional { ratio: 0.1 });
        assert_eq!(options.timeout, None);
        assert_eq!(options.intent, None);
    }

    /// Validates that every documented variable is applied.
    #[test]
    fn test_env_overrides_apply() {
        let mut config = ManagerConfig::default();
        let lookup = lookup_from(&[
            ("ARLM_TTL_MS", "60000"),
            ("ARLM_RETRY_MAX_ATTEMPTS", "5"),
            ("ARLM_RETRY_BASE_DELAY_MS", "50"),
            ("ARLM_RETRY_MAX_DELAY_MS", "2000"),
            ("ARLM_RETRY_JITTER_RATIO", "0"),
            ("ARLM_DEBOUNCE_MS", "300"),
            ("ARLM_DEDUP_WINDOW_MS", "1000"),
            ("ARLM_TIMEOUT_MS", "750"),
            ("ARLM_EVICTION_GRACE_MS", "10000"),
        ]);

        apply_env_overrides(&mut config, lookup).expect("overrides parse");

        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_secs(2));
        assert_eq!(config.retry.to_retry_config().jitter, Jitter::None);
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.dedup_window, Duration::from_secs(1));
        assert_eq!(config.timeout, Some(Duration::from_millis(750)));
        assert_eq!(config.eviction_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_can_be_disabled_from_env() {
        let mut config =
            ManagerConfig { timeout: Some(Duration::from_secs(1)), ..Default::default() };
        apply_env_overrides(&mut config, lookup_from(&[("ARLM_TIMEOUT_MS", "none")]))
            .expect("none parses");
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_invalid_env_value_names_variable() {
        let mut config = ManagerConfig::default();
        let lookup = lookup_from(&[("ARLM_RETRY_MAX_ATTEMPTS", "lots")]);
        let err = apply_env_overrides(&mut config, lookup).expect_err("non-numeric attempts");

        assert!(err.to_string().contains("ARLM_RETRY_MAX_ATTEMPTS"), "{err}");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_attempts = ManagerConfig {
            retry: RetrySettings { max_attempts: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(zero_attempts.validate(), Err(ResourceError::Config(_))));

        let wild_jitter = ManagerConfig {
            retry: RetrySettings { jitter_ratio: 1.5, ..Default::default() },
            ..Default::default()
        };
        assert!(wild_jitter.validate().is_err());

        let inverted = ManagerConfig {
            retry: RetrySettings {
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_timeout = ManagerConfig { timeout: Some(Duration::ZERO), ..Default::default() };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let toml = r#"
            ttl_ms = 5000

            [retry]
            max_attempts = 4
        "#;
        let config = parse_config(toml, Path::new("arlm.toml")).expect("valid toml");

        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.eviction_grace, Duration::from_secs(300));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_config("ttl_ms: 5", Path::new("arlm.yaml")).expect_err("yaml unsupported");
        assert!(err.to_string().contains("Unsupported config format: yaml"));
    }

    #[test]
    fn test_request_option_overrides() {
        let options = RequestOptions::default()
            .with_ttl(Duration::from_secs(30))
            .with_dedup_window(Duration::from_millis(500))
            .with_timeout(Duration::from_secs(2))
            .with_intent("refresh")
            .no_retry();

        assert_eq!(options.ttl, Duration::from_secs(30));
        assert_eq!(options.dedup_window, Duration::from_millis(500));
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.intent.as_deref(), Some("refresh"));
        assert_eq!(options.retry.max_attempts, 1);
    }
}
