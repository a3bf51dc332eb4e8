//! Session configuration and retry/wait policies.
//!
//! All settings live in a single [`SessionConfig`]. It can be built in code,
//! loaded from `~/.uidrive/config.json`, or loaded from an explicit path.
//! Durations are stored as milliseconds in JSON.
//!
//! # Example
//!
//! ```no_run
//! use uidrive_core::config::SessionConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = SessionConfig::load();
//! println!("server: {}", config.server_url);
//!
//! // Strict load from a file
//! let config = SessionConfig::load_from("ci/uidrive.json")?;
//! # Ok::<(), uidrive_core::config::ConfigError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the per-user state directory (`~/.uidrive/`).
///
/// Falls back to `./.uidrive` when the home directory cannot be determined.
pub fn uidrive_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".uidrive")
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`SessionConfig`].
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting has an unusable value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Capabilities sent when a session is created.
///
/// Appium-specific keys are emitted with the `appium:` vendor prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub platform_name: String,
    pub automation_name: String,
    pub device_name: String,
    /// Package of the application under test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,
    /// Launch activity of the application under test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_activity: Option<String>,
    /// Local APK path. Only sent when the file exists, otherwise the
    /// already-installed package is launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_path: Option<PathBuf>,
    pub no_reset: bool,
    pub full_reset: bool,
    /// How long the server keeps an idle session alive.
    #[serde(with = "duration_ms")]
    pub new_command_timeout: Duration,
    /// Additional raw capabilities, merged last.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            platform_name: "Android".to_string(),
            automation_name: "UiAutomator2".to_string(),
            device_name: "Android Emulator".to_string(),
            app_package: None,
            app_activity: None,
            app_path: None,
            no_reset: false,
            full_reset: false,
            new_command_timeout: Duration::from_secs(300),
            extra: Map::new(),
        }
    }
}

impl Capabilities {
    /// Builds the W3C `alwaysMatch` capability object.
    pub fn to_w3c(&self) -> Value {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform_name));
        caps.insert("appium:automationName".into(), json!(self.automation_name));
        caps.insert("appium:deviceName".into(), json!(self.device_name));
        if let Some(package) = &self.app_package {
            caps.insert("appium:appPackage".into(), json!(package));
        }
        if let Some(activity) = &self.app_activity {
            caps.insert("appium:appActivity".into(), json!(activity));
        }
        if let Some(path) = self.app_path.as_ref().filter(|p| p.exists()) {
            caps.insert("appium:app".into(), json!(path.to_string_lossy()));
        }
        caps.insert("appium:noReset".into(), json!(self.no_reset));
        caps.insert("appium:fullReset".into(), json!(self.full_reset));
        caps.insert(
            "appium:newCommandTimeout".into(),
            json!(self.new_command_timeout.as_secs()),
        );
        for (key, value) in &self.extra {
            caps.insert(key.clone(), value.clone());
        }
        Value::Object(caps)
    }
}

/// Polling policy used by [`ResilientLocator`](crate::resolver::ResilientLocator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitPolicy {
    /// Delay between lookups of the same candidate.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Budget for the primary locator when the caller gives none.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Budget for each alternate after the primary has timed out.
    #[serde(with = "duration_ms")]
    pub alternate_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            default_timeout: Duration::from_secs(10),
            alternate_timeout: Duration::from_secs(2),
        }
    }
}

/// Retry and timing policy for [`Page`](crate::page::Page) operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagePolicy {
    /// Local retries after a stale-element failure, before rebinding.
    pub action_retries: u32,
    /// Default budget for `wait_until_loaded`.
    #[serde(with = "duration_ms")]
    pub load_timeout: Duration,
    /// Per-element budget for actions.
    #[serde(with = "duration_ms")]
    pub element_timeout: Duration,
    /// Resolve budget after each scroll in `scroll_until_visible`.
    #[serde(with = "duration_ms")]
    pub scroll_probe_timeout: Duration,
    /// Duration of a scroll gesture.
    #[serde(with = "duration_ms")]
    pub scroll_duration: Duration,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            action_retries: 1,
            load_timeout: Duration::from_secs(10),
            element_timeout: Duration::from_secs(5),
            scroll_probe_timeout: Duration::from_secs(1),
            scroll_duration: Duration::from_millis(1000),
        }
    }
}

/// Everything needed to open and keep a session alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the automation server.
    pub server_url: String,
    pub capabilities: Capabilities,
    /// Attempts made by `start` before giving up.
    pub max_start_retries: u32,
    /// Fixed delay between start attempts.
    #[serde(with = "duration_ms")]
    pub start_backoff: Duration,
    /// Upper bound for a liveness probe.
    #[serde(with = "duration_ms")]
    pub liveness_timeout: Duration,
    pub wait: WaitPolicy,
    pub page: PagePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4723".to_string(),
            capabilities: Capabilities::default(),
            max_start_retries: 3,
            start_backoff: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(2),
            wait: WaitPolicy::default(),
            page: PagePolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Default config file location (`~/.uidrive/config.json`).
    pub fn default_path() -> PathBuf {
        uidrive_dir().join(CONFIG_FILENAME)
    }

    /// Load config from `~/.uidrive/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        std::fs::read_to_string(Self::default_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `~/.uidrive/config.json`.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rejects settings that would make the retry loops meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".into()));
        }
        if self.max_start_retries == 0 {
            return Err(ConfigError::Invalid("max_start_retries must be at least 1".into()));
        }
        if self.wait.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("wait.poll_interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SessionConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:4723");
        assert_eq!(config.max_start_retries, 3);
        assert_eq!(config.start_backoff, Duration::from_secs(2));
        assert_eq!(config.liveness_timeout, Duration::from_secs(2));
        assert_eq!(config.wait.poll_interval, Duration::from_millis(500));
        assert_eq!(config.page.action_retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, SessionConfig::default());
    }

    #[test]
    fn durations_are_milliseconds() {
        let json = r#"{"start_backoff": 250, "wait": {"poll_interval": 100}}"#;
        let loaded: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.start_backoff, Duration::from_millis(250));
        assert_eq!(loaded.wait.poll_interval, Duration::from_millis(100));
        assert_eq!(loaded.wait.default_timeout, Duration::from_secs(10));

        let out = serde_json::to_value(&loaded).unwrap();
        assert_eq!(out["start_backoff"], 250);
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let config = SessionConfig {
            max_start_retries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let result = SessionConfig::load_from("/nonexistent/uidrive/config.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_from_reads_file() {
        let path = std::env::temp_dir().join(format!("uidrive_config_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"server_url": "http://10.0.0.5:4723", "max_start_retries": 5}"#).unwrap();

        let config = SessionConfig::load_from(&path).unwrap();
        assert_eq!(config.server_url, "http://10.0.0.5:4723");
        assert_eq!(config.max_start_retries, 5);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn save_then_load_from() {
        let dir = std::env::temp_dir().join(format!("uidrive_save_{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");
        let config = SessionConfig {
            server_url: "http://10.0.0.9:4723".into(),
            start_backoff: Duration::from_millis(750),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["start_backoff"], 750);
        assert_eq!(SessionConfig::load_from(&path).unwrap(), config);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn default_path_is_under_uidrive_dir() {
        let path = SessionConfig::default_path();
        assert!(path.starts_with(uidrive_dir()));
        assert!(path.ends_with("config.json"));
    }

    #[test]
    fn capabilities_use_appium_prefix() {
        let caps = Capabilities {
            app_package: Some("com.example.app".into()),
            app_activity: Some("com.example.app.SplashActivity".into()),
            ..Default::default()
        };
        let w3c = caps.to_w3c();
        assert_eq!(w3c["platformName"], "Android");
        assert_eq!(w3c["appium:automationName"], "UiAutomator2");
        assert_eq!(w3c["appium:appPackage"], "com.example.app");
        assert_eq!(w3c["appium:newCommandTimeout"], 300);
        assert_eq!(w3c["appium:noReset"], false);
    }

    #[test]
    fn missing_app_path_is_not_sent() {
        let caps = Capabilities {
            app_path: Some(PathBuf::from("/nonexistent/app-debug.apk")),
            ..Default::default()
        };
        assert!(caps.to_w3c().get("appium:app").is_none());
    }

    #[test]
    fn extra_capabilities_override() {
        let mut caps = Capabilities::default();
        caps.extra.insert("appium:udid".into(), json!("emulator-5554"));
        caps.extra.insert("platformName".into(), json!("android"));
        let w3c = caps.to_w3c();
        assert_eq!(w3c["appium:udid"], "emulator-5554");
        assert_eq!(w3c["platformName"], "android");
    }
}
