//! Persisted operator configuration
//!
//! Stored as pretty JSON at `~/.config/macos-mcp-operator/config.json`.
//! Decoding is lenient: each field accepts its snake_case or camelCase key and
//! falls back to its default when missing or malformed, so an old or
//! hand-edited file never prevents startup.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::mcp::ImageDeliveryMode;
use crate::types::{ExecutionBackend, SafetyMode};

/// Default broker host bundle id, also its launch agent label
pub const DEFAULT_BROKER_BUNDLE_ID: &str = "com.jianruicheng.macos-mcp-operator.host";

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if path == "~" {
        home()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home().join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    expand_tilde("~/.config/macos-mcp-operator/config.json")
}

fn field<T: DeserializeOwned>(object: &Map<String, Value>, snake: &str, camel: &str) -> Option<T> {
    [snake, camel]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| serde_json::from_value(value.clone()).ok())
}

/// Broker host location and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerConfig {
    /// Host app bundle id
    pub bundle_id: String,
    /// Host app bundle path, may start with `~`
    pub app_path: String,
    /// Unix socket path, may start with `~`
    pub socket_path: String,
    /// launchd label used to kickstart the host
    pub launch_agent_label: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bundle_id: DEFAULT_BROKER_BUNDLE_ID.to_string(),
            app_path: "~/Applications/macos-mcp-operator-host.app".to_string(),
            socket_path: "~/.local/share/macos-mcp-operator/broker.sock".to_string(),
            launch_agent_label: DEFAULT_BROKER_BUNDLE_ID.to_string(),
        }
    }
}

impl BrokerConfig {
    fn from_object(object: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        Self {
            bundle_id: field(object, "bundle_id", "bundleID").unwrap_or(defaults.bundle_id),
            app_path: field(object, "app_path", "appPath").unwrap_or(defaults.app_path),
            socket_path: field(object, "socket_path", "socketPath").unwrap_or(defaults.socket_path),
            launch_agent_label: field(object, "launch_agent_label", "launchAgentLabel")
                .unwrap_or(defaults.launch_agent_label),
        }
    }

    /// Socket path with `~` expanded
    pub fn socket_path(&self) -> PathBuf {
        expand_tilde(&self.socket_path)
    }

    /// App path with `~` expanded
    pub fn app_path(&self) -> PathBuf {
        expand_tilde(&self.app_path)
    }
}

impl<'de> Deserialize<'de> for BrokerConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_object().map(Self::from_object).unwrap_or_default())
    }
}

/// Operator settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    /// Safety mode reported by `set_safety_mode`
    pub default_mode: SafetyMode,
    /// Bundle ids reported by `update_app_whitelist`
    pub app_whitelist: Vec<String>,
    /// Bundle ids treated as sensitive targets
    pub sensitive_bundle_ids: Vec<String>,
    /// Chords that raise `key_chord` to high risk
    pub dangerous_key_chords: Vec<Vec<String>>,
    /// Whether the audit log is written
    pub audit_enabled: bool,
    /// Kill switch hotkey description
    pub kill_switch_hotkey: String,
    /// Interactive approval flag, currently ignored
    pub approval_enabled: bool,
    /// Privileged scripting backend
    pub execution_backend: ExecutionBackend,
    /// How screenshots reach the client
    pub image_delivery: ImageDeliveryMode,
    /// Broker host settings
    pub broker: BrokerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let chord = |keys: &[&str]| keys.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        Self {
            default_mode: SafetyMode::Restricted,
            app_whitelist: vec!["com.apple.Notes".to_string()],
            sensitive_bundle_ids: vec!["com.apple.systempreferences".to_string()],
            dangerous_key_chords: vec![
                chord(&["cmd", "q"]),
                chord(&["cmd", "w"]),
                chord(&["cmd", "delete"]),
            ],
            audit_enabled: true,
            kill_switch_hotkey: "ctrl+opt+cmd+.".to_string(),
            approval_enabled: false,
            execution_backend: ExecutionBackend::Broker,
            image_delivery: ImageDeliveryMode::InlineBase64,
            broker: BrokerConfig::default(),
        }
    }
}

impl AppConfig {
    fn from_object(object: &Map<String, Value>) -> Self {
        let d = Self::default();
        Self {
            default_mode: field(object, "default_mode", "defaultMode").unwrap_or(d.default_mode),
            app_whitelist: field(object, "app_whitelist", "appWhitelist").unwrap_or(d.app_whitelist),
            sensitive_bundle_ids: field(object, "sensitive_bundle_ids", "sensitiveBundleIDs")
                .unwrap_or(d.sensitive_bundle_ids),
            dangerous_key_chords: field(object, "dangerous_key_chords", "dangerousKeyChords")
                .unwrap_or(d.dangerous_key_chords),
            audit_enabled: field(object, "audit_enabled", "auditEnabled").unwrap_or(d.audit_enabled),
            kill_switch_hotkey: field(object, "kill_switch_hotkey", "killSwitchHotkey")
                .unwrap_or(d.kill_switch_hotkey),
            approval_enabled: field(object, "approval_enabled", "approvalEnabled")
                .unwrap_or(d.approval_enabled),
            execution_backend: field(object, "execution_backend", "executionBackend")
                .unwrap_or(d.execution_backend),
            image_delivery: field(object, "image_delivery", "imageDelivery")
                .unwrap_or(d.image_delivery),
            broker: field(object, "broker", "broker").unwrap_or(d.broker),
        }
    }
}

impl<'de> Deserialize<'de> for AppConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_object().map(Self::from_object).unwrap_or_default())
    }
}

/// Loads, caches and atomically persists [`AppConfig`].
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    cached: Mutex<Option<AppConfig>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(default_config_path())
    }
}

impl ConfigStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the cached config, reading the file on first use. A missing
    /// file is created with defaults.
    pub fn load(&self) -> Result<AppConfig> {
        if let Some(config) = self.cached.lock().clone() {
            return Ok(config);
        }

        let config = if self.path.exists() {
            let bytes = fs::read(&self.path)
                .with_context(|| format!("Failed to read config: {:?}", self.path))?;
            let config: AppConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse config: {:?}", self.path))?;
            debug!(path = %self.path.display(), "loaded config");
            config
        } else {
            let config = AppConfig::default();
            self.persist(&config)?;
            info!(path = %self.path.display(), "wrote default config");
            config
        };

        *self.cached.lock() = Some(config.clone());
        Ok(config)
    }

    /// Persist `config` and refresh the cache
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        self.persist(config)?;
        *self.cached.lock() = Some(config.clone());
        Ok(())
    }

    /// Load, mutate, persist. Returns the new config.
    pub fn update<F: FnOnce(&mut AppConfig)>(&self, mutate: F) -> Result<AppConfig> {
        let mut config = self.load()?;
        mutate(&mut config);
        self.save(&config)?;
        Ok(config)
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let data = serde_json::to_vec_pretty(config).context("Failed to encode config")?;
        write_atomic(&self.path, &data)
    }
}

/// Write via a temp file, fsync, rename, then fsync the directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}
