//! Append-only audit trail of tool calls
//!
//! One JSON object per line. Writing is best-effort: failures are logged at
//! debug level and never reach the caller.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::expand_tilde;
use crate::types::ActionStatus;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEYS: &[&str] = &["text", "imageBase64", "image", "password", "token"];

/// Default log location
pub fn default_audit_path() -> PathBuf {
    expand_tilde("~/Library/Logs/macos-mcp-operator/audit.jsonl")
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// When the call finished
    pub timestamp: DateTime<Utc>,
    /// Tool name
    pub tool: String,
    /// Target application, if any
    #[serde(rename = "targetBundleID")]
    pub target_bundle_id: Option<String>,
    /// Receipt status
    pub status: ActionStatus,
    /// Receipt message
    pub message: String,
    /// Tool-specific details
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Event stamped with the current time
    pub fn now(
        tool: impl Into<String>,
        target_bundle_id: Option<String>,
        status: ActionStatus,
        message: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.into(),
            target_bundle_id,
            status,
            message: message.into(),
            metadata,
        }
    }

    fn redacted(mut self) -> Self {
        for (key, value) in self.metadata.iter_mut() {
            if SENSITIVE_KEYS.contains(&key.as_str()) {
                *value = REDACTED.to_string();
            }
        }
        self
    }
}

/// JSONL audit writer.
#[derive(Debug)]
pub struct AuditLogger {
    enabled: bool,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Logger writing to `path`
    pub fn new(enabled: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Logger writing to the default location
    pub fn with_default_path(enabled: bool) -> Self {
        Self::new(enabled, default_audit_path())
    }

    /// Log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` with sensitive metadata redacted.
    pub fn log(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.append(event.redacted()) {
            debug!(error = %err, path = %self.path.display(), "audit write failed");
        }
    }

    fn append(&self, event: AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(metadata: &[(&str, &str)]) -> AuditEvent {
        AuditEvent::now(
            "text_input",
            Some("com.apple.Notes".into()),
            ActionStatus::Executed,
            "Text input executed",
            metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn redacts_and_appends_lines() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(true, dir.path().join("logs/audit.jsonl"));
        logger.log(event(&[("text", "super-secret"), ("mode", "paste")]));
        logger.log(event(&[("token", "t")]));

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(!contents.contains("super-secret"));
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["metadata"]["text"], REDACTED);
        assert_eq!(lines[0]["metadata"]["mode"], "paste");
        assert_eq!(lines[0]["targetBundleID"], "com.apple.Notes");
        assert_eq!(lines[0]["status"], "executed");
        assert_eq!(lines[1]["metadata"]["token"], REDACTED);
    }

    #[test]
    fn disabled_logger_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(false, dir.path().join("audit.jsonl"));
        logger.log(event(&[]));
        assert!(!logger.path().exists());
    }

    #[test]
    fn unwritable_path_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let logger = AuditLogger::new(true, blocker.join("audit.jsonl"));
        logger.log(event(&[]));
    }
}
