//! Broker wire protocol
//!
//! One JSON object per line in each direction. A client sends a single
//! [`BrokerRequest`], reads a single [`BrokerResponse`], and the connection
//! closes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PermissionErrorCode, PermissionProbeResult, PermissionProbeStatus};

/// Malformed request line or unknown method
pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";
/// A method-specific field is missing
pub const CODE_INVALID_PARAMS: &str = "INVALID_PARAMS";
/// The script ran and failed
pub const CODE_EXEC_FAILED: &str = "EXEC_FAILED";

/// Broker method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMethod {
    /// Liveness check
    Health,
    /// Terminate every tracked subprocess
    Stop,
    /// Run a script
    ApplescriptRun,
    /// Run a command inside a `tell application` block
    ApplescriptAppCommand,
    /// Classify automation permission for a target
    ProbeAutomation,
}

/// Request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerRequest {
    /// Correlation id echoed in the response
    pub id: String,
    /// Method
    pub method: BrokerMethod,
    /// Script source for `applescript_run`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Informational target for `applescript_run`
    #[serde(rename = "targetBundleID", default, skip_serializing_if = "Option::is_none")]
    pub target_bundle_id: Option<String>,
    /// Target application bundle id
    #[serde(rename = "bundleID", default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    /// Target application name
    #[serde(rename = "appName", default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Command fragment for `applescript_app_command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Activate the target before the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate: Option<bool>,
}

impl BrokerRequest {
    /// Request with a fresh id and no optional fields
    pub fn new(method: BrokerMethod) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            script: None,
            target_bundle_id: None,
            bundle_id: None,
            app_name: None,
            command: None,
            activate: None,
        }
    }

    /// `applescript_run` request
    pub fn applescript_run(script: impl Into<String>, target_bundle_id: Option<String>) -> Self {
        Self {
            script: Some(script.into()),
            target_bundle_id,
            ..Self::new(BrokerMethod::ApplescriptRun)
        }
    }

    /// `applescript_app_command` request
    pub fn app_command(
        bundle_id: Option<String>,
        app_name: Option<String>,
        command: impl Into<String>,
        activate: bool,
    ) -> Self {
        Self {
            bundle_id,
            app_name,
            command: Some(command.into()),
            activate: Some(activate),
            ..Self::new(BrokerMethod::ApplescriptAppCommand)
        }
    }

    /// `probe_automation` request
    pub fn probe(bundle_id: Option<String>, app_name: Option<String>) -> Self {
        Self {
            bundle_id,
            app_name,
            ..Self::new(BrokerMethod::ProbeAutomation)
        }
    }
}

/// Response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerResponse {
    /// Id of the request being answered
    pub id: String,
    /// Success flag
    pub ok: bool,
    /// Human-readable summary
    pub message: String,
    /// Failure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Captured standard output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Processes terminated by `stop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_actions: Option<usize>,
    /// Probe classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_status: Option<PermissionProbeStatus>,
    /// Probe failure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error_code: Option<PermissionErrorCode>,
    /// Probe remediation steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Vec<String>>,
}

impl BrokerResponse {
    /// Successful response
    pub fn success(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            message: message.into(),
            code: None,
            stdout: None,
            stderr: None,
            cancelled_actions: None,
            probe_status: None,
            probe_error_code: None,
            remediation: None,
        }
    }

    /// Failed response
    pub fn failure(id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code.to_string()),
            ..Self::success(id, message)
        }
    }

    /// Attach captured output
    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }

    /// Response carrying a probe classification. `ok` is true only for granted.
    pub fn probe(id: impl Into<String>, result: PermissionProbeResult) -> Self {
        Self {
            ok: result.status == PermissionProbeStatus::Granted,
            code: result.error_code.map(|code| code.as_str().to_string()),
            probe_status: Some(result.status),
            probe_error_code: result.error_code,
            remediation: Some(result.remediation),
            ..Self::success(id, result.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_wire_key_names() {
        let request = BrokerRequest::app_command(
            Some("com.apple.Notes".into()),
            None,
            "make new note",
            true,
        );
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "applescript_app_command");
        assert_eq!(json["bundleID"], "com.apple.Notes");
        assert_eq!(json["activate"], true);
        assert!(json.get("appName").is_none());
        assert!(json.get("script").is_none());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = serde_json::from_str::<BrokerRequest>(r#"{"id":"1","method":"reboot"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn probe_response_carries_classification() {
        let response = BrokerResponse::probe(
            "p1",
            PermissionProbeResult {
                status: PermissionProbeStatus::Denied,
                error_code: Some(PermissionErrorCode::AutomationNotAllowed),
                message: "no".into(),
                remediation: vec!["step".into()],
            },
        );
        let json: serde_json::Value = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["code"], "AUTOMATION_NOT_ALLOWED");
        assert_eq!(json["probeStatus"], "denied");
        assert_eq!(json["probeErrorCode"], "AUTOMATION_NOT_ALLOWED");
        assert_eq!(json["remediation"][0], "step");
        assert!(json.get("cancelledActions").is_none());
    }
}
