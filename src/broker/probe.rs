//! Automation permission probe
//!
//! Runs a side-effect-free `id` query against the target under a short
//! AppleScript timeout and classifies the failure text.

use super::script::{ScriptExecutor, target_specifier};
use crate::types::{PermissionErrorCode, PermissionProbeResult, PermissionProbeStatus};

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Classify the failure text of a probe script.
pub fn map_failure(text: &str) -> PermissionProbeResult {
    let lowered = text.to_lowercase();

    if lowered.contains("(-1743)") || lowered.contains("not authorized to send apple events") {
        return PermissionProbeResult {
            status: PermissionProbeStatus::Denied,
            error_code: Some(PermissionErrorCode::AutomationNotAllowed),
            message: "Automation permission is not granted for the target app.".into(),
            remediation: steps(&[
                "Open System Settings > Privacy & Security > Automation.",
                "Grant automation access for the broker host app.",
            ]),
        };
    }

    if lowered.contains("(-128)") || lowered.contains("user canceled") {
        return PermissionProbeResult {
            status: PermissionProbeStatus::NotDetermined,
            error_code: None,
            message: "Automation permission has not been finalized yet.".into(),
            remediation: steps(&[
                "Retry the action and approve the permission prompt if shown.",
                "Or grant access in System Settings > Privacy & Security > Automation.",
            ]),
        };
    }

    PermissionProbeResult {
        status: PermissionProbeStatus::Error,
        error_code: Some(PermissionErrorCode::ExecFailed),
        message: if text.is_empty() {
            "Automation probe failed.".into()
        } else {
            text.to_string()
        },
        remediation: steps(&[
            "Verify target app exists and can be scripted.",
            "Check broker logs and rerun probe.",
        ]),
    }
}

/// Probe script for a target
pub fn probe_script(bundle_id: Option<&str>, app_name: Option<&str>) -> String {
    format!(
        "with timeout of 5 seconds\n    tell {}\n        id\n    end tell\nend timeout",
        target_specifier(bundle_id, app_name)
    )
}

/// Probe automation permission for a target application.
pub async fn probe_automation(
    executor: &ScriptExecutor,
    bundle_id: Option<&str>,
    app_name: Option<&str>,
) -> PermissionProbeResult {
    if bundle_id.is_none() && app_name.is_none() {
        return PermissionProbeResult {
            status: PermissionProbeStatus::Error,
            error_code: Some(PermissionErrorCode::ExecFailed),
            message: "bundle_id or app_name is required".into(),
            remediation: steps(&["Provide a valid target bundle_id or app_name."]),
        };
    }

    match executor.run(&probe_script(bundle_id, app_name)).await {
        Ok(_) => PermissionProbeResult {
            status: PermissionProbeStatus::Granted,
            error_code: None,
            message: "Automation permission probe succeeded.".into(),
            remediation: Vec::new(),
        },
        Err(err) => {
            let text = if err.stderr.is_empty() {
                err.message.as_str()
            } else {
                err.stderr.as_str()
            };
            map_failure(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::registry::ProcessRegistry;

    #[test]
    fn denied_signature() {
        let result = map_failure(
            "execution error: Not authorized to send Apple events to Notes. (-1743)",
        );
        assert_eq!(result.status, PermissionProbeStatus::Denied);
        assert_eq!(result.error_code, Some(PermissionErrorCode::AutomationNotAllowed));
        assert_eq!(result.remediation.len(), 2);
    }

    #[test]
    fn cancelled_prompt_is_not_determined() {
        let result = map_failure("execution error: User canceled. (-128)");
        assert_eq!(result.status, PermissionProbeStatus::NotDetermined);
        assert_eq!(result.error_code, None);
    }

    #[test]
    fn anything_else_is_an_error() {
        let result = map_failure("Can't get application id \"x\". (-2700)");
        assert_eq!(result.status, PermissionProbeStatus::Error);
        assert_eq!(result.error_code, Some(PermissionErrorCode::ExecFailed));
        assert_eq!(result.message, "Can't get application id \"x\". (-2700)");
        assert_eq!(map_failure("").message, "Automation probe failed.");
    }

    #[test]
    fn script_shape() {
        assert_eq!(
            probe_script(Some("com.apple.Notes"), None),
            "with timeout of 5 seconds\n    tell application id \"com.apple.Notes\"\n        id\n    end tell\nend timeout"
        );
    }

    #[tokio::test]
    async fn missing_target_short_circuits() {
        let executor = ScriptExecutor::new("/bin/false", ProcessRegistry::new());
        let result = probe_automation(&executor, None, None).await;
        assert_eq!(result.status, PermissionProbeStatus::Error);
        assert_eq!(result.message, "bundle_id or app_name is required");
    }

    #[tokio::test]
    async fn interpreter_stderr_drives_classification() {
        // stand-in interpreter that always reports a denial
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-osascript");
        std::fs::write(
            &fake,
            "#!/bin/sh\ncat >/dev/null\necho 'Not authorized to send Apple events (-1743)' >&2\nexit 1\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let executor = ScriptExecutor::new(&fake, ProcessRegistry::new());
        let result = probe_automation(&executor, None, Some("Notes")).await;
        assert_eq!(result.status, PermissionProbeStatus::Denied);
    }
}
