//! Safety evaluation hook
//!
//! Every state-mutating tool call passes through a [`SafetyPolicy`] before it
//! is queued. The shipped [`SafetyEngine`] allows everything; stricter
//! policies (whitelist checks, confirmation tokens) implement the same trait.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::types::{RiskClass, SafetyMode};

/// Input to a policy decision.
#[derive(Debug, Clone)]
pub struct SafetyRequest<'a> {
    /// Tool being invoked
    pub tool: &'a str,
    /// Coarse risk class
    pub risk: RiskClass,
    /// Target application bundle id, when resolved
    pub target_bundle_id: Option<&'a str>,
    /// Client-supplied confirmation token
    pub confirmation_token: Option<&'a str>,
    /// Fingerprint of the call, see [`fingerprint`]
    pub fingerprint: &'a str,
}

/// Policy verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    /// Proceed
    Allow,
    /// Refuse with a message
    Reject(String),
}

/// Decision point consulted before every mutating tool call.
pub trait SafetyPolicy: Send + Sync {
    /// Decide whether the call may proceed.
    fn evaluate(&self, request: &SafetyRequest<'_>) -> SafetyDecision;
}

#[derive(Debug)]
struct EngineState {
    mode: SafetyMode,
    whitelist: BTreeSet<String>,
}

/// Default policy holding mode and whitelist state.
#[derive(Debug)]
pub struct SafetyEngine {
    state: Mutex<EngineState>,
}

impl SafetyEngine {
    /// Create an engine from configured mode and whitelist
    pub fn new(mode: SafetyMode, whitelist: &[String]) -> Self {
        Self {
            state: Mutex::new(EngineState {
                mode,
                whitelist: whitelist.iter().cloned().collect(),
            }),
        }
    }

    /// Current mode
    pub fn mode(&self) -> SafetyMode {
        self.state.lock().mode
    }

    /// Replace the mode
    pub fn set_mode(&self, mode: SafetyMode) {
        self.state.lock().mode = mode;
    }

    /// Sorted whitelist
    pub fn whitelist(&self) -> Vec<String> {
        self.state.lock().whitelist.iter().cloned().collect()
    }

    /// Replace the whitelist
    pub fn set_whitelist(&self, bundle_ids: &[String]) {
        self.state.lock().whitelist = bundle_ids.iter().cloned().collect();
    }

    /// Add entries
    pub fn add_whitelist(&self, bundle_ids: &[String]) {
        self.state.lock().whitelist.extend(bundle_ids.iter().cloned());
    }

    /// Remove entries
    pub fn remove_whitelist(&self, bundle_ids: &[String]) {
        let mut state = self.state.lock();
        for id in bundle_ids {
            state.whitelist.remove(id);
        }
    }
}

impl SafetyPolicy for SafetyEngine {
    fn evaluate(&self, _request: &SafetyRequest<'_>) -> SafetyDecision {
        // Interactive approval is disabled for single-user local automation.
        SafetyDecision::Allow
    }
}

/// Deterministic, order-independent hash of a call.
///
/// Hashes `tool|k1=v1&k2=v2` with keys in sorted order and returns lowercase hex.
pub fn fingerprint<'a, I>(tool: &str, arguments: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<_> = arguments.into_iter().collect();
    pairs.sort();
    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    blake3::hash(format!("{tool}|{joined}").as_bytes())
        .to_hex()
        .to_string()
}
