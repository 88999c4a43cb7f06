//! Policy value types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The action a policy transition or the evaluator's gating logic can
/// resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyAction {
    Continue,
    Allow,
    Block,
    Challenge,
    Throttle,
    LogOnly,
    EscalateToSlowPath,
    EscalateToAi,
}

/// A first-match AND-combined condition. Unspecified fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionCondition {
    pub when_risk_exceeds: Option<f64>,
    pub when_risk_below: Option<f64>,
    pub when_signal: Option<String>,
    pub when_signal_value: Option<crate::BlackboardValue>,
    pub when_reputation_state: Option<crate::ReputationState>,
}

/// What happens when a transition's condition matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransitionEffect {
    GoToPolicy(String),
    Action(PolicyAction),
    /// Named action policy; takes precedence over `Action` when both would
    /// otherwise apply.
    ActionPolicyName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTransition {
    pub condition: TransitionCondition,
    pub effect: TransitionEffect,
    /// Free-text description surfaced in logs when this transition fires.
    pub description: String,
}

/// An immutable named policy value. Derived
/// policies (API-key overlays) are produced by [`DetectionPolicy::with_overlay`]
/// rather than mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPolicy {
    pub name: String,
    pub fast_path: Vec<String>,
    pub slow_path: Vec<String>,
    pub ai_path: Vec<String>,
    pub response_path: Vec<String>,
    pub use_fast_path: bool,
    pub force_slow_path: bool,
    pub escalate_to_ai: bool,
    pub ai_escalation_threshold: f64,
    pub early_exit_threshold: f64,
    pub immediate_block_threshold: f64,
    pub min_confidence: f64,
    pub weight_overrides: BTreeMap<String, f64>,
    pub transitions: Vec<PolicyTransition>,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub bypass_trigger_conditions: bool,
    pub action_policy_name: Option<String>,
    pub action_policy_overridable: bool,
    pub excluded_detectors: BTreeSet<String>,
}

impl DetectionPolicy {
    /// All detector names this policy would run across every path, minus
    /// exclusions — used by the orchestrator to resolve the active set for
    /// a given wave selection.
    pub fn detectors_for(&self, path: PolicyPath) -> Vec<String> {
        let base: &[String] = match path {
            PolicyPath::Fast => &self.fast_path,
            PolicyPath::Slow => &self.slow_path,
            PolicyPath::Ai => &self.ai_path,
            PolicyPath::Response => &self.response_path,
        };
        base.iter()
            .filter(|d| !self.excluded_detectors.contains(*d))
            .cloned()
            .collect()
    }

    /// Produce a derived policy for an API key overlay.
    pub fn with_overlay(&self, key_name: &str, overlay: &ApiKeyConfig) -> DetectionPolicy {
        let mut excluded = self.excluded_detectors.clone();
        excluded.extend(overlay.disabled_detectors.iter().cloned());

        let mut weight_overrides = self.weight_overrides.clone();
        for (k, v) in &overlay.weight_overrides {
            weight_overrides.insert(k.clone(), *v);
        }

        DetectionPolicy {
            name: format!("{}+apikey:{}", self.name, key_name),
            excluded_detectors: excluded,
            weight_overrides,
            action_policy_name: overlay
                .action_policy_name
                .clone()
                .or_else(|| self.action_policy_name.clone()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPath {
    Fast,
    Slow,
    Ai,
    Response,
}

/// `(glob_pattern, policy_name, is_user_defined)` entry in the
/// path-to-policy mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapping {
    pub glob_pattern: String,
    pub policy_name: String,
    pub is_user_defined: bool,
}

impl PathMapping {
    /// Specificity = slash count, +10 if the pattern has no wildcard.
    pub fn specificity(&self) -> i32 {
        let slashes = self.glob_pattern.matches('/').count() as i32;
        let exact_bonus = if !self.glob_pattern.contains(['*', '?']) {
            10
        } else {
            0
        };
        slashes + exact_bonus
    }
}

/// Overlay applied to a base policy for a given API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key_name: String,
    /// Stored only as a constant-time-comparable opaque value by the store;
    /// this type itself carries whatever the store resolved.
    pub disabled_detectors: BTreeSet<String>,
    pub weight_overrides: BTreeMap<String, f64>,
    pub detection_policy_name: Option<String>,
    pub action_policy_name: Option<String>,
    pub enabled: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// `HH:mm-HH:mm` UTC window, including overnight ranges (e.g. `22:00-06:00`).
    pub allowed_time_window: Option<String>,
    pub path_allow_globs: Vec<String>,
    pub path_deny_globs: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_per_hour: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(p: &str, user: bool) -> PathMapping {
        PathMapping {
            glob_pattern: p.to_string(),
            policy_name: "x".to_string(),
            is_user_defined: user,
        }
    }

    #[test]
    fn exact_path_outranks_deep_wildcard() {
        let exact = mapping("/api/v1/login", false);
        let wild = mapping("/api/v1/*", false);
        assert!(exact.specificity() > wild.specificity());
    }

    #[test]
    fn overlay_unions_excluded_detectors() {
        let base = DetectionPolicy {
            name: "default".into(),
            fast_path: vec!["ua".into()],
            slow_path: vec![],
            ai_path: vec![],
            response_path: vec![],
            use_fast_path: true,
            force_slow_path: false,
            escalate_to_ai: false,
            ai_escalation_threshold: 0.7,
            early_exit_threshold: 0.2,
            immediate_block_threshold: 0.9,
            min_confidence: 0.5,
            weight_overrides: BTreeMap::new(),
            transitions: vec![],
            timeout_ms: 5000,
            enabled: true,
            bypass_trigger_conditions: false,
            action_policy_name: None,
            action_policy_overridable: true,
            excluded_detectors: BTreeSet::from(["spectral".to_string()]),
        };
        let overlay = ApiKeyConfig {
            key_name: "k1".into(),
            disabled_detectors: BTreeSet::from(["ml".to_string()]),
            weight_overrides: BTreeMap::new(),
            detection_policy_name: None,
            action_policy_name: None,
            enabled: true,
            expires_at: None,
            allowed_time_window: None,
            path_allow_globs: vec![],
            path_deny_globs: vec![],
            rate_limit_per_minute: None,
            rate_limit_per_hour: None,
        };
        let derived = base.with_overlay("k1", &overlay);
        assert_eq!(derived.name, "default+apikey:k1");
        assert!(derived.excluded_detectors.contains("spectral"));
        assert!(derived.excluded_detectors.contains("ml"));
    }
}
