//! Built-in named policies. These seed
//! [`super::PolicyRegistry::new`]; callers can overwrite or extend them.

use bot_protocol::DetectionPolicy;
use std::collections::{BTreeMap, BTreeSet};

const ALL_DETECTORS: &[&str] = &[
    "ua_header_shape",
    "ip_asn",
    "verified_bot",
    "behavioral",
    "spectral",
    "inconsistency",
    "reputation",
    "intent_response",
];

const FAST_DETECTORS: &[&str] = &["ua_header_shape", "ip_asn", "verified_bot", "reputation"];
const SLOW_DETECTORS: &[&str] = &["behavioral", "spectral", "inconsistency"];
const RESPONSE_DETECTORS: &[&str] = &["intent_response"];

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Base template every built-in starts from; fields are overridden with
/// struct-update syntax by each named constructor below.
fn base(name: &str) -> DetectionPolicy {
    DetectionPolicy {
        name: name.to_string(),
        fast_path: names(FAST_DETECTORS),
        slow_path: names(SLOW_DETECTORS),
        ai_path: vec!["ml".to_string()],
        response_path: names(RESPONSE_DETECTORS),
        use_fast_path: true,
        force_slow_path: false,
        escalate_to_ai: false,
        ai_escalation_threshold: 0.7,
        early_exit_threshold: 0.15,
        immediate_block_threshold: 0.9,
        min_confidence: 0.4,
        weight_overrides: BTreeMap::new(),
        transitions: Vec::new(),
        timeout_ms: 5_000,
        enabled: true,
        bypass_trigger_conditions: false,
        action_policy_name: Some("block".to_string()),
        action_policy_overridable: true,
        excluded_detectors: BTreeSet::new(),
    }
}

pub fn default_policy() -> DetectionPolicy {
    base("default")
}

fn demo_policy() -> DetectionPolicy {
    DetectionPolicy {
        immediate_block_threshold: 0.95,
        action_policy_name: Some("logonly".to_string()),
        ..base("demo")
    }
}

fn strict_policy() -> DetectionPolicy {
    DetectionPolicy {
        early_exit_threshold: 0.05,
        immediate_block_threshold: 0.7,
        min_confidence: 0.2,
        escalate_to_ai: true,
        ai_escalation_threshold: 0.5,
        action_policy_name: Some("block-hard".to_string()),
        ..base("strict")
    }
}

fn relaxed_policy() -> DetectionPolicy {
    DetectionPolicy {
        early_exit_threshold: 0.4,
        immediate_block_threshold: 0.97,
        min_confidence: 0.6,
        action_policy_name: Some("throttle".to_string()),
        ..base("relaxed")
    }
}

fn static_policy() -> DetectionPolicy {
    DetectionPolicy {
        fast_path: names(&["ip_asn"]),
        slow_path: Vec::new(),
        ai_path: Vec::new(),
        response_path: Vec::new(),
        early_exit_threshold: 0.5,
        immediate_block_threshold: 0.98,
        action_policy_name: Some("logonly".to_string()),
        ..base("static")
    }
}

fn allow_verified_bots_policy() -> DetectionPolicy {
    DetectionPolicy {
        fast_path: names(&["verified_bot", "ip_asn"]),
        slow_path: Vec::new(),
        action_policy_name: Some("logonly".to_string()),
        ..base("allowVerifiedBots")
    }
}

fn learning_policy() -> DetectionPolicy {
    DetectionPolicy {
        action_policy_name: Some("shadow".to_string()),
        immediate_block_threshold: 1.01,
        ..base("learning")
    }
}

fn yarp_learning_policy() -> DetectionPolicy {
    DetectionPolicy {
        fast_path: names(FAST_DETECTORS),
        slow_path: names(SLOW_DETECTORS),
        action_policy_name: Some("shadow".to_string()),
        immediate_block_threshold: 1.01,
        ..base("yarp-learning")
    }
}

fn monitor_policy() -> DetectionPolicy {
    DetectionPolicy {
        action_policy_name: Some("logonly".to_string()),
        immediate_block_threshold: 1.01,
        escalate_to_ai: false,
        ..base("monitor")
    }
}

fn api_policy() -> DetectionPolicy {
    DetectionPolicy {
        timeout_ms: 1_500,
        early_exit_threshold: 0.1,
        immediate_block_threshold: 0.85,
        action_policy_name: Some("block".to_string()),
        ..base("api")
    }
}

fn fast_onnx_policy() -> DetectionPolicy {
    DetectionPolicy {
        ai_path: vec!["ml".to_string()],
        escalate_to_ai: true,
        ai_escalation_threshold: 0.4,
        action_policy_name: Some("challenge".to_string()),
        ..base("fast-onnx")
    }
}

fn fast_ai_policy() -> DetectionPolicy {
    DetectionPolicy {
        ai_path: vec!["ml".to_string()],
        escalate_to_ai: true,
        ai_escalation_threshold: 0.3,
        timeout_ms: 2_500,
        action_policy_name: Some("challenge-captcha".to_string()),
        ..base("fast-ai")
    }
}

pub fn built_in_policies() -> Vec<DetectionPolicy> {
    vec![
        default_policy(),
        demo_policy(),
        strict_policy(),
        relaxed_policy(),
        static_policy(),
        allow_verified_bots_policy(),
        learning_policy(),
        yarp_learning_policy(),
        monitor_policy(),
        api_policy(),
        fast_onnx_policy(),
        fast_ai_policy(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_honors_threshold_ordering_invariant() {
        for policy in built_in_policies() {
            assert!(
                policy.early_exit_threshold < policy.immediate_block_threshold,
                "{} violates early_exit < immediate_block",
                policy.name
            );
        }
    }

    #[test]
    fn twelve_named_policies_are_registered() {
        assert_eq!(built_in_policies().len(), 12);
    }
}
