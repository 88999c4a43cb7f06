//! The signal blackboard (C2): a mutable, per-request, single-owner surface
//! shared between detectors within one request. Never shared
//! across requests — no `Arc`, no locking.

use bot_protocol::{BlackboardValue, DetectionContribution};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct Blackboard {
    values: BTreeMap<String, BlackboardValue>,
    completed_detectors: BTreeSet<String>,
    contributions: Vec<DetectionContribution>,
    pub current_risk_score: f64,
    pub confidence: f64,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<BlackboardValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&BlackboardValue> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(BlackboardValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(BlackboardValue::as_str)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(BlackboardValue::as_float)
    }

    pub fn mark_completed(&mut self, detector_name: &str) {
        self.completed_detectors.insert(detector_name.to_string());
    }

    pub fn has_completed(&self, detector_name: &str) -> bool {
        self.completed_detectors.contains(detector_name)
    }

    pub fn completed_detectors(&self) -> &BTreeSet<String> {
        &self.completed_detectors
    }

    pub fn push_contribution(&mut self, contribution: DetectionContribution) {
        self.contributions.push(contribution);
    }

    pub fn contributions(&self) -> &[DetectionContribution] {
        &self.contributions
    }

    /// First contribution declaring an early exit, in contribution order.
    pub fn first_early_exit(&self) -> Option<&DetectionContribution> {
        self.contributions
            .iter()
            .find(|c| c.trigger_early_exit && c.early_exit_verdict.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_get_set_round_trips() {
        let mut bb = Blackboard::new();
        bb.set("ua.is_mobile", true);
        bb.set("geo.country_code", "US");
        bb.set("behavioral.rate", 12.5_f64);

        assert_eq!(bb.get_bool("ua.is_mobile"), Some(true));
        assert_eq!(bb.get_str("geo.country_code"), Some("US"));
        assert_eq!(bb.get_float("behavioral.rate"), Some(12.5));
        assert!(bb.get("missing").is_none());
    }

    #[test]
    fn first_early_exit_is_order_stable() {
        let mut bb = Blackboard::new();
        bb.push_contribution(DetectionContribution::neutral("a"));
        let mut blocking = DetectionContribution::neutral("b");
        blocking.trigger_early_exit = true;
        blocking.early_exit_verdict = Some(bot_protocol::EarlyExitVerdict::VerifiedBadBot);
        bb.push_contribution(blocking);
        bb.push_contribution(DetectionContribution::neutral("c"));

        let found = bb.first_early_exit().unwrap();
        assert_eq!(found.detector_name, "b");
    }
}
