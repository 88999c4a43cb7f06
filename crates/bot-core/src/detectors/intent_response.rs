//! Intent/response detector: after-response signals —
//! 404 patterns, honeypot hits, auth failures. Runs as part of a policy's
//! `response_path`, after the caller has written the relevant
//! `response.*` blackboard keys once the response is known.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::DetectionContribution;

pub struct IntentResponseDetector;

impl IntentResponseDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IntentResponseDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for IntentResponseDetector {
    fn name(&self) -> &str {
        "intent_response"
    }

    /// Runs after the response is known; still participates in the stage
    /// ordinal scheme as the latest stage a policy's
    /// `response_path` selects.
    fn stage(&self) -> Stage {
        2
    }

    fn trigger(&self, blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        blackboard.has("response.status_code") || blackboard.has("response.honeypot_hit")
    }

    async fn run(&self, blackboard: &Blackboard, _request: &dyn RequestView) -> DetectionContribution {
        let mut score: f64 = 0.0;
        let mut weight: f64 = 0.0;
        let mut reasons = Vec::new();

        if blackboard.get_bool("response.honeypot_hit") == Some(true) {
            score = score.max(0.95);
            weight = 1.0;
            reasons.push("honeypot path was hit".to_string());
        }

        if let Some(status) = blackboard.get_float("response.status_code") {
            if status as u16 == 404 {
                score = score.max(0.3);
                weight = weight.max(0.5);
                reasons.push("404 response".to_string());
            }
            if status as u16 == 401 || status as u16 == 403 {
                score = score.max(0.4);
                weight = weight.max(0.5);
                reasons.push("authentication/authorization failure".to_string());
            }
        }

        if let Some(rate) = blackboard.get_float("response.recent_404_rate") {
            if rate > 0.5 {
                score = score.max(0.6);
                weight = weight.max(0.8);
                reasons.push(format!("recent 404 rate {rate:.2} suggests path enumeration"));
            }
        }

        if weight <= 0.0 {
            return evidence(self.name(), 0.5, 0.0, 0.0, vec![]);
        }

        evidence(self.name(), score, weight, 0.6, reasons)
    }

    fn reads(&self) -> &[&'static str] {
        &["response.status_code", "response.honeypot_hit", "response.recent_404_rate"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    #[tokio::test]
    async fn honeypot_hit_scores_near_certain() {
        let detector = IntentResponseDetector::new();
        let mut bb = Blackboard::new();
        bb.set("response.honeypot_hit", true);
        let req = StaticRequestView::get("/wp-admin", "203.0.113.1".parse::<IpAddr>().unwrap());
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence > 0.9);
    }

    #[tokio::test]
    async fn no_response_signals_carries_no_weight() {
        let detector = IntentResponseDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "203.0.113.1".parse::<IpAddr>().unwrap());
        let contribution = detector.run(&bb, &req).await;
        assert_eq!(contribution.evidence_weight, 0.0);
    }
}
