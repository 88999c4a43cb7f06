//! Behavioral detector: rate, burstiness, timing CV over the
//! recent history for this signature, read from the Signature Coordinator
//! (C7).

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::request::RequestView;
use crate::signature::SignatureCoordinator;
use async_trait::async_trait;
use bot_protocol::{DetectionContribution, IdentityVectors};

pub struct BehavioralDetector {
    signatures: SignatureCoordinator,
}

impl BehavioralDetector {
    pub fn new(signatures: SignatureCoordinator) -> Self {
        Self { signatures }
    }
}

#[async_trait]
impl Detector for BehavioralDetector {
    fn name(&self) -> &str {
        "behavioral"
    }

    fn stage(&self) -> Stage {
        1
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        true
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ua = request.header("user-agent").unwrap_or("");
        let identity = IdentityVectors::compute(ua, request.remote_ip());
        let Some(behavior) = self.signatures.get_behavior(&identity.primary) else {
            return evidence(self.name(), 0.5, 0.0, 0.0, vec![]);
        };

        if behavior.request_count < 3 {
            return evidence(self.name(), 0.5, 0.0, 0.0, vec!["insufficient history".to_string()]);
        }

        let mut score: f64 = 0.1;
        let mut reasons = Vec::new();

        let rate_per_min = if behavior.average_interval_secs > f64::EPSILON {
            60.0 / behavior.average_interval_secs
        } else {
            f64::INFINITY
        };
        if rate_per_min > 60.0 {
            score = score.max(0.7);
            reasons.push(format!("request rate {rate_per_min:.0}/min exceeds human-plausible bound"));
        } else if rate_per_min > 20.0 {
            score = score.max(0.4);
            reasons.push(format!("elevated request rate {rate_per_min:.0}/min"));
        }

        // Very low coefficient of variation means machine-regular timing
        // (humans are bursty); this is the behavior's `timing_coefficient`.
        if behavior.timing_coefficient < 0.1 && behavior.request_count >= 5 {
            score = score.max(0.65);
            reasons.push(format!("regular inter-request timing (CV={:.3})", behavior.timing_coefficient));
        }

        if reasons.is_empty() {
            reasons.push("no burstiness/rate anomaly detected".to_string());
        }

        evidence(self.name(), score, 1.0, 0.6, reasons)
    }

    fn reads(&self) -> &[&'static str] {
        &["behavioral.rate", "behavioral.timing_cv"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use crate::signature::ObservedSignals;
    use chrono::Utc;
    use std::net::IpAddr;

    #[tokio::test]
    async fn regular_rapid_timing_scores_high() {
        let signatures = SignatureCoordinator::new(crate::config::Config::default().signature_window);
        let req = StaticRequestView::get("/a", "203.0.113.9".parse::<IpAddr>().unwrap()).with_user_agent("custom-client/1.0");
        let ua = req.user_agent().to_string();
        let identity = IdentityVectors::compute(&ua, req.remote_ip());

        let t0 = Utc::now();
        for i in 0..10 {
            signatures.observe(&identity.primary, "/a", 0.2, &ObservedSignals::default(), t0 + chrono::Duration::milliseconds(i * 500));
        }

        let detector = BehavioralDetector::new(signatures);
        let bb = Blackboard::new();
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence > 0.5, "{:?}", contribution);
    }

    #[tokio::test]
    async fn no_history_is_neutral() {
        let signatures = SignatureCoordinator::new(crate::config::Config::default().signature_window);
        let detector = BehavioralDetector::new(signatures);
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/a", "203.0.113.9".parse::<IpAddr>().unwrap());
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.is_neutral());
    }
}
