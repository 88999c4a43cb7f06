//! Spectral detector: FFT-derived features over
//! inter-request intervals for this signature.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::clustering::spectral;
use crate::request::RequestView;
use crate::signature::SignatureCoordinator;
use async_trait::async_trait;
use bot_protocol::{DetectionContribution, IdentityVectors};

pub struct SpectralDetector {
    signatures: SignatureCoordinator,
}

impl SpectralDetector {
    pub fn new(signatures: SignatureCoordinator) -> Self {
        Self { signatures }
    }
}

#[async_trait]
impl Detector for SpectralDetector {
    fn name(&self) -> &str {
        "spectral"
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

        let intervals = behavior.intervals_secs();
        let features = spectral::extract(&intervals);
        if !features.has_sufficient_data {
            // Insufficient data is treated as a 0.5 similarity
            // contribution downstream, i.e. no weight here.
            return evidence(self.name(), 0.5, 0.0, 0.0, vec!["fewer than 8 intervals".to_string()]);
        }

        let mut score: f64 = 0.1;
        let mut reasons = Vec::new();
        if features.harmonic_ratio > 0.6 {
            score = score.max(0.6);
            reasons.push(format!("strong harmonic structure (ratio={:.2})", features.harmonic_ratio));
        }
        if features.spectral_entropy < 0.3 {
            score = score.max(0.55);
            reasons.push(format!("low spectral entropy ({:.2}) indicates periodic timing", features.spectral_entropy));
        }
        if features.peak_to_avg_ratio > 0.5 {
            score = score.max(0.5);
            reasons.push("pronounced spectral peak".to_string());
        }
        if reasons.is_empty() {
            reasons.push("broadband, human-like timing spectrum".to_string());
        }

        evidence(self.name(), score, 1.0, 0.5, reasons)
    }

    fn reads(&self) -> &[&'static str] {
        &["behavioral.intervals"]
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
    async fn periodic_timing_scores_above_neutral() {
        let signatures = SignatureCoordinator::new(crate::config::Config::default().signature_window);
        let req = StaticRequestView::get("/a", "203.0.113.9".parse::<IpAddr>().unwrap()).with_user_agent("bot-client/1.0");
        let identity = IdentityVectors::compute(req.user_agent(), req.remote_ip());

        let t0 = Utc::now();
        for i in 0..16 {
            signatures.observe(&identity.primary, "/a", 0.2, &ObservedSignals::default(), t0 + chrono::Duration::seconds(i * 2));
        }

        let detector = SpectralDetector::new(signatures);
        let bb = Blackboard::new();
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.evidence_weight > 0.0);
    }

    #[tokio::test]
    async fn few_intervals_carries_no_weight() {
        let signatures = SignatureCoordinator::new(crate::config::Config::default().signature_window);
        let req = StaticRequestView::get("/a", "203.0.113.9".parse::<IpAddr>().unwrap());
        let identity = IdentityVectors::compute(req.user_agent(), req.remote_ip());
        let t0 = Utc::now();
        for i in 0..3 {
            signatures.observe(&identity.primary, "/a", 0.2, &ObservedSignals::default(), t0 + chrono::Duration::seconds(i));
        }

        let detector = SpectralDetector::new(signatures);
        let bb = Blackboard::new();
        let contribution = detector.run(&bb, &req).await;
        assert_eq!(contribution.evidence_weight, 0.0);
    }
}
