//! Reputation detector: reads C1 for each identity vector,
//! contributes a weighted bias toward whatever the cache already believes.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::reputation::ReputationCache;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::{DetectionContribution, IdentityVectors};
use chrono::Utc;

pub struct ReputationDetector {
    cache: ReputationCache,
}

impl ReputationDetector {
    pub fn new(cache: ReputationCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Detector for ReputationDetector {
    fn name(&self) -> &str {
        "reputation"
    }

    fn stage(&self) -> Stage {
        0
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        true
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ua = request.header("user-agent").unwrap_or("");
        let identity = IdentityVectors::compute(ua, request.remote_ip());
        let now = Utc::now();

        let entries: Vec<_> = identity
            .iter()
            .map(|(kind, hash)| (kind, self.cache.get(hash, now)))
            .collect();

        // Weight by evidence count so a well-established reputation
        // dominates a brand-new neutral one.
        let total_weight: f64 = entries.iter().map(|(_, e)| (e.evidence_count + 1.0)).sum();
        let weighted_score: f64 = entries
            .iter()
            .map(|(_, e)| e.bot_score * (e.evidence_count + 1.0))
            .sum::<f64>()
            / total_weight.max(f64::EPSILON);

        let max_evidence = entries.iter().map(|(_, e)| e.evidence_count).fold(0.0_f64, f64::max);
        // Confidence grows with how much evidence backs the strongest entry.
        let confidence = (max_evidence / (max_evidence + 5.0)).clamp(0.0, 0.9);

        let reasons = entries
            .iter()
            .filter(|(_, e)| e.evidence_count > 0.0)
            .map(|(kind, e)| format!("{kind:?} reputation score={:.2} (n={:.1}, state={:?})", e.bot_score, e.evidence_count, e.state))
            .collect();

        if max_evidence <= f64::EPSILON {
            return evidence(self.name(), weighted_score, 0.0, 0.0, vec!["no prior evidence for any identity vector".to_string()]);
        }

        evidence(self.name(), weighted_score, 1.0, confidence, reasons)
    }

    fn reads(&self) -> &[&'static str] {
        &[]
    }
}
