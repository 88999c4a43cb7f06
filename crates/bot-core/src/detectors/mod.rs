//! Detector Set (C3): the pluggable contract and the built-in detectors,
//! one file per concern. Detectors are tagged behind a common `Detector`
//! trait rather than compiled into the policy layer — policies bind named
//! detector strings, not boxed objects. `async-trait` supplies the trait
//! objects with async methods.

mod behavioral;
mod inconsistency;
mod intent_response;
mod ip_asn;
mod ml;
mod reputation_detector;
mod spectral_detector;
mod ua_header;
mod verified_bot;

pub use behavioral::BehavioralDetector;
pub use inconsistency::InconsistencyDetector;
pub use intent_response::IntentResponseDetector;
pub use ip_asn::IpAsnDetector;
pub use ml::MlDetector;
pub use reputation_detector::ReputationDetector;
pub use spectral_detector::SpectralDetector;
pub use ua_header::UaHeaderDetector;
pub use verified_bot::VerifiedBotDetector;

use crate::blackboard::Blackboard;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::DetectionContribution;
use std::sync::Arc;

/// A detector's declared stage: detectors in the same stage run
/// concurrently within a wave; detectors in stage N only see signals
/// written by stages `< N`.
pub type Stage = u32;

/// Detector contract: name, stage, trigger predicate, and
/// `run`. Declared signal reads/writes are documentation, not enforced at
/// runtime — `reads()`/`writes()` exist so a registry or admin surface can
/// introspect them, never to gate execution.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn stage(&self) -> Stage;

    /// Whether this detector should run given what's on the blackboard so
    /// far. The orchestrator treats this as satisfied unconditionally when
    /// the active policy sets `bypass_trigger_conditions`.
    fn trigger(&self, blackboard: &Blackboard, request: &dyn RequestView) -> bool;

    async fn run(&self, blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution;

    fn reads(&self) -> &[&'static str] {
        &[]
    }

    fn writes(&self) -> &[&'static str] {
        &[]
    }
}

/// Registry of boxed detector implementations, keyed by name.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: std::collections::BTreeMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.name().to_string(), detector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.detectors.keys().cloned().collect()
    }

    /// Registry pre-populated with every built-in detector category:
    /// UA/header, IP/ASN, verified-bot, behavioral, spectral, inconsistency,
    /// reputation, intent/response, and the optional ML detector.
    pub fn with_builtins(reputation: crate::reputation::ReputationCache, signatures: crate::signature::SignatureCoordinator) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UaHeaderDetector::new()));
        registry.register(Arc::new(IpAsnDetector::new()));
        registry.register(Arc::new(VerifiedBotDetector::new()));
        registry.register(Arc::new(BehavioralDetector::new(signatures.clone())));
        registry.register(Arc::new(SpectralDetector::new(signatures)));
        registry.register(Arc::new(InconsistencyDetector::new()));
        registry.register(Arc::new(ReputationDetector::new(reputation)));
        registry.register(Arc::new(IntentResponseDetector::new()));
        registry.register(Arc::new(MlDetector::new()));
        registry
    }
}

/// Shared helper: a contribution carrying positive evidence.
pub(crate) fn evidence(
    name: &str,
    bot_evidence: f64,
    weight: f64,
    confidence: f64,
    reasons: Vec<String>,
) -> DetectionContribution {
    DetectionContribution {
        detector_name: name.to_string(),
        bot_evidence: bot_evidence.clamp(0.0, 1.0),
        evidence_weight: weight.max(0.0),
        confidence: confidence.clamp(0.0, 1.0),
        reasons,
        trigger_early_exit: false,
        early_exit_verdict: None,
    }
}
