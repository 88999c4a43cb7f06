//! Optional ML detector: ONNX/LLM contributions. Modeled as a `Detector`
//! like any other — policies that forbid ML simply don't include its name
//! in their path selections; there is no special-cased skip logic in the
//! orchestrator.
//!
//! The actual model call is an external collaborator; this
//! type holds an optional classifier capability and degrades to a neutral,
//! zero-weight contribution when none is configured.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::DetectionContribution;
use std::sync::Arc;

/// An injected ML classifier capability — ONNX inference engine or LLM
/// client. Model inference itself is an external collaborator; only the
/// contract is specified here.
#[async_trait]
pub trait MlClassifier: Send + Sync {
    /// Returns `(bot_probability, confidence)` or `None` on failure/timeout
    /// (treated as a detector soft-failure: dropped, not propagated).
    async fn classify(&self, ua: &str, path: &str, headers_summary: &str) -> Option<(f64, f64)>;
}

pub struct MlDetector {
    classifier: Option<Arc<dyn MlClassifier>>,
}

impl MlDetector {
    pub fn new() -> Self {
        Self { classifier: None }
    }

    pub fn with_classifier(classifier: Arc<dyn MlClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }
}

impl Default for MlDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for MlDetector {
    fn name(&self) -> &str {
        "ml"
    }

    fn stage(&self) -> Stage {
        2
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        self.classifier.is_some()
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let Some(classifier) = &self.classifier else {
            return evidence(self.name(), 0.5, 0.0, 0.0, vec![]);
        };

        let ua = request.header("user-agent").unwrap_or("");
        let headers_summary = request.header_names().join(",");
        match classifier.classify(ua, request.path(), &headers_summary).await {
            Some((probability, confidence)) => evidence(
                self.name(),
                probability,
                1.0,
                confidence,
                vec!["ML classifier contribution".to_string()],
            ),
            None => evidence(self.name(), 0.5, 0.0, 0.0, vec!["ML classifier unavailable or timed out".to_string()]),
        }
    }
}
