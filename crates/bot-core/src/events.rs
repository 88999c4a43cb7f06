//! Learning Event Bus (C10): a bounded broadcast of what just
//! happened during detection so downstream learners (reputation updates,
//! drift detection, clustering hints) can react without the orchestrator
//! knowing who's listening. A bounded `tokio::sync::mpsc` channel feeds a
//! single-reader dispatch loop that fans each event out to every
//! registered handler.

use bot_protocol::{IdentityVectors, ReputationState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What happened, with enough payload for a handler to act without going
/// back to the blackboard.
#[derive(Debug, Clone)]
pub enum LearningEvent {
    /// A fast-path verdict was produced with no full detector run.
    MinimalDetection {
        identity: IdentityVectors,
        risk_score: f64,
        at: DateTime<Utc>,
    },
    /// A full wave completed and produced an aggregate verdict.
    FullDetection {
        identity: IdentityVectors,
        risk_score: f64,
        confidence: f64,
        at: DateTime<Utc>,
    },
    /// A policy asked for the full (non-fast-path) detector set to run.
    FullAnalysisRequest { identity: IdentityVectors, reason: String },
    /// Risk crossed the policy's AI-escalation threshold and the model
    /// agreed with a high-confidence verdict.
    HighConfidenceDetection {
        identity: IdentityVectors,
        risk_score: f64,
        confidence: f64,
    },
    /// The clustering service found a new bot cluster.
    PatternDiscovered { cluster_id: String, member_count: usize },
    /// The inconsistency detector flagged a signal contradiction.
    InconsistencyDetected { identity: IdentityVectors, description: String },
    /// A signature's observed behavior changed its classification.
    SignatureFeedback { signature: String, label: f64, weight: f64 },
    /// An operator or downstream system corrected a verdict after the fact.
    UserFeedback { pattern_id: String, label: f64, weight: f64 },
    /// The cached fast-path verdict disagreed with a later full-path verdict
    /// for the same identity.
    FastPathDriftDetected {
        identity: IdentityVectors,
        fast_risk: f64,
        full_risk: f64,
    },
    /// A request's intent was classified by the response-path detector.
    IntentClassified { identity: IdentityVectors, intent: String },
    /// A detector or action requested out-of-band inference (e.g. ML model
    /// warm-up, ONNX batch scoring).
    InferenceRequest { identity: IdentityVectors, model: String },
    /// The reputation cache reclassified a pattern's hysteresis state.
    ReputationStateChanged {
        pattern_id: String,
        from: ReputationState,
        to: ReputationState,
    },
}

impl LearningEvent {
    fn kind(&self) -> EventKind {
        match self {
            LearningEvent::MinimalDetection { .. } => EventKind::MinimalDetection,
            LearningEvent::FullDetection { .. } => EventKind::FullDetection,
            LearningEvent::FullAnalysisRequest { .. } => EventKind::FullAnalysisRequest,
            LearningEvent::HighConfidenceDetection { .. } => EventKind::HighConfidenceDetection,
            LearningEvent::PatternDiscovered { .. } => EventKind::PatternDiscovered,
            LearningEvent::InconsistencyDetected { .. } => EventKind::InconsistencyDetected,
            LearningEvent::SignatureFeedback { .. } => EventKind::SignatureFeedback,
            LearningEvent::UserFeedback { .. } => EventKind::UserFeedback,
            LearningEvent::FastPathDriftDetected { .. } => EventKind::FastPathDriftDetected,
            LearningEvent::IntentClassified { .. } => EventKind::IntentClassified,
            LearningEvent::InferenceRequest { .. } => EventKind::InferenceRequest,
            LearningEvent::ReputationStateChanged { .. } => EventKind::ReputationStateChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    MinimalDetection,
    FullDetection,
    FullAnalysisRequest,
    HighConfidenceDetection,
    PatternDiscovered,
    InconsistencyDetected,
    SignatureFeedback,
    UserFeedback,
    FastPathDriftDetected,
    IntentClassified,
    InferenceRequest,
    ReputationStateChanged,
}

/// Something that wants to react to a subset of event kinds.
pub trait EventHandler: Send + Sync {
    fn interests(&self) -> &[EventKind];
    fn handle(&self, event: &LearningEvent);
}

/// Bounded publisher handle. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<LearningEvent>,
    dropped: Arc<std::sync::atomic::AtomicU64>,
}

impl EventBus {
    /// Build a bus plus the receiver side, which [`run`] consumes. Capacity
    /// bounds total in-flight events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LearningEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Publish best-effort: a full channel means the consumer has fallen
    /// behind, so newest-wins and the event is dropped rather than blocking
    /// the request path on it.
    pub fn publish(&self, event: LearningEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Single-reader dispatch loop: pulls events off `receiver` and hands each
/// to every registered handler whose `interests()` include its kind, in
/// registration order.
pub async fn run(mut receiver: mpsc::Receiver<LearningEvent>, handlers: Vec<Arc<dyn EventHandler>>) {
    while let Some(event) = receiver.recv().await {
        let kind = event.kind();
        for handler in &handlers {
            if handler.interests().contains(&kind) {
                handler.handle(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn identity() -> IdentityVectors {
        IdentityVectors::compute("test-agent", "203.0.113.1".parse().unwrap())
    }

    struct CountingHandler {
        interests: Vec<EventKind>,
        count: Arc<AtomicUsize>,
    }

    impl EventHandler for CountingHandler {
        fn interests(&self) -> &[EventKind] {
            &self.interests
        }
        fn handle(&self, _event: &LearningEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handler_only_receives_its_interested_kinds() {
        let (bus, receiver) = EventBus::new(16);
        let minimal_count = Arc::new(AtomicUsize::new(0));
        let full_count = Arc::new(AtomicUsize::new(0));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(CountingHandler {
                interests: vec![EventKind::MinimalDetection],
                count: minimal_count.clone(),
            }),
            Arc::new(CountingHandler {
                interests: vec![EventKind::FullDetection],
                count: full_count.clone(),
            }),
        ];

        let handle = tokio::spawn(run(receiver, handlers));

        bus.publish(LearningEvent::MinimalDetection {
            identity: identity(),
            risk_score: 0.2,
            at: Utc::now(),
        });
        bus.publish(LearningEvent::FullDetection {
            identity: identity(),
            risk_score: 0.9,
            confidence: 0.8,
            at: Utc::now(),
        });

        drop(bus);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert_eq!(minimal_count.load(Ordering::SeqCst), 1);
        assert_eq!(full_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_on_full_channel_counts_as_dropped_instead_of_blocking() {
        let (bus, _receiver) = EventBus::new(1);
        bus.publish(LearningEvent::PatternDiscovered {
            cluster_id: "c1".to_string(),
            member_count: 3,
        });
        bus.publish(LearningEvent::PatternDiscovered {
            cluster_id: "c2".to_string(),
            member_count: 5,
        });
        assert_eq!(bus.dropped_count(), 1);
    }
}
