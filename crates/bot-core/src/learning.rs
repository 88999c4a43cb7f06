//! Concrete Learning Event Bus handlers (C10): reputation feedback into C1, and fast-path/full-path drift
//! detection. These are the handlers that [`crate::events`]'s single-reader
//! dispatch loop actually drains into.

use crate::events::{EventHandler, EventKind, LearningEvent};
use crate::reputation::ReputationCache;
use bot_protocol::{IdentityVectors, PatternType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Applies `SignatureFeedback`/`UserFeedback` events to the reputation
/// cache. `MinimalDetection`/`FullDetection` feed
/// the cache directly from the orchestrator's hot path instead — this
/// handler is for *out-of-band* corrections (operator feedback, downstream
/// relabeling), which arrive only as bus events.
pub struct ReputationFeedbackHandler {
    reputation: ReputationCache,
    clock: Arc<dyn crate::capabilities::Clock>,
}

impl ReputationFeedbackHandler {
    pub fn new(reputation: ReputationCache, clock: Arc<dyn crate::capabilities::Clock>) -> Self {
        Self { reputation, clock }
    }
}

impl EventHandler for ReputationFeedbackHandler {
    fn interests(&self) -> &[EventKind] {
        &[EventKind::SignatureFeedback, EventKind::UserFeedback]
    }

    fn handle(&self, event: &LearningEvent) {
        let now = self.clock.now();
        match event {
            LearningEvent::SignatureFeedback { signature, label, weight } => {
                self.reputation.apply_evidence(signature, PatternType::Primary, signature, *label, *weight, now);
            }
            LearningEvent::UserFeedback { pattern_id, label, weight } => {
                self.reputation
                    .apply_evidence(pattern_id, PatternType::Combined, pattern_id, *label, *weight, now);
            }
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    is_fast: bool,
    is_bot: bool,
}

/// Compares fast-path-only verdicts against full-path verdicts for the same
/// UA identity over a trailing time window and emits `FastPathDriftDetected`
/// once the disagreement rate crosses a threshold on a minimum-sample floor.
pub struct DriftDetector {
    events: crate::events::EventBus,
    window: chrono::Duration,
    drift_threshold: f64,
    min_samples: usize,
    bot_cutoff: f64,
    samples: DashMap<String, VecDeque<Sample>>,
}

impl DriftDetector {
    pub fn new(events: crate::events::EventBus, window: chrono::Duration, drift_threshold: f64, min_samples: usize) -> Self {
        Self {
            events,
            window,
            drift_threshold,
            min_samples,
            bot_cutoff: 0.5,
            samples: DashMap::new(),
        }
    }

    fn record(&self, identity: &IdentityVectors, risk_score: f64, is_fast: bool, at: DateTime<Utc>) {
        let key = identity.ua.clone();
        let mut entry = self.samples.entry(key.clone()).or_default();
        entry.push_back(Sample {
            at,
            is_fast,
            is_bot: risk_score >= self.bot_cutoff,
        });
        let floor = at - self.window;
        while matches!(entry.front(), Some(s) if s.at < floor) {
            entry.pop_front();
        }

        let fast_total = entry.iter().filter(|s| s.is_fast).count();
        let full_total = entry.iter().filter(|s| !s.is_fast).count();
        if fast_total < self.min_samples || full_total < self.min_samples {
            return;
        }
        let fast_bot_rate = entry.iter().filter(|s| s.is_fast && s.is_bot).count() as f64 / fast_total as f64;
        let full_bot_rate = entry.iter().filter(|s| !s.is_fast && s.is_bot).count() as f64 / full_total as f64;
        let disagreement = (fast_bot_rate - full_bot_rate).abs();

        if disagreement > self.drift_threshold {
            self.events.publish(LearningEvent::FastPathDriftDetected {
                identity: identity.clone(),
                fast_risk: fast_bot_rate,
                full_risk: full_bot_rate,
            });
            entry.clear();
        }
    }

    /// `> 0.1` disagreement recommends dropping the UA from the fast path
    /// entirely.
    pub fn recommended_action(disagreement_rate: f64) -> &'static str {
        if disagreement_rate > 0.1 {
            "remove_from_fast_path"
        } else {
            "monitor"
        }
    }
}

impl EventHandler for DriftDetector {
    fn interests(&self) -> &[EventKind] {
        &[EventKind::MinimalDetection, EventKind::FullDetection]
    }

    fn handle(&self, event: &LearningEvent) {
        match event {
            LearningEvent::MinimalDetection { identity, risk_score, at } => self.record(identity, *risk_score, true, *at),
            LearningEvent::FullDetection { identity, risk_score, at, .. } => self.record(identity, *risk_score, false, *at),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn identity(ua: &str) -> IdentityVectors {
        IdentityVectors::compute(ua, "203.0.113.9".parse().unwrap())
    }

    #[test]
    fn reputation_feedback_handler_applies_user_feedback() {
        let reputation = ReputationCache::new(crate::config::Config::default().reputation);
        let clock: Arc<dyn crate::capabilities::Clock> = Arc::new(crate::capabilities::SystemClock);
        let handler = ReputationFeedbackHandler::new(reputation.clone(), clock.clone());
        handler.handle(&LearningEvent::UserFeedback {
            pattern_id: "ua:curl".to_string(),
            label: 0.9,
            weight: 5.0,
        });
        let entry = reputation.get("ua:curl", clock.now());
        assert!(entry.bot_score > 0.5);
    }

    #[test]
    fn drift_detector_fires_once_disagreement_crosses_threshold_with_min_samples() {
        let (bus, mut receiver) = EventBus::new(64);
        let detector = DriftDetector::new(bus, chrono::Duration::hours(1), 0.1, 20);
        let id = identity("ua_ABC");
        let t0 = Utc::now();

        for i in 0..100 {
            let at = t0 + chrono::Duration::seconds(i);
            detector.handle(&LearningEvent::MinimalDetection {
                identity: id.clone(),
                risk_score: 0.9,
                at,
            });
        }
        for i in 0..100 {
            let at = t0 + chrono::Duration::seconds(i);
            let risk = if i < 60 { 0.9 } else { 0.1 };
            detector.handle(&LearningEvent::FullDetection {
                identity: id.clone(),
                risk_score: risk,
                confidence: 0.8,
                at,
            });
        }

        let mut fired = false;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, LearningEvent::FastPathDriftDetected { .. }) {
                fired = true;
            }
        }
        assert!(fired, "expected a FastPathDriftDetected event");
    }

    #[test]
    fn drift_detector_stays_quiet_below_min_sample_floor() {
        let (bus, mut receiver) = EventBus::new(64);
        let detector = DriftDetector::new(bus, chrono::Duration::hours(1), 0.1, 20);
        let id = identity("ua_rare");
        let t0 = Utc::now();
        for i in 0..5 {
            let at = t0 + chrono::Duration::seconds(i);
            detector.handle(&LearningEvent::MinimalDetection {
                identity: id.clone(),
                risk_score: 0.9,
                at,
            });
            detector.handle(&LearningEvent::FullDetection {
                identity: id.clone(),
                risk_score: 0.1,
                confidence: 0.8,
                at,
            });
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn recommended_action_escalates_past_point_one() {
        assert_eq!(DriftDetector::recommended_action(0.4), "remove_from_fast_path");
        assert_eq!(DriftDetector::recommended_action(0.05), "monitor");
    }
}
