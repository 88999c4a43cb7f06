//! Orchestrator (C4): wave execution over a policy's staged
//! detector set, aggregation into a risk score and confidence, early-exit
//! and threshold gating via the policy evaluator, and dispatch to the
//! resolved action.
//!
//! Each wave is a fan-out-and-collect over `FuturesUnordered` with a
//! per-item `tokio::time::timeout`. `moka::future::Cache` backs the
//! short-TTL verdict cache.

use crate::actions::{ActionContext, ActionRegistry};
use crate::blackboard::Blackboard;
use crate::capabilities::{CancellationToken, Clock};
use crate::config::Config;
use crate::detectors::DetectorRegistry;
use crate::events::{EventBus, LearningEvent};
use crate::observability::Counters;
use crate::policy::{self, EvaluationOutcome, PolicyRegistry};
use crate::reputation::ReputationCache;
use crate::request::{RequestView, ResponseDirective};
use crate::signature::{ObservedSignals, SignatureCoordinator};
use bot_protocol::{
    DetectionContribution, DetectionPolicy, IdentityVectors, PatternType, PolicyAction, PolicyPath, ReputationState, RiskBand,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The outcome of running the pipeline for one request. Never surfaced as an error — a pipeline failure degrades to
/// a neutral allow.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub risk_score: f64,
    pub risk_band: RiskBand,
    pub confidence: f64,
    pub policy_name: String,
    pub reasons: Vec<String>,
    pub directive: ResponseDirective,
    pub action_name: Option<String>,
    pub from_cache: bool,
}

impl Verdict {
    fn neutral_allow(policy_name: impl Into<String>) -> Self {
        Self {
            risk_score: 0.5,
            risk_band: RiskBand::Low,
            confidence: 0.0,
            policy_name: policy_name.into(),
            reasons: Vec::new(),
            directive: ResponseDirective::allow(),
            action_name: None,
            from_cache: false,
        }
    }

    fn with_reason(mut self, reason: &str) -> Self {
        self.reasons.push(reason.to_string());
        self
    }
}

/// Bundles every registry and store the pipeline wires together.
pub struct Orchestrator {
    detectors: DetectorRegistry,
    actions: ActionRegistry,
    policies: PolicyRegistry,
    reputation: ReputationCache,
    signatures: SignatureCoordinator,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    events: Option<EventBus>,
    config: Config,
    verdict_cache: moka::future::Cache<String, Verdict>,
}

impl Orchestrator {
    pub fn new(
        detectors: DetectorRegistry,
        actions: ActionRegistry,
        policies: PolicyRegistry,
        reputation: ReputationCache,
        signatures: SignatureCoordinator,
        clock: Arc<dyn Clock>,
        counters: Arc<Counters>,
        events: Option<EventBus>,
        config: Config,
    ) -> Self {
        let verdict_cache = moka::future::Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(5))
            .build();
        Self {
            detectors,
            actions,
            policies,
            reputation,
            signatures,
            clock,
            counters,
            events,
            config,
            verdict_cache,
        }
    }

    /// Drop any cached verdict for `identity_primary`, e.g. after feedback
    /// updates the reputation cache for that pattern.
    pub async fn invalidate_cache_for(&self, identity_primary: &str) {
        let prefix = format!("{identity_primary}:");
        for key in self.verdict_cache.iter().map(|(k, _)| (*k).clone()).collect::<Vec<_>>() {
            if key.starts_with(&prefix) {
                self.verdict_cache.invalidate(&key).await;
            }
        }
    }

    /// Run the full request-path pipeline. Never returns an
    /// error: any internal failure degrades to a neutral allow rather than
    /// surfacing to the caller.
    pub async fn evaluate(&self, request: &dyn RequestView, cancellation: &CancellationToken) -> Verdict {
        self.counters.total_requests.inc();
        let now = self.clock.now();
        let identity = IdentityVectors::compute(request.header("user-agent").unwrap_or(""), request.remote_ip());

        let base_policy = self.policies.resolve_for_path(request.path());

        if let Some(presented) = request.header("x-api-key") {
            let (verdict, _) = self.policies.resolve_api_key(presented, request.path(), now);
            match verdict {
                policy::ApiKeyVerdict::Denied(reason) => {
                    // Invalid API-key scoping fails closed rather
                    // than silently falling back to the path-resolved policy.
                    let blackboard = Blackboard::new();
                    return self.dispatch_named_action(&base_policy, &blackboard, "block", request, cancellation).await.with_reason(reason);
                }
                policy::ApiKeyVerdict::RateLimited => {
                    let blackboard = Blackboard::new();
                    return self
                        .dispatch_named_action(&base_policy, &blackboard, "throttle", request, cancellation)
                        .await
                        .with_reason("api key rate limit exceeded");
                }
                policy::ApiKeyVerdict::Valid | policy::ApiKeyVerdict::Absent => {}
            }
        }

        let api_key = request.header("x-api-key");
        let policy = self.policies.apply_api_key_overlay(base_policy, api_key, now);

        let cache_key = format!("{}:{}:{}", identity.primary, request.path(), policy.name);
        if let Some(cached) = self.verdict_cache.get(&cache_key).await {
            let mut hit = cached;
            hit.from_cache = true;
            return hit;
        }

        let reputation_state = Some(self.reputation.get(&identity.primary, now).state);

        let mut blackboard = Blackboard::new();
        let verdict = self
            .run_pipeline(&policy, request, &identity, reputation_state, cancellation, now, &mut blackboard)
            .await;

        // Record this request against the signature coordinator after the
        // response, keyed by `identity.primary` — the same key the behavioral/spectral
        // detectors read via `get_behavior` — so this request's own history
        // is visible to the next request from the same client.
        let observed = observed_signals_from(&blackboard);
        self.signatures
            .observe(&identity.primary, request.path(), verdict.risk_score, &observed, now);
        self.signatures.record_ip(&identity.ip, &identity.primary);

        self.verdict_cache.insert(cache_key, verdict.clone()).await;
        self.feed_learning(&identity, &policy, &verdict, now).await;
        verdict
    }

    async fn run_pipeline(
        &self,
        initial_policy: &DetectionPolicy,
        request: &dyn RequestView,
        identity: &IdentityVectors,
        reputation_state: Option<ReputationState>,
        cancellation: &CancellationToken,
        now: chrono::DateTime<chrono::Utc>,
        blackboard: &mut Blackboard,
    ) -> Verdict {
        let mut policy = initial_policy.clone();
        let mut visited_policies = std::collections::BTreeSet::new();
        visited_policies.insert(policy.name.clone());

        let mut ran_slow_path = policy.force_slow_path;
        let mut ai_already_ran = false;

        let mut remaining: Vec<String> = policy.detectors_for(PolicyPath::Fast);
        if policy.force_slow_path {
            remaining.extend(policy.detectors_for(PolicyPath::Slow));
        }

        // A bounded number of policy transitions guards against
        // transition cycles slipping past the per-evaluation visited set.
        for _ in 0..16 {
            self.run_waves(&remaining, &policy, blackboard, request, cancellation, identity).await;
            remaining.clear();

            let outcome = policy::evaluate(&policy, blackboard, reputation_state, ai_already_ran);
            match outcome {
                EvaluationOutcome::Continue => {
                    if !ran_slow_path {
                        ran_slow_path = true;
                        remaining = policy.detectors_for(PolicyPath::Slow);
                        if !remaining.is_empty() {
                            continue;
                        }
                    }
                    return self.finalize(&policy, blackboard, ResponseDirective::allow(), None);
                }
                EvaluationOutcome::Action(PolicyAction::EscalateToAi) => {
                    // Run the AI-path detectors, then re-evaluate, rather
                    // than terminating the pipeline.
                    ai_already_ran = true;
                    remaining = policy.detectors_for(PolicyPath::Ai);
                    if remaining.is_empty() {
                        return self.finalize(&policy, blackboard, ResponseDirective::allow(), None);
                    }
                    continue;
                }
                EvaluationOutcome::Action(PolicyAction::EscalateToSlowPath) => {
                    ran_slow_path = true;
                    remaining = policy.detectors_for(PolicyPath::Slow);
                    if remaining.is_empty() {
                        return self.finalize(&policy, blackboard, ResponseDirective::allow(), None);
                    }
                    continue;
                }
                EvaluationOutcome::Action(action) => {
                    return self.dispatch_action(&policy, blackboard, action, request, cancellation).await;
                }
                EvaluationOutcome::InvokeActionPolicy(name) => {
                    return self.dispatch_named_action(&policy, blackboard, &name, request, cancellation).await;
                }
                EvaluationOutcome::Transition { target_policy, .. } => {
                    if visited_policies.contains(&target_policy) {
                        return self.finalize(&policy, blackboard, ResponseDirective::allow(), None);
                    }
                    let Some(next) = self.policies.get(&target_policy) else {
                        return self.finalize(&policy, blackboard, ResponseDirective::allow(), None);
                    };
                    visited_policies.insert(target_policy);
                    remaining = next.detectors_for(PolicyPath::Fast);
                    ran_slow_path = next.force_slow_path;
                    if ran_slow_path {
                        remaining.extend(next.detectors_for(PolicyPath::Slow));
                    }
                    policy = next;
                }
            }
        }

        self.finalize(&policy, blackboard, ResponseDirective::allow(), None)
    }

    async fn dispatch_action(
        &self,
        policy: &DetectionPolicy,
        blackboard: &Blackboard,
        action: PolicyAction,
        request: &dyn RequestView,
        cancellation: &CancellationToken,
    ) -> Verdict {
        let action_name = match action {
            PolicyAction::Allow | PolicyAction::Continue => {
                self.counters.bots_detected_threshold.inc();
                return self.finalize(policy, blackboard, ResponseDirective::allow(), None);
            }
            PolicyAction::Block => "block",
            PolicyAction::Challenge => "challenge",
            PolicyAction::Throttle => "throttle",
            PolicyAction::LogOnly => "logonly",
            PolicyAction::EscalateToSlowPath | PolicyAction::EscalateToAi => "logonly",
        };
        self.counters.bots_detected_threshold.inc();
        self.dispatch_named_action(policy, blackboard, action_name, request, cancellation).await
    }

    async fn dispatch_named_action(
        &self,
        policy: &DetectionPolicy,
        blackboard: &Blackboard,
        action_name: &str,
        request: &dyn RequestView,
        cancellation: &CancellationToken,
    ) -> Verdict {
        let resolved_name = policy.action_policy_name.as_deref().unwrap_or(action_name);
        let context = ActionContext {
            risk: blackboard.current_risk_score,
            risk_band: RiskBand::from_risk(blackboard.current_risk_score),
            confidence: blackboard.confidence,
            policy_name: policy.name.clone(),
            reasons: reasons_from(blackboard),
        };

        let directive = match self.actions.get(resolved_name) {
            Some(action) => action.execute(request, &context, cancellation).await,
            None => match self.actions.get(action_name) {
                Some(action) => action.execute(request, &context, cancellation).await,
                None => ResponseDirective::allow(),
            },
        };

        self.finalize(policy, blackboard, directive, Some(resolved_name.to_string()))
    }

    fn finalize(&self, policy: &DetectionPolicy, blackboard: &Blackboard, directive: ResponseDirective, action_name: Option<String>) -> Verdict {
        if let Some(early) = blackboard.first_early_exit() {
            let verdict = early.early_exit_verdict.expect("first_early_exit guarantees Some");
            self.counters.bots_detected_early_exit.inc();
            let directive = if verdict.is_allow() { ResponseDirective::allow() } else { directive };
            return Verdict {
                risk_score: blackboard.current_risk_score,
                risk_band: RiskBand::from_risk(blackboard.current_risk_score),
                confidence: blackboard.confidence,
                policy_name: policy.name.clone(),
                reasons: reasons_from(blackboard),
                directive,
                action_name,
                from_cache: false,
            };
        }
        Verdict {
            risk_score: blackboard.current_risk_score,
            risk_band: RiskBand::from_risk(blackboard.current_risk_score),
            confidence: blackboard.confidence,
            policy_name: policy.name.clone(),
            reasons: reasons_from(blackboard),
            directive,
            action_name,
            from_cache: false,
        }
    }

    /// Run every stage of `detector_names` in ascending stage order,
    /// aggregating onto `blackboard` after each stage.
    async fn run_waves(
        &self,
        detector_names: &[String],
        policy: &DetectionPolicy,
        blackboard: &mut Blackboard,
        request: &dyn RequestView,
        cancellation: &CancellationToken,
        identity: &IdentityVectors,
    ) {
        let mut by_stage: BTreeMap<u32, Vec<Arc<dyn crate::detectors::Detector>>> = BTreeMap::new();
        for name in detector_names {
            if blackboard.has_completed(name) {
                continue;
            }
            if let Some(detector) = self.detectors.get(name) {
                by_stage.entry(detector.stage()).or_default().push(detector);
            }
        }

        let stage_timeout = Duration::from_millis(policy.timeout_ms.max(1));

        for (_, stage_detectors) in by_stage {
            let results: Vec<(String, Result<DetectionContribution, tokio::time::error::Elapsed>)> = {
                let mut futures = FuturesUnordered::new();
                for detector in &stage_detectors {
                    if !policy.bypass_trigger_conditions && !detector.trigger(blackboard, request) {
                        continue;
                    }
                    let detector = detector.clone();
                    let name = detector.name().to_string();
                    let bb_ref: &Blackboard = &*blackboard;
                    futures.push(async move {
                        let outcome = tokio::time::timeout(stage_timeout, detector.run(bb_ref, request)).await;
                        (name, outcome)
                    });
                }
                let mut collected = Vec::new();
                while let Some(item) = futures.next().await {
                    collected.push(item);
                    if cancellation.is_cancelled() {
                        break;
                    }
                }
                collected
            };

            for (name, result) in results {
                let contribution = match result {
                    Ok(c) => c,
                    Err(_) => {
                        self.counters.record_detector_error(&name);
                        tracing::warn!(detector = %name, trace_id = %request.trace_id(), "detector timed out");
                        DetectionContribution::neutral(&name)
                    }
                };
                blackboard.mark_completed(&name);
                blackboard.push_contribution(contribution);
            }

            recompute_aggregate(blackboard, policy, &self.config);
        }
    }

    async fn feed_learning(&self, identity: &IdentityVectors, policy: &DetectionPolicy, verdict: &Verdict, now: chrono::DateTime<chrono::Utc>) {
        let label = verdict.risk_score;
        let weight = (verdict.confidence * 10.0).max(0.5);
        for (kind, hash) in identity.iter() {
            let pattern_type = match kind {
                bot_protocol::IdentityKind::Primary => PatternType::Primary,
                bot_protocol::IdentityKind::Ua => PatternType::Ua,
                bot_protocol::IdentityKind::Ip => PatternType::Ip,
                bot_protocol::IdentityKind::Subnet => PatternType::Subnet,
                bot_protocol::IdentityKind::Combined => PatternType::Combined,
            };
            self.reputation.apply_evidence(hash, pattern_type, hash, label, weight, now);
        }

        let Some(events) = &self.events else { return };
        if verdict.confidence >= self.config.agreement_boost_threshold && verdict.risk_score >= policy.ai_escalation_threshold {
            events.publish(LearningEvent::HighConfidenceDetection {
                identity: identity.clone(),
                risk_score: verdict.risk_score,
                confidence: verdict.confidence,
            });
        }
        if policy.use_fast_path && !policy.force_slow_path {
            events.publish(LearningEvent::MinimalDetection {
                identity: identity.clone(),
                risk_score: verdict.risk_score,
                at: now,
            });
        } else {
            events.publish(LearningEvent::FullDetection {
                identity: identity.clone(),
                risk_score: verdict.risk_score,
                confidence: verdict.confidence,
                at: now,
            });
        }
    }
}

fn reasons_from(blackboard: &Blackboard) -> Vec<String> {
    blackboard
        .contributions()
        .iter()
        .flat_map(|c| c.reasons.iter().cloned())
        .collect()
}

/// Lifts whatever geo/network signals the wave of detectors happened to
/// populate on the blackboard into the shape C7 stores alongside a
/// signature's risk history. Detectors that
/// never set a given key leave the corresponding field at its default.
fn observed_signals_from(blackboard: &Blackboard) -> ObservedSignals {
    ObservedSignals {
        country_code: blackboard.get_str("geo.country_code").map(str::to_string),
        asn: blackboard.get_str("ip.asn").map(str::to_string),
        is_datacenter: blackboard.get_bool("ip.is_datacenter").unwrap_or(false),
        latitude: blackboard.get_float("geo.latitude"),
        longitude: blackboard.get_float("geo.longitude"),
        is_vpn: blackboard.get_bool("ip.is_vpn").unwrap_or(false),
    }
}

/// Weighted-mean risk, exponential confidence, and an agreement boost: when
/// two or more detectors independently report `bot_evidence >=
/// agreement_boost_threshold`, add `(k-1) * agreement_boost_step` to the
/// final risk.
fn recompute_aggregate(blackboard: &mut Blackboard, policy: &DetectionPolicy, config: &Config) {
    let contributions = blackboard.contributions();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut agreeing = 0usize;

    for contribution in contributions {
        let multiplier = policy::effective_weight(&contribution.detector_name, policy, &config.detector_weights);
        let weight = contribution.evidence_weight * multiplier;
        if weight <= 0.0 {
            continue;
        }
        weighted_sum += contribution.bot_evidence * weight;
        total_weight += weight;
        if contribution.bot_evidence >= config.agreement_boost_threshold {
            agreeing += 1;
        }
    }

    let mut risk = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.5 };
    if agreeing > 1 {
        risk += config.agreement_boost_step * (agreeing as f64 - 1.0);
    }
    let confidence = 1.0 - (-total_weight / config.confidence_scale.max(f64::EPSILON)).exp();

    blackboard.current_risk_score = risk.clamp(0.0, 1.0);
    blackboard.confidence = confidence.clamp(0.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::policy::builtins::default_policy;
    use crate::request::StaticRequestView;
    use crate::signature::SignatureCoordinator;
    use std::net::IpAddr;

    fn orchestrator() -> Orchestrator {
        let config = Config::default();
        let reputation = ReputationCache::new(config.reputation.clone());
        let signatures = SignatureCoordinator::new(config.signature_window.clone());
        let detectors = DetectorRegistry::with_builtins(reputation.clone(), signatures.clone());
        let actions = ActionRegistry::with_builtins();
        let policies = PolicyRegistry::new(&config);
        Orchestrator::new(
            detectors,
            actions,
            policies,
            reputation,
            signatures,
            Arc::new(crate::capabilities::SystemClock),
            Arc::new(Counters::default()),
            None,
            config,
        )
    }

    #[tokio::test]
    async fn ordinary_browser_request_is_allowed() {
        let orchestrator = orchestrator();
        let request = StaticRequestView::get("/", "203.0.113.10".parse::<IpAddr>().unwrap())
            .with_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .with_header("accept", "text/html")
            .with_header("accept-language", "en-US");
        let verdict = orchestrator.evaluate(&request, &CancellationToken::new()).await;
        assert!(verdict.directive.continue_pipeline, "reasons={:?}", verdict.reasons);
    }

    #[tokio::test]
    async fn empty_user_agent_is_suspicious_enough_to_not_immediately_crash() {
        let orchestrator = orchestrator();
        let request = StaticRequestView::get("/", "203.0.113.11".parse::<IpAddr>().unwrap());
        let verdict = orchestrator.evaluate(&request, &CancellationToken::new()).await;
        assert!((0.0..=1.0).contains(&verdict.risk_score));
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let orchestrator = orchestrator();
        let request = StaticRequestView::get("/", "203.0.113.12".parse::<IpAddr>().unwrap()).with_user_agent("curl/8.0");
        let first = orchestrator.evaluate(&request, &CancellationToken::new()).await;
        assert!(!first.from_cache);
        let second = orchestrator.evaluate(&request, &CancellationToken::new()).await;
        assert!(second.from_cache);
        assert_eq!(first.risk_score, second.risk_score);
    }

    #[tokio::test]
    async fn static_asset_path_resolves_static_policy() {
        let orchestrator = orchestrator();
        let request = StaticRequestView::get("/assets/app.js", "203.0.113.13".parse::<IpAddr>().unwrap());
        let verdict = orchestrator.evaluate(&request, &CancellationToken::new()).await;
        assert_eq!(verdict.policy_name, "static");
    }

    #[test]
    fn effective_weight_falls_back_through_overrides_then_defaults() {
        let mut policy = default_policy();
        policy.weight_overrides.insert("ua_header_shape".to_string(), 2.0);
        let mut defaults = std::collections::BTreeMap::new();
        defaults.insert("ip_asn".to_string(), 3.0);
        assert_eq!(policy::effective_weight("ua_header_shape", &policy, &defaults), 2.0);
        assert_eq!(policy::effective_weight("ip_asn", &policy, &defaults), 3.0);
        assert_eq!(policy::effective_weight("unknown", &policy, &defaults), 1.0);
    }
}
