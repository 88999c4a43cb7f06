// ═══════════════════════════════════════════════════════════════
// Bot Core — Workspace Integration Tests
// Full pipeline round-trip · Policy routing · Cross-request learning
// ═══════════════════════════════════════════════════════════════

use bot_core::actions::ActionRegistry;
use bot_core::capabilities::{CancellationToken, FrozenClock};
use bot_core::config::Config;
use bot_core::detectors::DetectorRegistry;
use bot_core::observability::Counters;
use bot_core::policy::PolicyRegistry;
use bot_core::protocol::{DetectionPolicy, IdentityVectors, PathMapping};
use bot_core::reputation::ReputationCache;
use bot_core::request::StaticRequestView;
use bot_core::signature::SignatureCoordinator;
use bot_core::Orchestrator;
use std::net::IpAddr;
use std::sync::Arc;

struct Harness {
    orchestrator: Orchestrator,
    policies: PolicyRegistry,
    reputation: ReputationCache,
}

fn harness_with_clock(clock: FrozenClock) -> Harness {
    let config = Config::default();
    let reputation = ReputationCache::new(config.reputation.clone());
    let signatures = SignatureCoordinator::new(config.signature_window.clone());
    let detectors = DetectorRegistry::with_builtins(reputation.clone(), signatures.clone());
    let actions = ActionRegistry::with_builtins();
    let policies = PolicyRegistry::new(&config);
    let orchestrator = Orchestrator::new(
        detectors,
        actions,
        policies.clone(),
        reputation.clone(),
        signatures,
        Arc::new(clock),
        Arc::new(Counters::default()),
        None,
        config,
    );
    Harness {
        orchestrator,
        policies,
        reputation,
    }
}

fn harness() -> Harness {
    harness_with_clock(FrozenClock::at(chrono::Utc::now()))
}

/// A browser-shaped request through the full pipeline: policy resolution,
/// every fast-path detector, aggregation, and an allow directive.
#[tokio::test]
async fn full_pipeline_round_trip_for_browser_traffic() {
    let harness = harness();
    let request = StaticRequestView::get("/checkout", "198.51.100.20".parse::<IpAddr>().unwrap())
        .with_user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15")
        .with_header("accept", "text/html")
        .with_header("accept-language", "en-US")
        .with_header("accept-encoding", "gzip, deflate, br");

    let verdict = harness.orchestrator.evaluate(&request, &CancellationToken::new()).await;

    assert!(verdict.directive.continue_pipeline, "reasons={:?}", verdict.reasons);
    assert_eq!(verdict.policy_name, "default");
    assert!(verdict.risk_score < 0.5, "risk_score={}", verdict.risk_score);
}

/// A path mapping registered at runtime takes precedence over the default
/// policy, and the resolved policy actually drives the pipeline.
#[tokio::test]
async fn custom_path_mapping_routes_traffic_to_the_registered_policy() {
    let harness = harness();
    let base = harness.policies.get("default").expect("default policy is built in");
    harness.policies.register(DetectionPolicy {
        name: "payments-api".to_string(),
        ..base
    });
    harness.policies.register_path_mapping(PathMapping {
        glob_pattern: "/api/payments/*".to_string(),
        policy_name: "payments-api".to_string(),
        is_user_defined: true,
    });

    let request = StaticRequestView::get("/api/payments/charge", "198.51.100.21".parse::<IpAddr>().unwrap())
        .with_user_agent("Mozilla/5.0");
    let verdict = harness.orchestrator.evaluate(&request, &CancellationToken::new()).await;

    assert_eq!(verdict.policy_name, "payments-api");
}

/// Repeated tool-shaped requests from one client accumulate pattern
/// reputation across calls to `evaluate`; the cache the reputation detector
/// reads is left with evidence once the loop finishes.
#[tokio::test]
async fn repeated_scraper_traffic_builds_pattern_reputation_across_requests() {
    let harness = harness();
    let ip: IpAddr = "198.51.100.22".parse().unwrap();

    let mut last_risk = 0.0;
    for i in 0..6 {
        let request = StaticRequestView::get(format!("/catalog/item-{i}"), ip).with_user_agent("python-requests/2.31");
        let verdict = harness.orchestrator.evaluate(&request, &CancellationToken::new()).await;
        last_risk = verdict.risk_score;
    }

    assert!(last_risk > 0.3, "last_risk={last_risk}");

    let identity = IdentityVectors::compute("python-requests/2.31", ip);
    let entry = harness.reputation.get(&identity.primary, chrono::Utc::now());
    assert!(entry.evidence_count > 0.0, "expected accumulated evidence, got {entry:?}");
}

/// A burst of requests from the same signature, close together in time,
/// builds enough history for the behavioral detector to flag the rate.
#[tokio::test]
async fn tight_request_cadence_raises_the_behavioral_signal() {
    let clock = FrozenClock::at(chrono::Utc::now());
    let harness = harness_with_clock(clock.clone());
    let ip: IpAddr = "198.51.100.23".parse().unwrap();

    let mut flagged = false;
    for i in 0..5 {
        let request = StaticRequestView::get(format!("/search?q={i}"), ip).with_user_agent("Mozilla/5.0 (compatible; regular-bot)");
        let verdict = harness.orchestrator.evaluate(&request, &CancellationToken::new()).await;
        if verdict.reasons.iter().any(|r| r.contains("request rate")) {
            flagged = true;
        }
        clock.advance(chrono::Duration::milliseconds(400));
    }

    assert!(flagged, "expected the behavioral detector to flag the tight cadence eventually");
}
