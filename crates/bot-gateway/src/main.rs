//! Axum front door wiring the detection/decision kernel into a live request
//! pipeline: a CORS layer, a `from_fn` security-headers middleware,
//! `Arc<AppState>`, `tokio::net::TcpListener` + `axum::serve`.
//! Everything the kernel itself needs (policy registry, detector registry,
//! action registry, reputation cache, signature coordinator, clustering and
//! convergence services, the learning event bus) is assembled here and
//! handed to [`bot_core::Orchestrator`]; this binary owns none of that
//! logic, only the HTTP plumbing and the background ticks the control flow
//! calls for ("C9 runs periodically", "C8 may enqueue").

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bot_core::actions::ActionRegistry;
use bot_core::capabilities::{CancellationToken, SystemClock};
use bot_core::config::Config;
use bot_core::detectors::DetectorRegistry;
use bot_core::events::{EventBus, EventHandler};
use bot_core::learning::{DriftDetector, ReputationFeedbackHandler};
use bot_core::observability::Counters;
use bot_core::persistence::PersistenceScheduler;
use bot_core::policy::PolicyRegistry;
use bot_core::reputation::ReputationCache;
use bot_core::request::{ResponseDirective, StaticRequestView};
use bot_core::signature::SignatureCoordinator;
use bot_core::{clustering::ClusteringService, convergence::ConvergenceService};
use bot_core::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub struct AppState {
    orchestrator: Orchestrator,
    reputation: ReputationCache,
    signatures: SignatureCoordinator,
    clustering: Arc<ClusteringService>,
    convergence: Arc<ConvergenceService>,
    events: EventBus,
    counters: Arc<Counters>,
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Load .env if present

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = load_config();

    let reputation = ReputationCache::new(config.reputation.clone());
    if let Some(path) = &config.reputation.persist_path {
        let scheduler = PersistenceScheduler::new(reputation.clone(), path.clone(), Duration::from_secs(600), Arc::new(SystemClock));
        scheduler.load_at_startup().await;
        tokio::spawn(async move { scheduler.run(Box::pin(std::future::pending())).await });
    }

    let signatures = SignatureCoordinator::new(config.signature_window.clone());
    let clustering = Arc::new(ClusteringService::new(config.clustering.clone()));
    let convergence = Arc::new(ConvergenceService::new(config.clustering.clone()));
    let counters = Arc::new(Counters::default());

    let (events, receiver) = EventBus::new(config.event_bus_capacity);

    let detectors = DetectorRegistry::with_builtins(reputation.clone(), signatures.clone());
    let actions = ActionRegistry::with_builtins();
    let policies = PolicyRegistry::new(&config);

    let orchestrator = Orchestrator::new(
        detectors,
        actions,
        policies,
        reputation.clone(),
        signatures.clone(),
        Arc::new(SystemClock),
        counters.clone(),
        Some(events.clone()),
        config.clone(),
    );

    // Reputation feedback applies out-of-band corrections to C1; the
    // drift detector compares fast-path
    // against full-path verdicts for the same UA and republishes its own
    // finding back onto the bus.
    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(ReputationFeedbackHandler::new(reputation.clone(), Arc::new(SystemClock))),
        Arc::new(DriftDetector::new(events.clone(), chrono::Duration::hours(1), 0.1, 20)),
    ];
    tokio::spawn(bot_core::events::run(receiver, handlers));

    spawn_reputation_maintenance(reputation.clone(), config.clone());
    spawn_signature_eviction(signatures.clone(), config.clone());
    spawn_clustering(signatures.clone(), clustering.clone(), config.clone(), counters.clone());
    spawn_convergence(signatures.clone(), convergence.clone(), config.clone());

    let state = Arc::new(AppState {
        orchestrator,
        reputation,
        signatures,
        clustering,
        convergence,
        events,
        counters,
        config: config.clone(),
    });

    let allowed_origins = parse_allowed_origins();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .allow_credentials(true);

    let app = Router::new()
        .route("/internal/feedback", post(submit_feedback))
        .fallback(protected_origin)
        .layer(axum::middleware::from_fn_with_state(state.clone(), detection_middleware))
        .layer(from_fn(security_headers))
        .layer(cors)
        .route("/healthz", get(health_check))
        .with_state(state);

    let port = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "bot detection gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Full TOML deserialization of [`Config`] at the binary edge, via the
/// `toml` crate — `bot_core::config::Config::from_toml_str`'s hand-rolled
/// `key = value` merge is a deliberately minimal stopgap for quick overrides
/// in tests, not a real config loader (see its own doc comment). A live
/// gateway deserializes the whole file with a real TOML parser instead.
fn load_config() -> Config {
    match std::env::var("BOT_CONFIG_PATH") {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(error = %e, path, "failed to parse BOT_CONFIG_PATH, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path, "failed to read BOT_CONFIG_PATH, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

/// Run every inbound request through the orchestrator before it reaches the
/// protected origin. A `Block`/
/// `Challenge`/`Throttle`/`Redirect` directive short-circuits here; anything
/// else continues to [`protected_origin`].
async fn detection_middleware(State(state): State<Arc<AppState>>, ConnectInfo(peer): ConnectInfo<SocketAddr>, request: Request, next: Next) -> Response {
    let view = axum_request_view(&request, peer.ip());
    let cancellation = CancellationToken::new().with_timeout(state.config.default_pipeline_timeout);

    let verdict = state.orchestrator.evaluate(&view, &cancellation).await;

    tracing::info!(
        path = %view.path,
        risk = verdict.risk_score,
        confidence = verdict.confidence,
        band = ?verdict.risk_band,
        policy = %verdict.policy_name,
        action = ?verdict.action_name,
        cached = verdict.from_cache,
        "verdict"
    );

    if !verdict.directive.continue_pipeline {
        return directive_to_response(&verdict.directive, &verdict.risk_band);
    }

    let mut response = next.run(request).await;
    apply_directive_headers(&verdict.directive, response.headers_mut());
    response
}

fn directive_to_response(directive: &ResponseDirective, band: &bot_protocol::RiskBand) -> Response {
    if let Some(target) = &directive.redirect_to {
        let status = directive.status_code.unwrap_or(302);
        return Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::FOUND))
            .header(axum::http::header::LOCATION, target.as_str())
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::FOUND.into_response());
    }

    let status = directive.status_code.unwrap_or(403);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
    let mut builder = Response::builder().status(status);
    for (name, value) in &directive.headers {
        builder = builder.header(name, value);
    }
    let body = directive.body.clone().unwrap_or_else(|| format!("request blocked ({band:?} risk)").into_bytes());
    builder.body(Body::from(body)).unwrap_or_else(|_| status.into_response())
}

fn apply_directive_headers(directive: &ResponseDirective, headers: &mut axum::http::HeaderMap) {
    for (name, value) in &directive.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// Lift an axum request into the kernel's framework-agnostic [`RequestView`],
/// built as an owned [`StaticRequestView`] rather than a
/// zero-copy borrow because the request body/parts are consumed by `next`
/// afterward — the kernel never needs the body, only method/path/headers/IP.
fn axum_request_view(request: &Request, remote_ip: std::net::IpAddr) -> StaticRequestView {
    let mut view = StaticRequestView::get(request.uri().path().to_string(), remote_ip);
    view.method = request.method().to_string();
    view.query_string = request.uri().query().map(str::to_string);
    view.trace_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unlabeled")
        .to_string();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            view = view.with_header(name.as_str().to_string(), value.to_string());
        }
    }
    view
}

/// Stand-in for whatever origin this gateway fronts — a real deployment
/// reverse-proxies to it instead. Present so the detection middleware has
/// something to guard and so `/healthz` isn't the only route exercised.
async fn protected_origin() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let dispatcher_counters = state.counters.clone();
    Json(serde_json::json!({
        "status": "ok",
        "service": "bot-detection-gateway",
        "total_requests": dispatcher_counters.total_requests.get(),
        "bots_blocked_threshold": dispatcher_counters.bots_detected_threshold.get(),
        "bots_blocked_early_exit": dispatcher_counters.bots_detected_early_exit.get(),
        "reputation_entries": state.reputation.len(),
        "tracked_signatures": state.signatures.tracked_count(),
        "clusters": state.clustering.snapshot().clusters.len(),
        "clustering_cycles": state.clustering.cycles_run(),
        "events_dropped": state.events.dropped_count(),
    }))
}

#[derive(serde::Deserialize)]
struct FeedbackRequest {
    pattern_id: String,
    label: f64,
    #[serde(default = "default_feedback_weight")]
    weight: f64,
}

fn default_feedback_weight() -> f64 {
    5.0
}

/// Operator-facing feedback intake: the admin
/// dashboard that consumes/produces this is out of scope, but
/// the HTTP seam that would feed it is in scope for the gateway binary.
async fn submit_feedback(State(state): State<Arc<AppState>>, Json(body): Json<FeedbackRequest>) -> impl IntoResponse {
    state.events.publish(bot_core::events::LearningEvent::UserFeedback {
        pattern_id: body.pattern_id,
        label: body.label.clamp(0.0, 1.0),
        weight: body.weight.max(0.0),
    });
    StatusCode::ACCEPTED
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    response
}

fn parse_allowed_origins() -> Vec<HeaderValue> {
    let raw = std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".to_string());
    let mut parsed = Vec::new();
    for origin in raw.split(',').map(|v| v.trim()).filter(|v| !v.is_empty()) {
        match origin.parse::<HeaderValue>() {
            Ok(value) => parsed.push(value),
            Err(_) => warn!(origin, "ignoring invalid origin in ALLOWED_ORIGINS"),
        }
    }
    if parsed.is_empty() {
        parsed.push("http://localhost:5173".parse().unwrap());
    }
    parsed
}

/// Periodic decay sweep and GC for C1. Snapshot persistence is a separate concern, handled by
/// [`PersistenceScheduler`] when `reputation.persist_path` is configured.
fn spawn_reputation_maintenance(reputation: ReputationCache, _config: Config) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            reputation.decay_sweep(now);
            let removed = reputation.garbage_collect(now);
            if removed > 0 {
                info!(removed, "reputation garbage collection");
            }
        }
    });
}

/// Evicts signature-window entries older than the sliding-window horizon.
fn spawn_signature_eviction(signatures: SignatureCoordinator, _config: Config) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(120));
        loop {
            ticker.tick().await;
            let evicted = signatures.evict_expired(chrono::Utc::now());
            if evicted > 0 {
                tracing::debug!(evicted, "evicted stale signature behaviors");
            }
        }
    });
}

/// Periodic community detection over signature behaviors (C9).
fn spawn_clustering(signatures: SignatureCoordinator, clustering: Arc<ClusteringService>, config: Config, counters: Arc<Counters>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.clustering.interval_secs.max(1)));
        let mut seed = 0u64;
        loop {
            ticker.tick().await;
            let behaviors = signatures.get_family_aware_behaviors();
            let now = chrono::Utc::now();
            seed = seed.wrapping_add(1);
            let snapshot = clustering.run_cycle(&behaviors, now, seed);
            counters.clustering_cycles.inc();
            counters.clusters_produced.add(snapshot.clusters.len() as u64);
            if snapshot.clusters.is_empty() {
                tracing::debug!(candidates = behaviors.len(), "clustering cycle produced no clusters");
            } else {
                info!(clusters = snapshot.clusters.len(), "clustering cycle complete");
            }
        }
    });
}

/// Periodic family merge/split sweep.
fn spawn_convergence(signatures: SignatureCoordinator, convergence: Arc<ConvergenceService>, config: Config) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.clustering.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let stats = convergence.run_cycle(&signatures, chrono::Utc::now());
            if stats.merges > 0 || stats.splits > 0 {
                info!(merges = stats.merges, splits = stats.splits, pairs = stats.pairs_considered, "convergence cycle complete");
            }
        }
    });
}
