//! Offline replay tool: read one captured request per line from stdin, run
//! it through the same orchestrator a live gateway would use, write the
//! scored verdict to stdout. Lets an operator validate a policy set against
//! recorded traffic without standing up a server.

use bot_core::capabilities::{CancellationToken, SystemClock};
use bot_core::config::Config;
use bot_core::detectors::DetectorRegistry;
use bot_core::observability::Counters;
use bot_core::policy::PolicyRegistry;
use bot_core::reputation::ReputationCache;
use bot_core::request::StaticRequestView;
use bot_core::signature::SignatureCoordinator;
use bot_core::Orchestrator;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "bot-cli",
    version,
    about = "Replay captured request telemetry against the detection kernel's default policy set"
)]
struct Args {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
}

#[derive(Debug, Clone, Deserialize)]
struct CapturedRequest {
    #[serde(default = "default_method")]
    method: String,
    path: String,
    #[serde(default)]
    query_string: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    remote_ip: IpAddr,
    #[serde(default)]
    tls_fingerprint: Option<String>,
    #[serde(default = "default_trace_id")]
    trace_id: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_trace_id() -> String {
    "replay".to_string()
}

impl From<CapturedRequest> for StaticRequestView {
    fn from(captured: CapturedRequest) -> Self {
        let mut view = StaticRequestView::get(captured.path, captured.remote_ip);
        view.method = captured.method;
        view.query_string = captured.query_string;
        view.tls_fingerprint = captured.tls_fingerprint;
        view.trace_id = captured.trace_id;
        for (name, value) in captured.headers {
            view = view.with_header(name, value);
        }
        view
    }
}

#[derive(Debug, Serialize)]
struct VerdictOutput {
    path: String,
    risk_score: f64,
    risk_band: String,
    confidence: f64,
    policy_name: String,
    action: Option<String>,
    continue_pipeline: bool,
    status_code: Option<u16>,
    reasons: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::default();

    let reputation = ReputationCache::new(config.reputation.clone());
    let signatures = SignatureCoordinator::new(config.signature_window.clone());
    let orchestrator = Orchestrator::new(
        DetectorRegistry::with_builtins(reputation.clone(), signatures.clone()),
        bot_core::actions::ActionRegistry::with_builtins(),
        PolicyRegistry::new(&config),
        reputation,
        signatures,
        Arc::new(SystemClock),
        Arc::new(Counters::default()),
        None,
        config,
    );
    let cancellation = CancellationToken::new();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let captured: CapturedRequest = serde_json::from_str(&line)?;
        let path = captured.path.clone();
        let view: StaticRequestView = captured.into();
        let verdict = orchestrator.evaluate(&view, &cancellation).await;

        let output = VerdictOutput {
            path,
            risk_score: verdict.risk_score,
            risk_band: format!("{:?}", verdict.risk_band),
            confidence: verdict.confidence,
            policy_name: verdict.policy_name,
            action: verdict.action_name,
            continue_pipeline: verdict.directive.continue_pipeline,
            status_code: verdict.directive.status_code,
            reasons: verdict.reasons,
        };

        let json = match args.output {
            OutputFormat::Json => serde_json::to_string(&output)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&output)?,
        };
        println!("{json}");
    }

    Ok(())
}
