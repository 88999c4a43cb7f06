//! The configuration surface the kernel honors. Loading this from TOML/env
//! is an ambient concern external to the kernel proper — a live binary
//! loads config via `dotenvy` + `std::env::var` or a TOML file; here a
//! `Config` value is what that loading ultimately produces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default_policy_name: String,
    pub static_asset_extensions: Vec<String>,
    pub static_policy_name: String,
    pub static_path_globs: Vec<String>,
    pub enable_static_asset_detection: bool,

    /// Per-detector global default weight, overridden per-policy.
    pub detector_weights: BTreeMap<String, f64>,

    pub reputation: ReputationConfig,
    pub dns: DnsConfig,
    pub signature_window: SignatureWindowConfig,
    pub dispatcher: DispatcherConfig,
    pub clustering: ClusteringConfig,
    pub event_bus_capacity: usize,

    /// Overall pipeline timeout, default 5s (tighter for API-oriented
    /// policies, set per-policy via `DetectionPolicy::timeout_ms`).
    pub default_pipeline_timeout: Duration,

    /// When set, no log line ever emits a raw IP without masking.
    pub zero_pii: bool,

    /// Aggregation constant C in `confidence = 1 - exp(-sum_weight / C)`.
    pub confidence_scale: f64,

    /// Agreement-boost: minimum bot_evidence for a contribution to count
    /// toward agreement.
    pub agreement_boost_threshold: f64,
    pub agreement_boost_step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// τ in hours for the exponential decay toward neutral.
    pub decay_tau_hours: f64,
    /// Evidence count above which a score no longer moves much; clamps
    /// the running mean's denominator to prevent ossification.
    pub evidence_weight_cap: f64,
    /// Minimum evidence count (K) for Suspect/ConfirmedBad/Good classification.
    pub min_evidence_for_confirmation: f64,
    /// GC horizon: entries untouched this long, Neutral, low evidence, are collectible.
    pub gc_horizon_hours: f64,
    pub max_entries: usize,
    pub persist_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub verified_ttl_hours: u64,
    pub failed_ttl_hours: u64,
    pub max_cache_entries: u64,
    pub fcrdns_timeout_ms: u64,
    pub bot_list_refresh_hours: u64,
    pub asn_resolver: String,
    pub honeypot_access_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureWindowConfig {
    pub max_requests_per_signature: usize,
    pub max_age_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub capacity: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub interval_secs: u64,
    pub detection_counter_trigger: u64,
    pub min_request_count: u64,
    pub min_cluster_size: usize,
    pub similarity_threshold: f64,
    pub product_threshold: f64,
    pub network_threshold: f64,
    pub semantic_embedding_weight: f64,
    pub algorithm: ClusteringAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringAlgorithm {
    Leiden,
    LabelPropagation,
}

impl Default for Config {
    fn default() -> Self {
        let mut detector_weights = BTreeMap::new();
        for name in [
            "ua_header_shape",
            "ip_asn",
            "verified_bot",
            "behavioral",
            "spectral",
            "inconsistency",
            "reputation",
            "intent_response",
        ] {
            detector_weights.insert(name.to_string(), 1.0);
        }

        Self {
            default_policy_name: "default".to_string(),
            static_asset_extensions: vec![
                "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "map",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            static_policy_name: "static".to_string(),
            static_path_globs: vec!["/static/*".to_string(), "/assets/*".to_string()],
            enable_static_asset_detection: true,
            detector_weights,
            reputation: ReputationConfig {
                decay_tau_hours: 72.0,
                evidence_weight_cap: 50.0,
                min_evidence_for_confirmation: 5.0,
                gc_horizon_hours: 24.0 * 30.0,
                max_entries: 1_000_000,
                persist_path: None,
            },
            dns: DnsConfig {
                verified_ttl_hours: 24,
                failed_ttl_hours: 1,
                max_cache_entries: 500_000,
                fcrdns_timeout_ms: 5_000,
                bot_list_refresh_hours: 24,
                asn_resolver: "8.8.8.8:53".to_string(),
                honeypot_access_key: None,
            },
            signature_window: SignatureWindowConfig {
                max_requests_per_signature: 256,
                max_age_minutes: 60,
            },
            dispatcher: DispatcherConfig {
                capacity: 10_000,
                max_concurrency: default_max_concurrency(),
            },
            clustering: ClusteringConfig {
                interval_secs: 300,
                detection_counter_trigger: 50_000,
                min_request_count: 5,
                min_cluster_size: 3,
                similarity_threshold: 0.6,
                product_threshold: 0.85,
                network_threshold: 0.5,
                semantic_embedding_weight: 0.3,
                algorithm: ClusteringAlgorithm::LabelPropagation,
            },
            event_bus_capacity: 4_096,
            default_pipeline_timeout: Duration::from_secs(5),
            zero_pii: false,
            confidence_scale: 4.0,
            agreement_boost_threshold: 0.3,
            agreement_boost_step: 0.1,
        }
    }
}

/// Default background dispatcher concurrency: `max(1, cores/2)`.
fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

impl Config {
    /// Load from a TOML file, falling back to defaults for anything absent.
    /// Configuration errors here are not fatal to the process but are reported to the caller to act on.
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::CoreError> {
        toml_like::merge_defaults(raw)
    }
}

/// Minimal TOML-subset merge so this crate doesn't need to pull in a TOML
/// parser dependency beyond what `serde` already gives us through
/// `serde_json` in the rest of the kernel; callers that want full TOML
/// should deserialize with the `toml` crate at the binary edge
/// (`bot-gateway`/`bot-cli`) and hand this a constructed `Config` value
/// instead of a string. This helper exists only so `Config::from_toml_str`
/// has *some* implementation for quick overrides via a flat `key = value`
/// file in tests and examples.
mod toml_like {
    use super::Config;

    pub fn merge_defaults(raw: &str) -> Result<Config, crate::CoreError> {
        let mut cfg = Config::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "default_policy_name" => cfg.default_policy_name = value.to_string(),
                "zero_pii" => cfg.zero_pii = value.parse().unwrap_or(cfg.zero_pii),
                "reputation.decay_tau_hours" => {
                    cfg.reputation.decay_tau_hours = value
                        .parse()
                        .map_err(|e| crate::CoreError::Config(format!("{key}: {e}")))?
                }
                "clustering.interval_secs" => {
                    cfg.clustering.interval_secs = value
                        .parse()
                        .map_err(|e| crate::CoreError::Config(format!("{key}: {e}")))?
                }
                _ => {}
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_threshold_ordering_invariant() {
        // Every policy must satisfy early_exit_threshold < immediate_block_threshold.
        // Config itself carries no such fields (those live on DetectionPolicy), but the
        // shared confidence scale must be positive for the aggregation formula to be sane.
        let cfg = Config::default();
        assert!(cfg.confidence_scale > 0.0);
        assert!(cfg.dispatcher.max_concurrency >= 1);
    }

    #[test]
    fn from_toml_str_overrides_selected_fields() {
        let cfg = Config::from_toml_str("default_policy_name = \"strict\"\nzero_pii = true\n").unwrap();
        assert_eq!(cfg.default_policy_name, "strict");
        assert!(cfg.zero_pii);
    }
}
