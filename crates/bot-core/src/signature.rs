//! Signature Coordinator (C7): per-signature sliding window of recent
//! request behavior plus a family index and an IP->signatures index.
//! Same concurrency posture as C1: `dashmap`, per-key
//! update, no global lock.

use crate::config::SignatureWindowConfig;
use bot_protocol::{RequestObservation, SignatureBehavior};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One request's worth of signals relevant to behavior tracking, supplied
/// by the orchestrator after a request completes.
#[derive(Debug, Clone, Default)]
pub struct ObservedSignals {
    pub country_code: Option<String>,
    pub asn: Option<String>,
    pub is_datacenter: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_vpn: bool,
}

#[derive(Clone)]
pub struct SignatureCoordinator {
    behaviors: Arc<DashMap<String, SignatureBehavior>>,
    /// signature -> family id.
    family_of: Arc<DashMap<String, String>>,
    /// family id -> member signatures.
    families: Arc<DashMap<String, DashSet<String>>>,
    /// ip hash -> signatures observed under that IP.
    ip_index: Arc<DashMap<String, DashSet<String>>>,
    config: SignatureWindowConfig,
}

impl SignatureCoordinator {
    pub fn new(config: SignatureWindowConfig) -> Self {
        Self {
            behaviors: Arc::new(DashMap::new()),
            family_of: Arc::new(DashMap::new()),
            families: Arc::new(DashMap::new()),
            ip_index: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Append an observation, update derived statistics, and evict entries
    /// older than the sliding-window horizon.
    pub fn observe(&self, signature: &str, path: &str, bot_probability: f64, signals: &ObservedSignals, now: DateTime<Utc>) {
        let mut entry = self
            .behaviors
            .entry(signature.to_string())
            .or_insert_with(|| SignatureBehavior::new(signature, now));

        entry.requests.push(RequestObservation {
            path: path.to_string(),
            timestamp: now,
            bot_probability,
        });
        entry.last_seen = now;
        entry.request_count += 1;

        let horizon = chrono::Duration::minutes(self.config.max_age_minutes);
        entry.requests.retain(|r| now - r.timestamp <= horizon);
        if entry.requests.len() > self.config.max_requests_per_signature {
            let drop = entry.requests.len() - self.config.max_requests_per_signature;
            entry.requests.drain(0..drop);
        }

        recompute_derived(&mut entry);

        if let Some(cc) = &signals.country_code {
            entry.country_code = Some(cc.clone());
        }
        if let Some(asn) = &signals.asn {
            entry.asn = Some(asn.clone());
        }
        entry.is_datacenter = signals.is_datacenter;
        if signals.latitude.is_some() {
            entry.latitude = signals.latitude;
        }
        if signals.longitude.is_some() {
            entry.longitude = signals.longitude;
        }
        entry.is_vpn = signals.is_vpn;
    }

    /// Record that `signature` was observed under `ip_hash`, for the
    /// convergence service's IP-overlap signal.
    pub fn record_ip(&self, ip_hash: &str, signature: &str) {
        self.ip_index
            .entry(ip_hash.to_string())
            .or_default()
            .insert(signature.to_string());
    }

    pub fn signatures_for_ip(&self, ip_hash: &str) -> Vec<String> {
        self.ip_index
            .get(ip_hash)
            .map(|set| set.iter().map(|s| s.clone()).collect())
            .unwrap_or_default()
    }

    /// Every IP hash with at least one signature observed under it, for
    /// scanning IP-scoped candidate pairs.
    pub fn known_ip_hashes(&self) -> Vec<String> {
        self.ip_index.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get_behavior(&self, signature: &str) -> Option<SignatureBehavior> {
        self.behaviors.get(signature).map(|e| e.clone())
    }

    /// Evict behaviors whose `last_seen` is past the sliding-window
    /// horizon entirely.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let horizon = chrono::Duration::minutes(self.config.max_age_minutes);
        let stale: Vec<String> = self
            .behaviors
            .iter()
            .filter(|e| now - e.last_seen > horizon)
            .map(|e| e.key().clone())
            .collect();
        for sig in &stale {
            self.behaviors.remove(sig);
            self.remove_signature_from_family_index(sig);
        }
        stale.len()
    }

    /// Snapshot of every tracked behavior, optionally merged by family.
    pub fn get_family_aware_behaviors(&self) -> Vec<SignatureBehavior> {
        let mut by_family: BTreeMap<String, Vec<SignatureBehavior>> = BTreeMap::new();
        let mut standalone = Vec::new();

        for entry in self.behaviors.iter() {
            let sig = entry.key().clone();
            match self.family_of.get(&sig) {
                Some(fam) => by_family.entry(fam.clone()).or_default().push(entry.value().clone()),
                None => standalone.push(entry.value().clone()),
            }
        }

        let mut out = standalone;
        for (family_id, members) in by_family {
            out.push(merge_family(&family_id, members));
        }
        out
    }

    pub fn all_behaviors(&self) -> Vec<SignatureBehavior> {
        self.behaviors.iter().map(|e| e.value().clone()).collect()
    }

    /// Add `signature` to `family_id`.
    pub fn register_family(&self, family_id: &str, signature: &str) {
        self.families
            .entry(family_id.to_string())
            .or_default()
            .insert(signature.to_string());
        self.family_of.insert(signature.to_string(), family_id.to_string());
    }

    pub fn get_family(&self, signature: &str) -> Option<String> {
        self.family_of.get(signature).map(|f| f.clone())
    }

    pub fn family_members(&self, family_id: &str) -> Vec<String> {
        self.families
            .get(family_id)
            .map(|set| set.iter().map(|s| s.clone()).collect())
            .unwrap_or_default()
    }

    /// Dissolve a family entirely.
    pub fn remove_family(&self, family_id: &str) {
        if let Some((_, members)) = self.families.remove(family_id) {
            for sig in members.iter() {
                self.family_of.remove(sig.key());
            }
        }
    }

    /// Remove just one signature from whatever family it's in.
    pub fn remove_signature_from_family_index(&self, signature: &str) {
        if let Some((_, family_id)) = self.family_of.remove(signature) {
            if let Some(members) = self.families.get(&family_id) {
                members.remove(signature);
            }
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.behaviors.len()
    }
}

fn recompute_derived(entry: &mut SignatureBehavior) {
    let intervals = entry.intervals_secs();
    if !intervals.is_empty() {
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        entry.average_interval_secs = mean;
        entry.timing_coefficient = if mean > f64::EPSILON {
            let variance = intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
            variance.sqrt() / mean
        } else {
            0.0
        };
    }

    entry.path_entropy = shannon_path_entropy(&entry.requests);

    if !entry.requests.is_empty() {
        entry.average_bot_probability =
            entry.requests.iter().map(|r| r.bot_probability).sum::<f64>() / entry.requests.len() as f64;
    }

    entry.is_aberrant = entry.timing_coefficient < 0.15 && entry.requests.len() >= 5;
}

/// Shannon entropy (base 2) over the path distribution.
fn shannon_path_entropy(requests: &[RequestObservation]) -> f64 {
    if requests.is_empty() {
        return 0.0;
    }
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in requests {
        *counts.entry(r.path.as_str()).or_insert(0) += 1;
    }
    let n = requests.len() as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            p * p.log2()
        })
        .sum::<f64>()
}

fn merge_family(family_id: &str, members: Vec<SignatureBehavior>) -> SignatureBehavior {
    let mut merged = SignatureBehavior::new(family_id, members[0].first_seen);
    merged.first_seen = members.iter().map(|m| m.first_seen).min().unwrap();
    merged.last_seen = members.iter().map(|m| m.last_seen).max().unwrap();
    merged.request_count = members.iter().map(|m| m.request_count).sum();

    let mut all_requests: Vec<RequestObservation> = members.iter().flat_map(|m| m.requests.clone()).collect();
    all_requests.sort_by_key(|r| r.timestamp);
    merged.requests = all_requests;
    recompute_derived(&mut merged);

    merged.country_code = members.iter().find_map(|m| m.country_code.clone());
    merged.asn = members.iter().find_map(|m| m.asn.clone());
    merged.is_datacenter = members.iter().any(|m| m.is_datacenter);
    merged.is_vpn = members.iter().any(|m| m.is_vpn);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SignatureWindowConfig {
        SignatureWindowConfig {
            max_requests_per_signature: 256,
            max_age_minutes: 60,
        }
    }

    #[test]
    fn observe_updates_request_count_and_average() {
        let coord = SignatureCoordinator::new(cfg());
        let t0 = Utc::now();
        for i in 0..5 {
            coord.observe(
                "sig1",
                "/a",
                0.2,
                &ObservedSignals::default(),
                t0 + chrono::Duration::seconds(i * 10),
            );
        }
        let behavior = coord.get_behavior("sig1").unwrap();
        assert_eq!(behavior.request_count, 5);
        assert!((behavior.average_interval_secs - 10.0).abs() < 1e-6);
    }

    #[test]
    fn path_entropy_is_zero_for_single_path() {
        let coord = SignatureCoordinator::new(cfg());
        let t0 = Utc::now();
        for i in 0..4 {
            coord.observe("sig1", "/same", 0.1, &ObservedSignals::default(), t0 + chrono::Duration::seconds(i));
        }
        assert_eq!(coord.get_behavior("sig1").unwrap().path_entropy, 0.0);
    }

    #[test]
    fn family_merge_combines_request_counts() {
        let coord = SignatureCoordinator::new(cfg());
        let t0 = Utc::now();
        coord.observe("sig-a", "/x", 0.1, &ObservedSignals::default(), t0);
        coord.observe("sig-b", "/y", 0.1, &ObservedSignals::default(), t0 + chrono::Duration::seconds(1));
        coord.register_family("fam-1", "sig-a");
        coord.register_family("fam-1", "sig-b");

        let merged = coord.get_family_aware_behaviors();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].request_count, 2);
    }

    #[test]
    fn remove_signature_from_family_index_leaves_family_intact() {
        let coord = SignatureCoordinator::new(cfg());
        coord.register_family("fam-1", "sig-a");
        coord.register_family("fam-1", "sig-b");
        coord.remove_signature_from_family_index("sig-a");
        assert!(coord.get_family("sig-a").is_none());
        assert_eq!(coord.family_members("fam-1"), vec!["sig-b".to_string()]);
    }

    #[test]
    fn evict_expired_drops_stale_signatures() {
        let coord = SignatureCoordinator::new(SignatureWindowConfig {
            max_requests_per_signature: 256,
            max_age_minutes: 1,
        });
        let t0 = Utc::now();
        coord.observe("sig1", "/a", 0.1, &ObservedSignals::default(), t0);
        let evicted = coord.evict_expired(t0 + chrono::Duration::minutes(5));
        assert_eq!(evicted, 1);
        assert!(coord.get_behavior("sig1").is_none());
    }
}
