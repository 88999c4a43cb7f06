//! Convergence subsystem: periodically
//! decides which tracked signatures likely belong to the same underlying
//! client and merges them into a family, and splits a family back apart
//! once its members diverge. Distinct from [`crate::clustering`], which
//! only produces read-only reporting clusters — convergence actually
//! mutates the [`crate::signature::SignatureCoordinator`] index that C3's
//! reputation/behavioral detectors read from.

use crate::clustering::{feature_vector_for, similarity};
use crate::config::ClusteringConfig;
use crate::signature::SignatureCoordinator;
use bot_protocol::SignatureBehavior;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Weighting of the three signals that feed the merge/split score.
const TEMPORAL_WEIGHT: f64 = 0.3;
const SIMILARITY_WEIGHT: f64 = 0.5;
const AGREEMENT_WEIGHT: f64 = 0.2;

/// Above this score two signatures merge into one family.
const MERGE_THRESHOLD: f64 = 0.75;
/// Below this score two family members are split back apart.
const SPLIT_THRESHOLD: f64 = 0.35;
/// Minutes a family must stay merged before it's eligible to split again,
/// preventing merge/split thrashing on borderline scores.
const SPLIT_COOLDOWN_MINUTES: i64 = 15;

fn pair_overlap(a: &SignatureBehavior, b: &SignatureBehavior) -> f64 {
    let tolerance = chrono::Duration::minutes(5);
    let start = a.first_seen.max(b.first_seen) - tolerance;
    let end = a.last_seen.min(b.last_seen) + tolerance;
    if start <= end {
        1.0
    } else {
        0.0
    }
}

fn bot_probability_agreement(a: &SignatureBehavior, b: &SignatureBehavior) -> f64 {
    1.0 - (a.average_bot_probability - b.average_bot_probability).abs()
}

/// Combined merge/split score for a pair of behaviors.
pub fn pair_score(a: &SignatureBehavior, b: &SignatureBehavior, config: &ClusteringConfig) -> f64 {
    let fa = feature_vector_for(a);
    let fb = feature_vector_for(b);
    let sim = similarity(&fa, &fb, config);
    let temporal = pair_overlap(a, b);
    let agreement = bot_probability_agreement(a, b);
    TEMPORAL_WEIGHT * temporal + SIMILARITY_WEIGHT * sim + AGREEMENT_WEIGHT * agreement
}

/// Hard veto:
/// never merge across this boundary no matter how high the blended score.
fn bot_classification_conflict(a: &SignatureBehavior, b: &SignatureBehavior) -> bool {
    (a.average_bot_probability > 0.5) != (b.average_bot_probability > 0.5)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceStats {
    pub merges: usize,
    pub splits: usize,
    pub pairs_considered: usize,
}

/// Periodic convergence sweep. Tracks per-family last-merge times for the
/// split cooldown; otherwise stateless across runs (family membership
/// itself lives in `SignatureCoordinator`).
pub struct ConvergenceService {
    config: ClusteringConfig,
    last_merged_at: Arc<DashMap<String, DateTime<Utc>>>,
}

impl ConvergenceService {
    pub fn new(config: ClusteringConfig) -> Self {
        Self {
            config,
            last_merged_at: Arc::new(DashMap::new()),
        }
    }

    /// Run one convergence pass: consider merging every
    /// currently-standalone pair of signatures observed under the same IP
    /// hash, then re-examine every existing family for members that should
    /// be split back out.
    pub fn run_cycle(&self, coordinator: &SignatureCoordinator, now: DateTime<Utc>) -> ConvergenceStats {
        let mut stats = ConvergenceStats::default();
        let behaviors = coordinator.all_behaviors();

        let mut candidates: Vec<(String, String)> = Vec::new();
        let mut seen_pairs = std::collections::BTreeSet::new();
        for ip_hash in coordinator.known_ip_hashes() {
            let signatures = coordinator.signatures_for_ip(&ip_hash);
            for i in 0..signatures.len() {
                if coordinator.get_family(&signatures[i]).is_some() {
                    continue;
                }
                for j in (i + 1)..signatures.len() {
                    if coordinator.get_family(&signatures[j]).is_some() {
                        continue;
                    }
                    let pair = if signatures[i] <= signatures[j] {
                        (signatures[i].clone(), signatures[j].clone())
                    } else {
                        (signatures[j].clone(), signatures[i].clone())
                    };
                    if seen_pairs.insert(pair.clone()) {
                        candidates.push(pair);
                    }
                }
            }
        }

        for (sig_a, sig_b) in candidates {
            let Some(a) = coordinator.get_behavior(&sig_a) else { continue };
            let Some(b) = coordinator.get_behavior(&sig_b) else { continue };
            stats.pairs_considered += 1;

            if bot_classification_conflict(&a, &b) {
                continue;
            }

            let score = pair_score(&a, &b, &self.config);
            if score >= MERGE_THRESHOLD {
                let family_id = existing_family_for(coordinator, &sig_a, &sig_b).unwrap_or_else(|| format!("fam-{}", bot_protocol::cluster::cluster_id_for(&[sig_a.clone(), sig_b.clone()])));
                coordinator.register_family(&family_id, &sig_a);
                coordinator.register_family(&family_id, &sig_b);
                self.last_merged_at.insert(family_id, now);
                stats.merges += 1;
            }
        }

        let family_ids: std::collections::BTreeSet<String> = behaviors
            .iter()
            .filter_map(|b| coordinator.get_family(&b.signature))
            .collect();

        for family_id in family_ids {
            if let Some(merged_at) = self.last_merged_at.get(&family_id) {
                if now - *merged_at < chrono::Duration::minutes(SPLIT_COOLDOWN_MINUTES) {
                    continue;
                }
            }

            let members = coordinator.family_members(&family_id);
            if members.len() < 2 {
                continue;
            }
            let member_behaviors: Vec<SignatureBehavior> = members.iter().filter_map(|m| coordinator.get_behavior(m)).collect();
            if member_behaviors.len() < 2 {
                continue;
            }

            let avg_score: f64 = {
                let mut total = 0.0;
                let mut count = 0usize;
                for i in 0..member_behaviors.len() {
                    for j in (i + 1)..member_behaviors.len() {
                        total += pair_score(&member_behaviors[i], &member_behaviors[j], &self.config);
                        count += 1;
                    }
                }
                if count == 0 {
                    1.0
                } else {
                    total / count as f64
                }
            };

            if avg_score < SPLIT_THRESHOLD {
                for sig in &members {
                    coordinator.remove_signature_from_family_index(sig);
                }
                self.last_merged_at.remove(&family_id);
                stats.splits += 1;
            }
        }

        stats
    }
}

fn existing_family_for(coordinator: &SignatureCoordinator, sig_a: &str, sig_b: &str) -> Option<String> {
    coordinator.get_family(sig_a).or_else(|| coordinator.get_family(sig_b))
}
