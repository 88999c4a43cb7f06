//! Clustering Service (C9): periodic community detection
//! over signature behaviors with FFT-derived timing features.
//!
//! Uses `petgraph` for the similarity graph (see DESIGN.md). The graph is
//! undirected and unweighted beyond the edge-inclusion threshold; the
//! snapshot (clusters map, signature->cluster map) is swapped atomically
//! behind a single `arc-swap`-style volatile reference so readers never
//! observe a partially updated snapshot.

pub mod spectral;

use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use bot_protocol::{BotCluster, ClusterType, SignatureBehavior};
use chrono::{DateTime, Utc};
use petgraph::graph::{NodeIndex, UnGraph};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Per-signature feature vector built from a behavior snapshot.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub signature: String,
    pub timing_cv: f64,
    pub request_rate: f64,
    pub path_diversity: f64,
    pub path_entropy: f64,
    pub average_bot_probability: f64,
    pub country_code: Option<String>,
    pub is_datacenter: bool,
    pub asn: Option<String>,
    pub intervals: Vec<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Optional L2-normalized semantic embedding.
    pub semantic_embedding: Option<Vec<f64>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub fn feature_vector_for(behavior: &SignatureBehavior) -> FeatureVector {
    let path_diversity = {
        let unique: std::collections::BTreeSet<&str> = behavior.requests.iter().map(|r| r.path.as_str()).collect();
        if behavior.requests.is_empty() {
            0.0
        } else {
            unique.len() as f64 / behavior.requests.len() as f64
        }
    };

    FeatureVector {
        signature: behavior.signature.clone(),
        timing_cv: behavior.timing_coefficient,
        request_rate: if behavior.average_interval_secs > f64::EPSILON {
            60.0 / behavior.average_interval_secs
        } else {
            0.0
        },
        path_diversity,
        path_entropy: behavior.path_entropy,
        average_bot_probability: behavior.average_bot_probability,
        country_code: behavior.country_code.clone(),
        is_datacenter: behavior.is_datacenter,
        asn: behavior.asn.clone(),
        intervals: behavior.intervals_secs(),
        latitude: behavior.latitude,
        longitude: behavior.longitude,
        semantic_embedding: None,
        first_seen: behavior.first_seen,
        last_seen: behavior.last_seen,
    }
}

fn continuous_similarity(a: f64, b: f64) -> f64 {
    let denom = a.abs().max(b.abs());
    if denom <= f64::EPSILON {
        1.0
    } else {
        (1.0 - (a - b).abs() / denom).clamp(0.0, 1.0)
    }
}

fn categorical_similarity(a: &Option<String>, b: &Option<String>) -> f64 {
    match (a, b) {
        (Some(x), Some(y)) => {
            if x == y {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.5,
    }
}

/// Hierarchical geographic similarity: identical
/// coordinates ~1.0, nearby-by-Haversine <500km ~0.6, distant 0. This
/// simplified model only has lat/lon (no city/region granularity), so it
/// folds the "same country" and "same region" tiers into the country-code
/// categorical comparison done separately, and uses Haversine purely for
/// the continuous distance tier.
fn geographic_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    match (a.latitude, a.longitude, b.latitude, b.longitude) {
        (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => {
            let distance_km = haversine_km(lat1, lon1, lat2, lon2);
            if distance_km < 1.0 {
                1.0
            } else if distance_km < 100.0 {
                0.85
            } else if distance_km < 500.0 {
                0.6
            } else if distance_km < 3000.0 {
                0.4
            } else {
                0.0
            }
        }
        _ => categorical_similarity(&a.country_code, &b.country_code) * 0.7,
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((dot + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Weighted-sum similarity across features, blended
/// with a semantic-embedding term when both sides have one, then boosted
/// by FFT cross-correlation when both sides have interval arrays (step 4).
pub fn similarity(a: &FeatureVector, b: &FeatureVector, config: &ClusteringConfig) -> f64 {
    let weights: [(f64, f64); 5] = [
        (continuous_similarity(a.timing_cv, b.timing_cv), 0.2),
        (continuous_similarity(a.request_rate, b.request_rate), 0.2),
        (continuous_similarity(a.path_entropy, b.path_entropy), 0.15),
        (if a.is_datacenter == b.is_datacenter { 1.0 } else { 0.0 }, 0.15),
        (categorical_similarity(&a.asn, &b.asn), 0.1),
    ];
    let weighted: f64 = weights.iter().map(|(s, w)| s * w).sum();
    let weight_sum: f64 = weights.iter().map(|(_, w)| w).sum();
    let geo = geographic_similarity(a, b);
    let mut heuristic = (weighted + geo * 0.2) / (weight_sum + 0.2);

    if let (Some(ea), Some(eb)) = (&a.semantic_embedding, &b.semantic_embedding) {
        let semantic = cosine_similarity(ea, eb);
        let w = config.semantic_embedding_weight;
        heuristic = (1.0 - w) * heuristic + w * semantic;
    }

    if a.intervals.len() >= 4 && b.intervals.len() >= 4 {
        let corr = spectral::cross_correlation(&a.intervals, &b.intervals);
        heuristic = 0.85 * heuristic + 0.15 * corr;
    }

    heuristic.clamp(0.0, 1.0)
}

/// Fraction of member pairs whose active windows (`[first_seen, last_seen]`)
/// overlap within a 5-minute tolerance.
fn temporal_density(members: &[&FeatureVector]) -> f64 {
    if members.len() < 2 {
        return 0.0;
    }
    let tolerance = chrono::Duration::minutes(5);
    let mut overlapping = 0usize;
    let mut total = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            total += 1;
            let a = members[i];
            let b = members[j];
            let overlap_start = a.first_seen.max(b.first_seen) - tolerance;
            let overlap_end = a.last_seen.min(b.last_seen) + tolerance;
            if overlap_start <= overlap_end {
                overlapping += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        overlapping as f64 / total as f64
    }
}

/// Deterministic label propagation: each
/// node starts in its own label, iterates with a seeded shuffle, each node
/// adopts the max-weight label among neighbors, stops on no-change or an
/// iteration cap.
fn label_propagation(graph: &UnGraph<String, f64>, seed: u64) -> BTreeMap<NodeIndex, usize> {
    let mut labels: BTreeMap<NodeIndex, usize> = graph.node_indices().enumerate().map(|(i, n)| (n, i)).collect();
    let mut order: Vec<NodeIndex> = graph.node_indices().collect();
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..100 {
        order.shuffle(&mut rng);
        let mut changed = false;
        for &node in &order {
            let mut weight_by_label: BTreeMap<usize, f64> = BTreeMap::new();
            for neighbor in graph.neighbors(node) {
                if let Some(edge) = graph.find_edge(node, neighbor) {
                    let weight = *graph.edge_weight(edge).unwrap_or(&1.0);
                    *weight_by_label.entry(labels[&neighbor]).or_insert(0.0) += weight;
                }
            }
            if let Some((&best_label, _)) = weight_by_label.iter().max_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap()
                    .then_with(|| b.0.cmp(a.0))
            }) {
                if labels[&node] != best_label {
                    labels.insert(node, best_label);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    labels
}

#[derive(Debug, Clone, Default)]
pub struct ClusteringSnapshot {
    pub clusters: Vec<BotCluster>,
    pub signature_to_cluster: BTreeMap<String, String>,
}

/// Periodic community-detection clusterer. The snapshot is swapped
/// atomically behind an `RwLock` written only by `run_cycle`; readers take
/// a cheap clone of the `Arc`'s contents.
pub struct ClusteringService {
    config: ClusteringConfig,
    snapshot: Arc<RwLock<Arc<ClusteringSnapshot>>>,
    cycles_run: AtomicU64,
}

impl ClusteringService {
    pub fn new(config: ClusteringConfig) -> Self {
        Self {
            config,
            snapshot: Arc::new(RwLock::new(Arc::new(ClusteringSnapshot::default()))),
            cycles_run: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<ClusteringSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    /// Run one clustering cycle over `behaviors` meeting
    /// `config.min_request_count`. `seed` drives
    /// the deterministic label-propagation shuffle.
    pub fn run_cycle(&self, behaviors: &[SignatureBehavior], now: DateTime<Utc>, seed: u64) -> ClusteringSnapshot {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);

        let eligible: Vec<FeatureVector> = behaviors
            .iter()
            .filter(|b| b.request_count >= self.config.min_request_count)
            .map(feature_vector_for)
            .collect();

        if eligible.len() < self.config.min_cluster_size {
            tracing::debug!(
                eligible = eligible.len(),
                min_cluster_size = self.config.min_cluster_size,
                "too few eligible signatures to cluster this cycle"
            );
            let empty = ClusteringSnapshot::default();
            *self.snapshot.write().unwrap() = Arc::new(empty.clone());
            return empty;
        }

        let mut graph: UnGraph<String, f64> = UnGraph::new_undirected();
        let nodes: Vec<NodeIndex> = eligible.iter().map(|f| graph.add_node(f.signature.clone())).collect();

        for i in 0..eligible.len() {
            for j in (i + 1)..eligible.len() {
                let sim = similarity(&eligible[i], &eligible[j], &self.config);
                if sim >= self.config.similarity_threshold {
                    graph.add_edge(nodes[i], nodes[j], sim);
                }
            }
        }

        let labels = match self.config.algorithm {
            // Full CPM-refined Leiden is not implemented yet; label
            // propagation is used for both selector values in the
            // meantime (see DESIGN.md).
            ClusteringAlgorithm::Leiden | ClusteringAlgorithm::LabelPropagation => label_propagation(&graph, seed),
        };

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            groups.entry(labels[node]).or_default().push(idx);
        }

        let mut clusters = Vec::new();
        let mut signature_to_cluster = BTreeMap::new();

        for members_idx in groups.values() {
            if members_idx.len() < self.config.min_cluster_size {
                continue;
            }
            let members: Vec<&FeatureVector> = members_idx.iter().map(|&i| &eligible[i]).collect();
            let mut member_sigs: Vec<String> = members.iter().map(|m| m.signature.clone()).collect();
            member_sigs.sort();

            let avg_bot_prob = members.iter().map(|m| m.average_bot_probability).sum::<f64>() / members.len() as f64;

            let mut pair_sims = Vec::new();
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    pair_sims.push(similarity(members[i], members[j], &self.config));
                }
            }
            let avg_similarity = if pair_sims.is_empty() {
                1.0
            } else {
                pair_sims.iter().sum::<f64>() / pair_sims.len() as f64
            };

            let density = temporal_density(&members);
            let cluster_type = classify(avg_bot_prob, avg_similarity, density, &self.config);

            let dominant_country = dominant_value(members.iter().filter_map(|m| m.country_code.clone()));
            let dominant_asn = dominant_value(members.iter().filter_map(|m| m.asn.clone()));

            let cluster_id = bot_protocol::cluster::cluster_id_for(&member_sigs);
            let label = heuristic_label(cluster_type, &dominant_country, &dominant_asn, member_sigs.len());

            let first_seen = members.iter().map(|m| m.first_seen).min().unwrap();
            let last_seen = members.iter().map(|m| m.last_seen).max().unwrap();

            for sig in &member_sigs {
                signature_to_cluster.insert(sig.clone(), cluster_id.clone());
            }

            clusters.push(BotCluster {
                cluster_id,
                cluster_type,
                member_count: member_sigs.len(),
                member_signatures: member_sigs,
                average_bot_probability: avg_bot_prob,
                average_similarity: avg_similarity,
                connectedness: avg_similarity,
                temporal_density: density,
                dominant_country,
                dominant_asn,
                label,
                description: None,
                first_seen,
                last_seen,
            });
        }

        let snapshot = ClusteringSnapshot {
            clusters,
            signature_to_cluster,
        };
        *self.snapshot.write().unwrap() = Arc::new(snapshot.clone());
        snapshot
    }
}

fn dominant_value(values: impl Iterator<Item = String>) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, c)| *c).map(|(v, _)| v)
}

/// Cluster-type classification.
fn classify(avg_bot_prob: f64, avg_similarity: f64, temporal_density: f64, config: &ClusteringConfig) -> ClusterType {
    if avg_bot_prob < 0.3 {
        ClusterType::HumanTraffic
    } else if avg_bot_prob < 0.5 {
        ClusterType::Mixed
    } else if avg_similarity >= config.product_threshold {
        ClusterType::BotProduct
    } else if temporal_density >= config.network_threshold && avg_similarity >= 0.5 {
        ClusterType::BotNetwork
    } else {
        ClusterType::Emergent
    }
}

/// Heuristic label generation used when no LLM describer is configured.
fn heuristic_label(cluster_type: ClusterType, country: &Option<String>, asn: &Option<String>, member_count: usize) -> String {
    let kind = match cluster_type {
        ClusterType::BotProduct => "bot-product",
        ClusterType::BotNetwork => "bot-network",
        ClusterType::Emergent => "emergent-cluster",
        ClusterType::HumanTraffic => "human-traffic",
        ClusterType::Mixed => "mixed-traffic",
        ClusterType::Unknown => "unknown-cluster",
    };
    match (country, asn) {
        (Some(c), Some(a)) => format!("{kind} ({member_count} members, {c}/{a})"),
        (Some(c), None) => format!("{kind} ({member_count} members, {c})"),
        _ => format!("{kind} ({member_count} members)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bot_protocol::signature::RequestObservation;

    fn config() -> ClusteringConfig {
        crate::config::Config::default().clustering
    }

    fn behavior_with(signature: &str, rate: f64, entropy: f64, datacenter: bool, asn: &str, country: &str, bot_prob: f64, now: DateTime<Utc>) -> SignatureBehavior {
        let mut b = SignatureBehavior::new(signature, now);
        b.request_count = 20;
        b.average_interval_secs = 60.0 / rate;
        b.path_entropy = entropy;
        b.is_datacenter = datacenter;
        b.asn = Some(asn.to_string());
        b.country_code = Some(country.to_string());
        b.average_bot_probability = bot_prob;
        b.timing_coefficient = 0.05;
        b.requests = (0..20)
            .map(|i| RequestObservation {
                path: "/x".to_string(),
                timestamp: now + chrono::Duration::seconds(i),
                bot_probability: bot_prob,
            })
            .collect();
        b.last_seen = now + chrono::Duration::seconds(19);
        b
    }

    #[test]
    fn below_min_cluster_size_produces_no_clusters() {
        let service = ClusteringService::new(config());
        let now = Utc::now();
        let behaviors = vec![behavior_with("s1", 120.0, 0.3, true, "AS123", "US", 0.9, now)];
        let snapshot = service.run_cycle(&behaviors, now, 42);
        assert!(snapshot.clusters.is_empty());
    }

    #[test]
    fn near_identical_signatures_form_one_cluster_with_deterministic_id() {
        let service = ClusteringService::new(config());
        let now = Utc::now();
        let behaviors: Vec<SignatureBehavior> = (0..5)
            .map(|i| behavior_with(&format!("sig-{i}"), 120.0, 0.3, true, "AS123", "US", 0.9, now))
            .collect();
        let snapshot = service.run_cycle(&behaviors, now, 7);
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.clusters[0].member_count, 5);
        assert!(matches!(snapshot.clusters[0].cluster_type, ClusterType::BotProduct | ClusterType::BotNetwork));

        let mut members = snapshot.clusters[0].member_signatures.clone();
        members.sort();
        let expected_id = bot_protocol::cluster::cluster_id_for(&members);
        assert_eq!(snapshot.clusters[0].cluster_id, expected_id);
    }

    #[test]
    fn human_traffic_not_misclassified_as_bot_product() {
        let service = ClusteringService::new(config());
        let now = Utc::now();
        let behaviors: Vec<SignatureBehavior> = (0..5)
            .map(|i| behavior_with(&format!("h-{i}"), 2.0, 0.9, false, "AS999", "DE", 0.05, now))
            .collect();
        let snapshot = service.run_cycle(&behaviors, now, 7);
        for cluster in &snapshot.clusters {
            assert_eq!(cluster.cluster_type, ClusterType::HumanTraffic);
        }
    }

    #[test]
    fn haversine_zero_distance_is_max_similarity() {
        assert!(haversine_km(37.7749, -122.4194, 37.7749, -122.4194) < 0.001);
    }
}
