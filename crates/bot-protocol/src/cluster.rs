//! Bot cluster value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterType {
    BotProduct,
    BotNetwork,
    Emergent,
    HumanTraffic,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotCluster {
    pub cluster_id: String,
    pub cluster_type: ClusterType,
    pub member_signatures: Vec<String>,
    pub member_count: usize,
    pub average_bot_probability: f64,
    pub average_similarity: f64,
    pub connectedness: f64,
    pub temporal_density: f64,
    pub dominant_country: Option<String>,
    pub dominant_asn: Option<String>,
    pub label: String,
    pub description: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Deterministic cluster id: hash of sorted member signatures.
pub fn cluster_id_for(members: &[String]) -> String {
    let mut sorted = members.to_vec();
    sorted.sort();
    let joined = sorted.join(",");
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_is_order_independent() {
        let a = cluster_id_for(&["sig-b".into(), "sig-a".into(), "sig-c".into()]);
        let b = cluster_id_for(&["sig-a".into(), "sig-c".into(), "sig-b".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn cluster_id_changes_with_membership() {
        let a = cluster_id_for(&["sig-a".into(), "sig-b".into()]);
        let b = cluster_id_for(&["sig-a".into(), "sig-b".into(), "sig-c".into()]);
        assert_ne!(a, b);
    }
}
