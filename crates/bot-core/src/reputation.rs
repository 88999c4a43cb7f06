//! Pattern Reputation Cache (C1): time-decayed bot scores per identity
//! vector with feedback, with a confidence-weighted running-mean update
//! rule (evidence weight, minimum-observations floor, non-linear decay
//! curve) backing a live concurrent store with decay/GC/persist.
//! `dashmap` gives per-entry concurrent access with no global lock.

use crate::capabilities::Clock;
use crate::config::ReputationConfig;
use crate::error::CoreResult;
use bot_protocol::{PatternReputationEntry, PatternType, ReputationState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;

/// Concurrent `pattern_id -> reputation` map.
#[derive(Clone)]
pub struct ReputationCache {
    entries: Arc<DashMap<String, PatternReputationEntry>>,
    config: ReputationConfig,
}

impl ReputationCache {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Read a reputation entry, or a fresh `Neutral` default if unseen.
    /// Does not insert.
    pub fn get(&self, pattern_id: &str, now: DateTime<Utc>) -> PatternReputationEntry {
        self.entries
            .get(pattern_id)
            .map(|e| e.clone())
            .unwrap_or_else(|| PatternReputationEntry::neutral(pattern_id, PatternType::Combined, pattern_id, now))
    }

    /// Idempotent get-or-create.
    pub fn get_or_create(
        &self,
        pattern_id: &str,
        pattern_type: PatternType,
        pattern: &str,
        now: DateTime<Utc>,
    ) -> PatternReputationEntry {
        self.entries
            .entry(pattern_id.to_string())
            .or_insert_with(|| PatternReputationEntry::neutral(pattern_id, pattern_type, pattern, now))
            .clone()
    }

    /// Overwrite the stored value for `entry.pattern_id`. Callers compute the updated value (e.g. via
    /// [`apply_evidence`]) then call this.
    pub fn update(&self, entry: PatternReputationEntry) {
        self.entries.insert(entry.pattern_id.clone(), entry);
    }

    /// Apply a single piece of evidence to the entry for `pattern_id`,
    /// creating it if absent, and store the result. Retries the
    /// read-modify-write on write conflict (optimistic concurrency).
    pub fn apply_evidence(
        &self,
        pattern_id: &str,
        pattern_type: PatternType,
        pattern: &str,
        label: f64,
        weight: f64,
        now: DateTime<Utc>,
    ) -> PatternReputationEntry {
        loop {
            let prior = self.get_or_create(pattern_id, pattern_type, pattern, now);
            let updated = apply_evidence(&prior, label, weight, now, &self.config);
            let mut slot = self.entries.entry(pattern_id.to_string()).or_insert_with(|| prior.clone());
            if slot.last_update == prior.last_update && slot.bot_score == prior.bot_score {
                *slot = updated.clone();
                return updated;
            }
            // Someone else wrote between our read and write; retry.
        }
    }

    /// Decay every entry toward neutral, re-evaluating hysteresis state.
    /// Snapshots keys and iterates — holds no
    /// global lock.
    pub fn decay_sweep(&self, now: DateTime<Utc>) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(mut entry) = self.entries.get_mut(&key) {
                *entry = decay_one(&entry, now, &self.config);
            }
        }
    }

    /// Remove entries that are `Neutral`, low-evidence, and untouched past
    /// the GC horizon.
    pub fn garbage_collect(&self, now: DateTime<Utc>) -> usize {
        let horizon = chrono::Duration::hours(self.config.gc_horizon_hours as i64);
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| {
                e.state == ReputationState::Neutral
                    && e.evidence_count < self.config.min_evidence_for_confirmation
                    && now - e.last_update > horizon
            })
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomic write-temp-rename snapshot of all entries.
    pub async fn persist(&self, path: &Path) -> CoreResult<()> {
        let snapshot = PersistedSnapshot {
            schema_version: bot_protocol::REPUTATION_SCHEMA_VERSION,
            entries: self.entries.iter().map(|e| e.value().clone()).collect(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(crate::CoreError::Persistence)?;
        tokio::fs::write(tmp.path(), &json)
            .await
            .map_err(crate::CoreError::Persistence)?;
        tmp.persist(path)
            .map_err(|e| crate::CoreError::Persistence(e.error))?;
        Ok(())
    }

    /// Best-effort warm start: missing file or decode failure yields an
    /// empty cache rather than a fatal error.
    pub async fn load(&self, path: &Path) -> CoreResult<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(_) => return Ok(0),
        };
        let snapshot: PersistedSnapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(_) => return Ok(0),
        };
        let count = snapshot.entries.len();
        for entry in snapshot.entries {
            self.entries.insert(entry.pattern_id.clone(), entry);
        }
        Ok(count)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedSnapshot {
    schema_version: u32,
    entries: Vec<PatternReputationEntry>,
}

/// `score' = (score*n + label*weight) / (n + weight)`, n' = n + weight
/// clamped to `evidence_weight_cap`.
/// `apply_evidence(r, label, 0) == r`.
pub fn apply_evidence(
    prior: &PatternReputationEntry,
    label: f64,
    weight: f64,
    now: DateTime<Utc>,
    config: &ReputationConfig,
) -> PatternReputationEntry {
    if weight <= 0.0 {
        return prior.clone();
    }
    let n = prior.evidence_count;
    let new_score = (prior.bot_score * n + label * weight) / (n + weight);
    let new_n = (n + weight).min(config.evidence_weight_cap);

    let mut updated = prior.clone();
    updated.bot_score = new_score.clamp(0.0, 1.0);
    updated.evidence_count = new_n;
    updated.last_update = now;
    updated.state = classify_state(updated.bot_score, updated.evidence_count, prior.state, config);
    updated.gc_eligible_at = gc_eligible_at(&updated, config);
    updated
}

/// `new = old * e^{-dt/tau} + 0.5*(1 - e^{-dt/tau})`; `dt=0` is identity.
fn decay_one(entry: &PatternReputationEntry, now: DateTime<Utc>, config: &ReputationConfig) -> PatternReputationEntry {
    let dt_hours = (now - entry.last_update).num_milliseconds() as f64 / 3_600_000.0;
    if dt_hours <= 0.0 {
        return entry.clone();
    }
    let decay = (-dt_hours / config.decay_tau_hours.max(f64::EPSILON)).exp();
    let new_score = entry.bot_score * decay + 0.5 * (1.0 - decay);

    let mut updated = entry.clone();
    updated.bot_score = new_score.clamp(0.0, 1.0);
    updated.last_update = now;
    updated.state = classify_state(updated.bot_score, updated.evidence_count, entry.state, config);
    updated.gc_eligible_at = gc_eligible_at(&updated, config);
    updated
}

/// Hysteresis-banded state transition.
/// `ConfirmedBad`/`ConfirmedGood` are sticky until the score crosses back
/// through the neutral band `[0.35, 0.65]`.
fn classify_state(score: f64, evidence: f64, prior_state: ReputationState, config: &ReputationConfig) -> ReputationState {
    let k = config.min_evidence_for_confirmation;
    if (0.35..=0.65).contains(&score) {
        return ReputationState::Neutral;
    }
    match prior_state {
        ReputationState::ConfirmedBad if score > 0.65 => return ReputationState::ConfirmedBad,
        ReputationState::ConfirmedGood if score < 0.35 => return ReputationState::ConfirmedGood,
        _ => {}
    }
    if score > 0.8 && evidence >= k {
        ReputationState::ConfirmedBad
    } else if score > 0.65 {
        ReputationState::Suspect
    } else if score < 0.2 && evidence >= k {
        ReputationState::ConfirmedGood
    } else {
        ReputationState::Suspect
    }
}

fn gc_eligible_at(entry: &PatternReputationEntry, config: &ReputationConfig) -> Option<DateTime<Utc>> {
    if entry.state == ReputationState::Neutral && entry.evidence_count < config.min_evidence_for_confirmation {
        Some(entry.last_update + chrono::Duration::hours(config.gc_horizon_hours as i64))
    } else {
        None
    }
}
