//! Pattern reputation entry value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    Ua,
    Ip,
    Subnet,
    Primary,
    Combined,
}

/// Hysteresis-banded reputation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReputationState {
    Neutral,
    Suspect,
    ConfirmedBad,
    ConfirmedGood,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReputationEntry {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub pattern: String,
    /// `[0,1]`.
    pub bot_score: f64,
    pub evidence_count: f64,
    pub last_update: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub state: ReputationState,
    pub gc_eligible_at: Option<DateTime<Utc>>,
}

impl PatternReputationEntry {
    pub fn neutral(pattern_id: impl Into<String>, pattern_type: PatternType, pattern: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            pattern_type,
            pattern: pattern.into(),
            bot_score: 0.5,
            evidence_count: 0.0,
            last_update: now,
            first_seen: now,
            state: ReputationState::Neutral,
            gc_eligible_at: None,
        }
    }
}
