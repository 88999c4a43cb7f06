//! The signal blackboard's value type and the detection contribution shape.

use serde::{Deserialize, Serialize};

/// A typed value stored under a dotted blackboard key, e.g. `ua.is_mobile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum BlackboardValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl BlackboardValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BlackboardValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            BlackboardValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            BlackboardValue::Float(f) => Some(*f),
            BlackboardValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BlackboardValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for BlackboardValue {
    fn from(v: bool) -> Self {
        BlackboardValue::Bool(v)
    }
}

impl From<i64> for BlackboardValue {
    fn from(v: i64) -> Self {
        BlackboardValue::Int(v)
    }
}

impl From<f64> for BlackboardValue {
    fn from(v: f64) -> Self {
        BlackboardValue::Float(v)
    }
}

impl From<String> for BlackboardValue {
    fn from(v: String) -> Self {
        BlackboardValue::Str(v)
    }
}

impl From<&str> for BlackboardValue {
    fn from(v: &str) -> Self {
        BlackboardValue::Str(v.to_string())
    }
}

/// A detector-declared verdict that, when present on a contribution with
/// `trigger_early_exit = true`, short-circuits orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarlyExitVerdict {
    VerifiedGoodBot,
    VerifiedBadBot,
    Whitelisted,
    Blacklisted,
    PolicyAllowed,
    PolicyBlocked,
}

impl EarlyExitVerdict {
    /// Whether this verdict resolves to an allow (vs. a block).
    pub fn is_allow(self) -> bool {
        matches!(
            self,
            EarlyExitVerdict::VerifiedGoodBot
                | EarlyExitVerdict::Whitelisted
                | EarlyExitVerdict::PolicyAllowed
        )
    }
}

/// One detector's output for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionContribution {
    pub detector_name: String,
    /// Probability in `[0,1]` that the request is non-human.
    pub bot_evidence: f64,
    /// Non-negative weight this contribution should carry in aggregation.
    pub evidence_weight: f64,
    /// Certainty of this contribution, independent of direction, `[0,1]`.
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub trigger_early_exit: bool,
    pub early_exit_verdict: Option<EarlyExitVerdict>,
}

impl DetectionContribution {
    /// A contribution carrying no evidence — used when a detector's
    /// trigger predicate fails, it times out, or it panics.
    pub fn neutral(detector_name: impl Into<String>) -> Self {
        Self {
            detector_name: detector_name.into(),
            bot_evidence: 0.5,
            evidence_weight: 0.0,
            confidence: 0.0,
            reasons: Vec::new(),
            trigger_early_exit: false,
            early_exit_verdict: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.evidence_weight <= f64::EPSILON && self.confidence <= f64::EPSILON
    }
}

/// Coarse risk-band label over the final aggregated risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Fixed thresholds: Low < 0.3, Medium < 0.6, High < 0.85, else Critical.
    pub fn from_risk(risk: f64) -> Self {
        if risk < 0.3 {
            RiskBand::Low
        } else if risk < 0.6 {
            RiskBand::Medium
        } else if risk < 0.85 {
            RiskBand::High
        } else {
            RiskBand::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
            RiskBand::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_band_boundaries() {
        assert_eq!(RiskBand::from_risk(0.0), RiskBand::Low);
        assert_eq!(RiskBand::from_risk(0.29), RiskBand::Low);
        assert_eq!(RiskBand::from_risk(0.3), RiskBand::Medium);
        assert_eq!(RiskBand::from_risk(0.59), RiskBand::Medium);
        assert_eq!(RiskBand::from_risk(0.6), RiskBand::High);
        assert_eq!(RiskBand::from_risk(0.84), RiskBand::High);
        assert_eq!(RiskBand::from_risk(0.85), RiskBand::Critical);
        assert_eq!(RiskBand::from_risk(1.0), RiskBand::Critical);
    }

    #[test]
    fn neutral_contribution_carries_no_weight() {
        let c = DetectionContribution::neutral("timed-out-detector");
        assert!(c.is_neutral());
        assert_eq!(c.confidence, 0.0);
    }
}
