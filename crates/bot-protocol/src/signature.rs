//! Signature behavior sliding-window value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded request against a signature's sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestObservation {
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub bot_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBehavior {
    pub signature: String,
    pub requests: Vec<RequestObservation>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_count: u64,
    pub average_interval_secs: f64,
    /// Coefficient of variation of inter-request intervals.
    pub timing_coefficient: f64,
    /// Shannon entropy over the path distribution.
    pub path_entropy: f64,
    pub average_bot_probability: f64,
    pub country_code: Option<String>,
    pub asn: Option<String>,
    pub is_datacenter: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_vpn: bool,
    pub is_aberrant: bool,
}

impl SignatureBehavior {
    pub fn new(signature: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            signature: signature.into(),
            requests: Vec::new(),
            first_seen: now,
            last_seen: now,
            request_count: 0,
            average_interval_secs: 0.0,
            timing_coefficient: 0.0,
            path_entropy: 0.0,
            average_bot_probability: 0.0,
            country_code: None,
            asn: None,
            is_datacenter: false,
            latitude: None,
            longitude: None,
            is_vpn: false,
            is_aberrant: false,
        }
    }

    /// Inter-request intervals in seconds, oldest-to-newest, used for CV and
    /// spectral feature extraction.
    pub fn intervals_secs(&self) -> Vec<f64> {
        self.requests
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .filter(|v| *v >= 0.0)
            .collect()
    }
}
