//! Spectral feature value type.

use serde::{Deserialize, Serialize};

/// Minimum inter-request intervals required before FFT-derived features are
/// considered meaningful.
pub const MIN_INTERVALS_FOR_SPECTRAL: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    pub dominant_frequency: f64,
    pub spectral_entropy: f64,
    pub harmonic_ratio: f64,
    pub spectral_centroid: f64,
    pub peak_to_avg_ratio: f64,
    pub has_sufficient_data: bool,
}

impl SpectralFeatures {
    /// Neutral placeholder returned when fewer than
    /// [`MIN_INTERVALS_FOR_SPECTRAL`] intervals are available. Consumers
    /// must treat this as a 0.5 similarity contribution.
    pub const fn neutral() -> Self {
        Self {
            dominant_frequency: 0.5,
            spectral_entropy: 0.5,
            harmonic_ratio: 0.5,
            spectral_centroid: 0.5,
            peak_to_avg_ratio: 0.5,
            has_sufficient_data: false,
        }
    }
}

impl Default for SpectralFeatures {
    fn default() -> Self {
        Self::neutral()
    }
}
