//! FFT-derived spectral features over inter-request intervals, via
//! `rustfft` (see DESIGN.md).

use bot_protocol::spectral::MIN_INTERVALS_FOR_SPECTRAL;
use bot_protocol::SpectralFeatures;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Extract spectral features from a series of inter-request intervals
/// (seconds). Returns [`SpectralFeatures::neutral`] with
/// `has_sufficient_data=false` below [`MIN_INTERVALS_FOR_SPECTRAL`].
pub fn extract(intervals: &[f64]) -> SpectralFeatures {
    if intervals.len() < MIN_INTERVALS_FOR_SPECTRAL {
        return SpectralFeatures::neutral();
    }

    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let mut buffer: Vec<Complex<f64>> = intervals.iter().map(|v| Complex::new(v - mean, 0.0)).collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(buffer.len());
    fft.process(&mut buffer);

    let n = buffer.len();
    let half = n / 2;
    let magnitudes: Vec<f64> = buffer[..half.max(1)].iter().map(|c| c.norm()).collect();
    let total_power: f64 = magnitudes.iter().map(|m| m * m).sum();

    if total_power <= f64::EPSILON {
        return SpectralFeatures::neutral();
    }

    let (dominant_idx, &peak_mag) = magnitudes
        .iter()
        .enumerate()
        .skip(1) // skip DC bin
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .unwrap_or((0, &0.0));

    let dominant_frequency = (dominant_idx as f64 / half.max(1) as f64).clamp(0.0, 1.0);

    let normalized_power: Vec<f64> = magnitudes.iter().map(|m| (m * m) / total_power).collect();
    let spectral_entropy = {
        let raw: f64 = -normalized_power
            .iter()
            .filter(|p| **p > 1e-12)
            .map(|p| p * p.ln())
            .sum::<f64>();
        let max_entropy = (magnitudes.len().max(1) as f64).ln().max(f64::EPSILON);
        (raw / max_entropy).clamp(0.0, 1.0)
    };

    let harmonic_idx = dominant_idx * 2;
    let harmonic_ratio = if harmonic_idx < magnitudes.len() && peak_mag > f64::EPSILON {
        (magnitudes[harmonic_idx] / peak_mag).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let avg_mag = magnitudes.iter().sum::<f64>() / magnitudes.len().max(1) as f64;
    let peak_to_avg_ratio = if avg_mag > f64::EPSILON {
        (peak_mag / avg_mag / 10.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let spectral_centroid = {
        let weighted: f64 = magnitudes.iter().enumerate().map(|(i, m)| i as f64 * m).sum();
        let total_mag: f64 = magnitudes.iter().sum();
        if total_mag > f64::EPSILON {
            (weighted / total_mag / half.max(1) as f64).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    SpectralFeatures {
        dominant_frequency,
        spectral_entropy,
        harmonic_ratio,
        spectral_centroid,
        peak_to_avg_ratio,
        has_sufficient_data: true,
    }
}

/// Normalized cross-correlation via FFT: zero-pad both inputs to the same
/// power-of-two-friendly length, multiply by the conjugate in the
/// frequency domain, inverse-FFT, take the max magnitude normalized by
/// `‖a‖·‖b‖`.
pub fn cross_correlation(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let norm_a = (a.iter().map(|v| v * v).sum::<f64>()).sqrt();
    let norm_b = (b.iter().map(|v| v * v).sum::<f64>()).sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }

    let n = (a.len() + b.len()).next_power_of_two();
    let mut fa: Vec<Complex<f64>> = a.iter().map(|v| Complex::new(*v, 0.0)).collect();
    fa.resize(n, Complex::new(0.0, 0.0));
    let mut fb: Vec<Complex<f64>> = b.iter().map(|v| Complex::new(*v, 0.0)).collect();
    fb.resize(n, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut fa);
    fft.process(&mut fb);

    let mut product: Vec<Complex<f64>> = fa.iter().zip(fb.iter()).map(|(x, y)| x * y.conj()).collect();

    let ifft = planner.plan_fft_inverse(n);
    ifft.process(&mut product);

    let max_mag = product.iter().map(|c| c.norm()).fold(0.0_f64, f64::max) / n as f64;
    (max_mag / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_intervals_return_neutral() {
        let features = extract(&[1.0, 2.0, 1.0]);
        assert!(!features.has_sufficient_data);
        assert_eq!(features.dominant_frequency, 0.5);
    }

    #[test]
    fn periodic_signal_has_sufficient_data_and_bounded_features() {
        let intervals: Vec<f64> = (0..32).map(|i| 1.0 + (i as f64 * 0.5).sin()).collect();
        let features = extract(&intervals);
        assert!(features.has_sufficient_data);
        assert!((0.0..=1.0).contains(&features.dominant_frequency));
        assert!((0.0..=1.0).contains(&features.spectral_entropy));
    }

    #[test]
    fn identical_sequences_have_high_cross_correlation() {
        let a = vec![1.0, 2.0, 3.0, 2.0, 1.0, 0.0];
        let corr = cross_correlation(&a, &a);
        assert!(corr > 0.5, "corr={corr}");
    }

    #[test]
    fn empty_sequences_have_zero_correlation() {
        assert_eq!(cross_correlation(&[], &[1.0]), 0.0);
    }
}
