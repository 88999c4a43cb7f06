//! Observability counters. Metrics *backends* are external
//! collaborators; these are the counters themselves, plain atomic
//! fields on a struct.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub total_requests: Counter,
    pub bots_detected_early_exit: Counter,
    pub bots_detected_threshold: Counter,
    pub per_detector_errors: dashmap::DashMap<String, AtomicU64>,
    pub dns_cache_hits: Counter,
    pub dns_cache_misses: Counter,
    pub dispatcher_enqueued: Counter,
    pub dispatcher_dropped: Counter,
    pub dispatcher_completed: Counter,
    pub dispatcher_failed: Counter,
    pub clusters_produced: Counter,
    pub clustering_cycles: Counter,
}

impl Counters {
    pub fn record_detector_error(&self, detector_name: &str) {
        self.per_detector_errors
            .entry(detector_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn detector_error_count(&self, detector_name: &str) -> u64 {
        self.per_detector_errors
            .get(detector_name)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = Counters::default();
        counters.total_requests.inc();
        counters.total_requests.inc();
        assert_eq!(counters.total_requests.get(), 2);

        counters.record_detector_error("ua_header_shape");
        counters.record_detector_error("ua_header_shape");
        assert_eq!(counters.detector_error_count("ua_header_shape"), 2);
        assert_eq!(counters.detector_error_count("unknown"), 0);
    }
}
