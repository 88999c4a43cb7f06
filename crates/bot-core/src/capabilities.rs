//! Injected capabilities: time, randomness, and cancellation are passed in
//! rather than reached for globally, so the kernel is deterministically
//! testable.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of "now", injectable so tests can control decay/TTL/timeout math.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by default outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed-or-advanceable clock for deterministic tests.
#[derive(Clone)]
pub struct FrozenClock {
    inner: Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl FrozenClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(now)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        *self.inner.lock() += delta;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock()
    }
}

/// Cancellation linked to a request's deadline. Every suspending operation should select against this.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when cancelled; otherwise pends forever, for use in
    /// `tokio::select!` alongside real work.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Derive a token that auto-cancels after `timeout`, linked to the
    /// parent's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.clone();
        let handle = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => handle.cancel(),
                _ = handle.cancelled() => {}
            }
        });
        child
    }
}

/// Prepared bot-list patterns and CIDR ranges, compiled externally and
/// handed to the kernel as a read-only capability. Downloading/indexing bot-list and ASN/geo
/// data is a collaborator concern; this trait is the only seam the kernel
/// needs.
pub trait CompiledPatternCache: Send + Sync {
    fn is_whitelisted(&self, ip: IpAddr) -> bool;
    fn is_blacklisted(&self, ip: IpAddr) -> bool;
    fn is_datacenter(&self, ip: IpAddr) -> bool;
    /// Vendor-published IP ranges for a claimed verified-bot UA family
    /// (e.g. `"googlebot"`), used by the verified-bot detector's
    /// range-membership check.
    fn verified_bot_ranges(&self, ua_family: &str) -> Vec<ipnet::IpNet>;
}

/// An always-empty pattern cache: every IP is unclassified. Useful as a
/// default when no bot-list collaborator is wired up yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPatternCache;

impl CompiledPatternCache for EmptyPatternCache {
    fn is_whitelisted(&self, _ip: IpAddr) -> bool {
        false
    }
    fn is_blacklisted(&self, _ip: IpAddr) -> bool {
        false
    }
    fn is_datacenter(&self, _ip: IpAddr) -> bool {
        false
    }
    fn verified_bot_ranges(&self, _ua_family: &str) -> Vec<ipnet::IpNet> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_deterministically() {
        let c = FrozenClock::at(Utc::now());
        let t0 = c.now();
        c.advance(chrono::Duration::hours(1));
        let t1 = c.now();
        assert_eq!((t1 - t0).num_seconds(), 3600);
    }

    #[tokio::test]
    async fn cancellation_token_reports_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
