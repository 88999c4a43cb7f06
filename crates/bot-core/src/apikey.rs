//! API-key validation. This sits in front of [`crate::policy::PolicyRegistry`]'s
//! overlay application: a disabled/expired/absent key silently falls back to
//! the path-resolved policy, but a key that fails its time window or path
//! scoping is a configuration error and must fail closed: an invalid time
//! window or out-of-scope path denies the request rather than falling
//! back to an unscoped default.

use crate::policy::glob_match;
use bot_protocol::ApiKeyConfig;
use chrono::{NaiveTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Result of validating a presented key against the store, independent of
/// whether the key resolves to an overlay at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyVerdict {
    /// No key presented, or the key name is unknown, or the key is
    /// disabled/expired — callers fall back to the path-resolved policy.
    Absent,
    /// Key is well-formed and currently usable for this path and time.
    Valid,
    /// Key resolved but is out of its allowed time window or path scope —
    /// fail closed.
    Denied(&'static str),
    /// Key resolved and is within scope but has exceeded its sliding-window
    /// rate limit.
    RateLimited,
}

/// Sliding-window counters for one key, pruned lazily on each check.
struct RateWindow {
    minute: VecDeque<chrono::DateTime<Utc>>,
    hour: VecDeque<chrono::DateTime<Utc>>,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            minute: VecDeque::new(),
            hour: VecDeque::new(),
        }
    }
}

/// Validates presented API keys against the configured store. Holds its own rate-limit state; keyed by `key_name`, not by the
/// raw header value, so counters survive key rotation within a TTL.
pub struct ApiKeyValidator {
    windows: Arc<DashMap<String, RateWindow>>,
}

impl Default for ApiKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyValidator {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Constant-time lookup: compares the presented value against every
    /// configured key's name rather than short-circuiting on the first
    /// mismatch, so the store's response time does not leak which prefix of
    /// a guessed key was correct.
    pub fn find<'a>(&self, presented: &str, keys: impl IntoIterator<Item = &'a ApiKeyConfig>) -> Option<&'a ApiKeyConfig> {
        let mut found: Option<&'a ApiKeyConfig> = None;
        for candidate in keys {
            let matches: bool = candidate.key_name.as_bytes().ct_eq(presented.as_bytes()).into();
            if matches {
                found = Some(candidate);
            }
        }
        found
    }

    /// Full validation: enable flag, expiry, UTC time window, path globs,
    /// then rate limit. Order matters for the fail-closed rule — scope
    /// violations are checked before the rate limiter so a denied key never
    /// consumes a rate-limit slot.
    pub fn validate(&self, key: &ApiKeyConfig, path: &str, now: chrono::DateTime<Utc>) -> ApiKeyVerdict {
        if !key.enabled {
            return ApiKeyVerdict::Absent;
        }
        if let Some(expires) = key.expires_at {
            if now > expires {
                return ApiKeyVerdict::Absent;
            }
        }
        if let Some(window) = &key.allowed_time_window {
            match parse_time_window(window) {
                Some((start, end)) => {
                    if !time_in_window(now.time(), start, end) {
                        return ApiKeyVerdict::Denied("outside allowed time window");
                    }
                }
                None => return ApiKeyVerdict::Denied("malformed time window"),
            }
        }
        if !key.path_allow_globs.is_empty() && !key.path_allow_globs.iter().any(|g| glob_match(g, path)) {
            return ApiKeyVerdict::Denied("path not in allow list");
        }
        if key.path_deny_globs.iter().any(|g| glob_match(g, path)) {
            return ApiKeyVerdict::Denied("path in deny list");
        }

        if self.rate_limited(key, now) {
            return ApiKeyVerdict::RateLimited;
        }
        ApiKeyVerdict::Valid
    }

    fn rate_limited(&self, key: &ApiKeyConfig, now: chrono::DateTime<Utc>) -> bool {
        if key.rate_limit_per_minute.is_none() && key.rate_limit_per_hour.is_none() {
            return false;
        }
        let mut entry = self.windows.entry(key.key_name.clone()).or_insert_with(RateWindow::new);

        let minute_floor = now - chrono::Duration::minutes(1);
        while matches!(entry.minute.front(), Some(t) if *t < minute_floor) {
            entry.minute.pop_front();
        }
        let hour_floor = now - chrono::Duration::hours(1);
        while matches!(entry.hour.front(), Some(t) if *t < hour_floor) {
            entry.hour.pop_front();
        }

        if let Some(limit) = key.rate_limit_per_minute {
            if entry.minute.len() as u32 >= limit {
                return true;
            }
        }
        if let Some(limit) = key.rate_limit_per_hour {
            if entry.hour.len() as u32 >= limit {
                return true;
            }
        }

        entry.minute.push_back(now);
        entry.hour.push_back(now);
        false
    }
}

/// Parses `HH:mm-HH:mm`.
fn parse_time_window(spec: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = spec.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((start, end))
}

/// `start <= end` is a same-day window; `start > end` wraps past midnight
/// (e.g. `22:00-06:00`).
fn time_in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Minutes-since-midnight, exposed for tests that want a readable fixture
/// time without constructing a full `DateTime`.
#[allow(dead_code)]
fn minute_time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m.min(59), 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn key(name: &str) -> ApiKeyConfig {
        ApiKeyConfig {
            key_name: name.to_string(),
            disabled_detectors: BTreeSet::new(),
            weight_overrides: BTreeMap::new(),
            detection_policy_name: None,
            action_policy_name: None,
            enabled: true,
            expires_at: None,
            allowed_time_window: None,
            path_allow_globs: vec![],
            path_deny_globs: vec![],
            rate_limit_per_minute: None,
            rate_limit_per_hour: None,
        }
    }

    #[test]
    fn constant_time_find_matches_exact_name() {
        let validator = ApiKeyValidator::new();
        let keys = vec![key("alpha"), key("beta")];
        let found = validator.find("beta", keys.iter());
        assert_eq!(found.unwrap().key_name, "beta");
        assert!(validator.find("gamma", keys.iter()).is_none());
    }

    #[test]
    fn disabled_key_is_absent_not_denied() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.enabled = false;
        assert_eq!(validator.validate(&k, "/x", Utc::now()), ApiKeyVerdict::Absent);
    }

    #[test]
    fn overnight_time_window_wraps_midnight() {
        assert!(time_in_window(minute_time(23, 30), minute_time(22, 0), minute_time(6, 0)));
        assert!(time_in_window(minute_time(2, 0), minute_time(22, 0), minute_time(6, 0)));
        assert!(!time_in_window(minute_time(12, 0), minute_time(22, 0), minute_time(6, 0)));
    }

    #[test]
    fn malformed_time_window_denies() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.allowed_time_window = Some("not-a-window".to_string());
        assert_eq!(validator.validate(&k, "/x", Utc::now()), ApiKeyVerdict::Denied("malformed time window"));
    }

    #[test]
    fn path_deny_glob_fails_closed() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.path_deny_globs = vec!["/admin/*".to_string()];
        assert_eq!(validator.validate(&k, "/admin/users", Utc::now()), ApiKeyVerdict::Denied("path in deny list"));
        assert_eq!(validator.validate(&k, "/public", Utc::now()), ApiKeyVerdict::Valid);
    }

    #[test]
    fn path_allow_glob_restricts_scope() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.path_allow_globs = vec!["/api/*".to_string()];
        assert_eq!(validator.validate(&k, "/other", Utc::now()), ApiKeyVerdict::Denied("path not in allow list"));
        assert_eq!(validator.validate(&k, "/api/widgets", Utc::now()), ApiKeyVerdict::Valid);
    }

    #[test]
    fn per_minute_rate_limit_trips_after_cap() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.rate_limit_per_minute = Some(2);
        let now = Utc::now();
        assert_eq!(validator.validate(&k, "/x", now), ApiKeyVerdict::Valid);
        assert_eq!(validator.validate(&k, "/x", now), ApiKeyVerdict::Valid);
        assert_eq!(validator.validate(&k, "/x", now), ApiKeyVerdict::RateLimited);
    }

    #[test]
    fn rate_limit_window_slides_out_old_entries() {
        let validator = ApiKeyValidator::new();
        let mut k = key("k");
        k.rate_limit_per_minute = Some(1);
        let now = Utc::now();
        assert_eq!(validator.validate(&k, "/x", now), ApiKeyVerdict::Valid);
        assert_eq!(validator.validate(&k, "/x", now), ApiKeyVerdict::RateLimited);
        let later = now + chrono::Duration::minutes(2);
        assert_eq!(validator.validate(&k, "/x", later), ApiKeyVerdict::Valid);
    }
}
