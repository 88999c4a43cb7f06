//! Policy Registry + Evaluator (C5): named policies, path
//! globbing to resolve the effective policy for a request, and API-key
//! overlay application.

pub(crate) mod builtins;
pub mod evaluator;
mod glob;

pub use evaluator::{effective_weight, evaluate, EvaluationOutcome};
pub use glob::glob_match;

pub use crate::apikey::ApiKeyVerdict;

use crate::apikey::{ApiKeyValidator, ApiKeyVerdict};
use bot_protocol::{ApiKeyConfig, DetectionPolicy, PathMapping};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

/// Registered policies and path mappings, addressable by name. Interior `RwLock` because registration
/// happens rarely (admin reload) relative to lookups.
#[derive(Clone)]
pub struct PolicyRegistry {
    policies: Arc<RwLock<BTreeMap<String, DetectionPolicy>>>,
    path_mappings: Arc<RwLock<Vec<PathMapping>>>,
    api_keys: Arc<RwLock<BTreeMap<String, ApiKeyConfig>>>,
    key_validator: Arc<ApiKeyValidator>,
    default_policy_name: String,
    static_policy_name: String,
    static_asset_extensions: Vec<String>,
    static_path_globs: Vec<String>,
}

impl PolicyRegistry {
    pub fn new(config: &crate::config::Config) -> Self {
        let mut policies = BTreeMap::new();
        for policy in builtins::built_in_policies() {
            policies.insert(policy.name.clone(), policy);
        }

        let registry = Self {
            policies: Arc::new(RwLock::new(policies)),
            path_mappings: Arc::new(RwLock::new(Vec::new())),
            api_keys: Arc::new(RwLock::new(BTreeMap::new())),
            key_validator: Arc::new(ApiKeyValidator::new()),
            default_policy_name: config.default_policy_name.clone(),
            static_policy_name: config.static_policy_name.clone(),
            static_asset_extensions: config.static_asset_extensions.clone(),
            static_path_globs: config.static_path_globs.clone(),
        };

        for glob_pattern in &config.static_path_globs {
            registry.register_path_mapping(PathMapping {
                glob_pattern: glob_pattern.clone(),
                policy_name: config.static_policy_name.clone(),
                is_user_defined: false,
            });
        }

        registry
    }

    pub fn register(&self, policy: DetectionPolicy) {
        self.policies.write().unwrap().insert(policy.name.clone(), policy);
    }

    pub fn remove(&self, name: &str) {
        self.policies.write().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<DetectionPolicy> {
        self.policies.read().unwrap().get(name).cloned()
    }

    pub fn all(&self) -> Vec<DetectionPolicy> {
        self.policies.read().unwrap().values().cloned().collect()
    }

    pub fn register_path_mapping(&self, mapping: PathMapping) {
        self.path_mappings.write().unwrap().push(mapping);
    }

    pub fn register_api_key(&self, config: ApiKeyConfig) {
        self.api_keys.write().unwrap().insert(config.key_name.clone(), config);
    }

    pub fn api_key(&self, key_name: &str) -> Option<ApiKeyConfig> {
        self.api_keys.read().unwrap().get(key_name).cloned()
    }

    /// `true` if `path`'s extension is in the configured static-asset list.
    pub fn is_static_asset(&self, path: &str) -> bool {
        path.rsplit('.')
            .next()
            .map(|ext| self.static_asset_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
            && path.contains('.')
    }

    /// Resolve the effective policy for `path`.
    pub fn resolve_for_path(&self, path: &str) -> DetectionPolicy {
        if self.is_static_asset(path) {
            if let Some(p) = self.get(&self.static_policy_name) {
                return p;
            }
        }

        let mappings = self.path_mappings.read().unwrap();
        let best = mappings
            .iter()
            .filter(|m| glob_match(&m.glob_pattern, path))
            .max_by_key(|m| (m.is_user_defined, m.specificity()));

        if let Some(mapping) = best {
            if let Some(p) = self.get(&mapping.policy_name) {
                return p;
            }
        }

        self.get(&self.default_policy_name)
            .unwrap_or_else(|| builtins::default_policy())
    }

    /// Apply an API-key overlay on top of the path-resolved policy. A disabled or expired key is treated as absent. Scope
    /// violations (time window, path globs) and rate-limit trips are
    /// reported separately via [`PolicyRegistry::resolve_api_key`] so the
    /// orchestrator can fail closed instead of silently falling back.
    pub fn apply_api_key_overlay(&self, base: DetectionPolicy, api_key: Option<&str>, now: chrono::DateTime<chrono::Utc>) -> DetectionPolicy {
        let Some(key) = api_key else { return base };
        let Some(overlay) = self.api_key(key) else { return base };
        if !overlay.enabled {
            return base;
        }
        if let Some(expires) = overlay.expires_at {
            if now > expires {
                return base;
            }
        }

        let effective_base = overlay
            .detection_policy_name
            .as_deref()
            .and_then(|name| self.get(name))
            .unwrap_or(base);

        effective_base.with_overlay(&overlay.key_name, &overlay)
    }

    /// Full API-key validation. Uses constant-time comparison against every
    /// registered key rather than a direct map lookup by the presented
    /// value, so match time does not leak how close a guess was.
    pub fn resolve_api_key(&self, presented: &str, path: &str, now: chrono::DateTime<chrono::Utc>) -> (ApiKeyVerdict, Option<ApiKeyConfig>) {
        let keys = self.api_keys.read().unwrap();
        match self.key_validator.find(presented, keys.values()) {
            Some(matched) => {
                let verdict = self.key_validator.validate(matched, path, now);
                (verdict, Some(matched.clone()))
            }
            None => (ApiKeyVerdict::Absent, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn static_asset_extension_resolves_to_static_policy() {
        let registry = PolicyRegistry::new(&Config::default());
        let resolved = registry.resolve_for_path("/assets/app.js");
        assert_eq!(resolved.name, "static");
    }

    #[test]
    fn unmatched_path_falls_back_to_default() {
        let registry = PolicyRegistry::new(&Config::default());
        let resolved = registry.resolve_for_path("/dashboard");
        assert_eq!(resolved.name, "default");
    }

    #[test]
    fn most_specific_path_mapping_wins() {
        let registry = PolicyRegistry::new(&Config::default());
        registry.register(DetectionPolicy {
            name: "api".to_string(),
            ..builtins::default_policy()
        });
        registry.register_path_mapping(PathMapping {
            glob_pattern: "/api/*".to_string(),
            policy_name: "api".to_string(),
            is_user_defined: true,
        });
        registry.register_path_mapping(PathMapping {
            glob_pattern: "/api/v1/login".to_string(),
            policy_name: "strict".to_string(),
            is_user_defined: true,
        });
        assert_eq!(registry.resolve_for_path("/api/v1/login").name, "strict");
        assert_eq!(registry.resolve_for_path("/api/v1/other").name, "api");
    }

    #[test]
    fn expired_api_key_overlay_is_ignored() {
        let registry = PolicyRegistry::new(&Config::default());
        let now = chrono::Utc::now();
        registry.register_api_key(ApiKeyConfig {
            key_name: "k1".to_string(),
            disabled_detectors: Default::default(),
            weight_overrides: Default::default(),
            detection_policy_name: None,
            action_policy_name: None,
            enabled: true,
            expires_at: Some(now - chrono::Duration::hours(1)),
            allowed_time_window: None,
            path_allow_globs: vec![],
            path_deny_globs: vec![],
            rate_limit_per_minute: None,
            rate_limit_per_hour: None,
        });
        let base = registry.resolve_for_path("/dashboard");
        let effective = registry.apply_api_key_overlay(base.clone(), Some("k1"), now);
        assert_eq!(effective.name, base.name);
    }
}
