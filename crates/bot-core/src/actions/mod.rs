//! Action Registry + built-in action policies (C6): what the
//! gateway should actually do with a request once the orchestrator has
//! decided it's risky. Actions are named and registered the same way
//! detectors are.

mod builtins;

pub use builtins::{built_in_actions, RedirectAction, RedirectKind};

use crate::capabilities::CancellationToken;
use crate::request::{RequestView, ResponseDirective};
use async_trait::async_trait;
use bot_protocol::RiskBand;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything an action needs to decide what to do, beyond the raw request.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub risk: f64,
    pub risk_band: RiskBand,
    pub confidence: f64,
    pub policy_name: String,
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &dyn RequestView, context: &ActionContext, cancellation: &CancellationToken) -> ResponseDirective;
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// Registry pre-populated with every built-in action category.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for action in built_in_actions() {
            registry.register(action);
        }
        registry
    }
}

/// Substitutes `{risk}`, `{riskBand}`, `{policy}`, `{originalPath}` into a
/// redirect URL template.
pub(crate) fn render_template(template: &str, request: &dyn RequestView, context: &ActionContext) -> String {
    template
        .replace("{risk}", &format!("{:.2}", context.risk))
        .replace("{riskBand}", context.risk_band.as_str())
        .replace("{policy}", &context.policy_name)
        .replace("{originalPath}", request.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    fn ctx() -> ActionContext {
        ActionContext {
            risk: 0.91,
            risk_band: RiskBand::Critical,
            confidence: 0.8,
            policy_name: "default".to_string(),
            reasons: vec![],
        }
    }

    #[test]
    fn template_substitutes_all_placeholders() {
        let req = StaticRequestView::get("/login", "203.0.113.1".parse::<IpAddr>().unwrap());
        let rendered = render_template("/blocked?risk={risk}&band={riskBand}&policy={policy}&path={originalPath}", &req, &ctx());
        assert_eq!(rendered, "/blocked?risk=0.91&band=critical&policy=default&path=/login");
    }

    #[test]
    fn registry_contains_every_builtin_name() {
        let registry = ActionRegistry::with_builtins();
        for expected in [
            "block",
            "block-hard",
            "block-soft",
            "throttle",
            "throttle-stealth",
            "challenge",
            "challenge-captcha",
            "redirect",
            "redirect-honeypot",
            "redirect-tarpit",
            "logonly",
            "shadow",
        ] {
            assert!(registry.get(expected).is_some(), "missing action {expected}");
        }
    }
}
