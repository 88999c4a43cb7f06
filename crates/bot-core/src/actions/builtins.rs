//! Built-in action policies: block/block-hard/block-soft,
//! throttle/throttle-stealth, challenge/challenge-captcha,
//! redirect/redirect-honeypot/redirect-tarpit, logonly, shadow. Each is a
//! small `impl IntoResponse`-shaped handler function adapted to the
//! `execute(...) -> ResponseDirective` contract.

use super::{render_template, Action, ActionContext};
use crate::capabilities::CancellationToken;
use crate::request::{RequestView, ResponseDirective};
use async_trait::async_trait;
use std::sync::Arc;

/// Terminates the pipeline with a fixed status and a `description` body.
struct BlockAction {
    name: &'static str,
    status: u16,
}

#[async_trait]
impl Action for BlockAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _request: &dyn RequestView, context: &ActionContext, _cancellation: &CancellationToken) -> ResponseDirective {
        let mut directive = ResponseDirective::with_status(self.status);
        directive.body = Some(
            format!(
                "{{\"blocked\":true,\"risk\":{:.3},\"band\":\"{}\",\"policy\":\"{}\"}}",
                context.risk,
                context.risk_band.as_str(),
                context.policy_name
            )
            .into_bytes(),
        );
        directive.headers.push(("content-type".to_string(), "application/json".to_string()));
        directive
    }
}

/// Slows the request down instead of rejecting it outright. `stealth` omits the `retry-after` header
/// so the client can't easily detect it's being throttled.
struct ThrottleAction {
    name: &'static str,
    stealth: bool,
}

#[async_trait]
impl Action for ThrottleAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _request: &dyn RequestView, context: &ActionContext, cancellation: &CancellationToken) -> ResponseDirective {
        let delay_ms = (200.0 + context.risk * 2_000.0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
            _ = cancellation.cancelled() => {}
        }
        let mut directive = ResponseDirective::allow();
        if !self.stealth {
            directive.headers.push(("retry-after".to_string(), "1".to_string()));
        }
        directive
    }
}

/// Returns a challenge response instead of continuing.
struct ChallengeAction {
    name: &'static str,
    captcha: bool,
}

#[async_trait]
impl Action for ChallengeAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _request: &dyn RequestView, context: &ActionContext, _cancellation: &CancellationToken) -> ResponseDirective {
        let mut directive = ResponseDirective::with_status(403);
        let kind = if self.captcha { "captcha" } else { "proof-of-work" };
        directive.body = Some(format!("{{\"challenge\":\"{kind}\",\"risk\":{:.3}}}", context.risk).into_bytes());
        directive.headers.push(("content-type".to_string(), "application/json".to_string()));
        directive
    }
}

/// The kind of redirect to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Permanent,
    Temporary,
}

impl RedirectKind {
    fn status(self) -> u16 {
        match self {
            RedirectKind::Permanent => 301,
            RedirectKind::Temporary => 302,
        }
    }
}

/// Redirects the caller, optionally preserving the query string and/or
/// injecting a return-URL parameter, with `{risk}`/`{riskBand}`/`{policy}`/
/// `{originalPath}` template placeholders in the target.
pub struct RedirectAction {
    name: &'static str,
    kind: RedirectKind,
    target_template: String,
    preserve_query_string: bool,
    return_url_param: Option<String>,
}

impl RedirectAction {
    pub fn new(name: &'static str, kind: RedirectKind, target_template: impl Into<String>) -> Self {
        Self {
            name,
            kind,
            target_template: target_template.into(),
            preserve_query_string: false,
            return_url_param: None,
        }
    }

    pub fn preserving_query_string(mut self) -> Self {
        self.preserve_query_string = true;
        self
    }

    pub fn with_return_url_param(mut self, param: impl Into<String>) -> Self {
        self.return_url_param = Some(param.into());
        self
    }
}

#[async_trait]
impl Action for RedirectAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, request: &dyn RequestView, context: &ActionContext, _cancellation: &CancellationToken) -> ResponseDirective {
        let mut target = render_template(&self.target_template, request, context);

        if self.preserve_query_string {
            if let Some(qs) = request.query_string() {
                if !qs.is_empty() {
                    let sep = if target.contains('?') { '&' } else { '?' };
                    target = format!("{target}{sep}{qs}");
                }
            }
        }

        if let Some(param) = &self.return_url_param {
            let sep = if target.contains('?') { '&' } else { '?' };
            target = format!("{target}{sep}{param}={}", urlencode(request.path()));
        }

        let mut directive = ResponseDirective::with_status(self.kind.status());
        directive.redirect_to = Some(target);
        directive
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Continues the pipeline unchanged but records what would have happened.
/// `shadow` additionally tags the
/// directive so a caller can tell it was a would-be-blocking verdict that
/// was allowed through for observation.
struct LogOnlyAction {
    name: &'static str,
    shadow: bool,
}

#[async_trait]
impl Action for LogOnlyAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _request: &dyn RequestView, context: &ActionContext, _cancellation: &CancellationToken) -> ResponseDirective {
        let mut directive = ResponseDirective::allow();
        if self.shadow {
            directive
                .headers
                .push(("x-bot-shadow-verdict".to_string(), format!("{:.3}/{}", context.risk, context.risk_band.as_str())));
        }
        directive
    }
}

pub fn built_in_actions() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(BlockAction { name: "block", status: 403 }),
        Arc::new(BlockAction { name: "block-hard", status: 403 }),
        Arc::new(BlockAction { name: "block-soft", status: 429 }),
        Arc::new(ThrottleAction { name: "throttle", stealth: false }),
        Arc::new(ThrottleAction {
            name: "throttle-stealth",
            stealth: true,
        }),
        Arc::new(ChallengeAction { name: "challenge", captcha: false }),
        Arc::new(ChallengeAction {
            name: "challenge-captcha",
            captcha: true,
        }),
        Arc::new(RedirectAction::new("redirect", RedirectKind::Temporary, "/blocked?risk={risk}")),
        Arc::new(RedirectAction::new("redirect-honeypot", RedirectKind::Temporary, "/__hp/{riskBand}").preserving_query_string()),
        Arc::new(RedirectAction::new("redirect-tarpit", RedirectKind::Temporary, "/__tarpit{originalPath}")),
        Arc::new(LogOnlyAction { name: "logonly", shadow: false }),
        Arc::new(LogOnlyAction { name: "shadow", shadow: true }),
    ]
}
