//! Verified-bot detector: claimed identity via UA + IP-range
//! list + FCrDNS. Early-exits `VerifiedGoodBot` on success; `VerifiedBadBot`
//! on a UA claim with failed verification.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::capabilities::CompiledPatternCache;
use crate::external::fcrdns::FcrdnsVerifier;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::{DetectionContribution, EarlyExitVerdict};
use std::sync::Arc;

/// `(ua_substring, allowed_hostname_suffix)` pairs for claimed-bot
/// identities this detector recognizes.
const KNOWN_CLAIMS: &[(&str, &str)] = &[
    ("googlebot", ".googlebot.com"),
    ("googlebot", ".google.com"),
    ("bingbot", ".search.msn.com"),
    ("duckduckbot", ".duckduckgo.com"),
];

pub struct VerifiedBotDetector {
    patterns: Option<Arc<dyn CompiledPatternCache>>,
    fcrdns: Option<Arc<dyn FcrdnsVerifier>>,
}

impl VerifiedBotDetector {
    pub fn new() -> Self {
        Self {
            patterns: None,
            fcrdns: None,
        }
    }

    pub fn with_capabilities(patterns: Arc<dyn CompiledPatternCache>, fcrdns: Arc<dyn FcrdnsVerifier>) -> Self {
        Self {
            patterns: Some(patterns),
            fcrdns: Some(fcrdns),
        }
    }

    fn claimed_family<'a>(ua_lower: &str, claims: &'a [(&'a str, &'a str)]) -> Option<&'a (&'a str, &'a str)> {
        claims.iter().find(|(token, _)| ua_lower.contains(token))
    }
}

impl Default for VerifiedBotDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for VerifiedBotDetector {
    fn name(&self) -> &str {
        "verified_bot"
    }

    fn stage(&self) -> Stage {
        0
    }

    fn trigger(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> bool {
        request.header("user-agent").is_some()
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ua_lower = request.header("user-agent").unwrap_or("").to_ascii_lowercase();
        let Some((family, allowed_suffix)) = Self::claimed_family(&ua_lower, KNOWN_CLAIMS) else {
            return evidence(self.name(), 0.5, 0.0, 0.0, vec![]);
        };

        let ip = request.remote_ip();
        let range_ok = self
            .patterns
            .as_ref()
            .map(|p| p.verified_bot_ranges(family).iter().any(|net| net.contains(&ip)))
            .unwrap_or(false);

        let fcrdns_ok = match &self.fcrdns {
            Some(verifier) => verifier.verify(ip, &[allowed_suffix]).await,
            None => false,
        };

        if range_ok && fcrdns_ok {
            let mut contribution = evidence(
                self.name(),
                0.0,
                1.0,
                1.0,
                vec![format!("{family} claim verified by IP range and FCrDNS")],
            );
            contribution.trigger_early_exit = true;
            contribution.early_exit_verdict = Some(EarlyExitVerdict::VerifiedGoodBot);
            contribution
        } else {
            let mut contribution = evidence(
                self.name(),
                0.95,
                1.0,
                0.9,
                vec![format!("UA claims {family} but verification failed (range_ok={range_ok}, fcrdns_ok={fcrdns_ok})")],
            );
            contribution.trigger_early_exit = true;
            contribution.early_exit_verdict = Some(EarlyExitVerdict::VerifiedBadBot);
            contribution
        }
    }

    fn reads(&self) -> &[&'static str] {
        &["ua.raw"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    struct FixedFcrdns(bool);

    #[async_trait]
    impl FcrdnsVerifier for FixedFcrdns {
        async fn verify(&self, _ip: IpAddr, _allowed_suffixes: &[&str]) -> bool {
            self.0
        }
    }

    struct RangeOnly(Vec<ipnet::IpNet>);

    impl CompiledPatternCache for RangeOnly {
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
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn verified_claim_allows_via_early_exit() {
        let net: ipnet::IpNet = "66.249.64.0/19".parse().unwrap();
        let detector = VerifiedBotDetector::with_capabilities(Arc::new(RangeOnly(vec![net])), Arc::new(FixedFcrdns(true)));
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "66.249.64.1".parse::<IpAddr>().unwrap()).with_user_agent("Googlebot/2.1");
        let contribution = detector.run(&bb, &req).await;
        assert_eq!(contribution.early_exit_verdict, Some(EarlyExitVerdict::VerifiedGoodBot));
    }

    #[tokio::test]
    async fn unverified_claim_blocks_via_early_exit() {
        let detector = VerifiedBotDetector::with_capabilities(Arc::new(RangeOnly(vec![])), Arc::new(FixedFcrdns(false)));
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "203.0.113.1".parse::<IpAddr>().unwrap()).with_user_agent("Googlebot/2.1");
        let contribution = detector.run(&bb, &req).await;
        assert_eq!(contribution.early_exit_verdict, Some(EarlyExitVerdict::VerifiedBadBot));
    }

    #[tokio::test]
    async fn no_claim_is_neutral() {
        let detector = VerifiedBotDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "203.0.113.1".parse::<IpAddr>().unwrap()).with_user_agent("Mozilla/5.0");
        let contribution = detector.run(&bb, &req).await;
        assert!(!contribution.trigger_early_exit);
        assert!(contribution.is_neutral());
    }
}
