//! Inconsistency detector: internal contradictions across
//! headers, TLS fingerprint, and UA family.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::DetectionContribution;

pub struct InconsistencyDetector;

impl InconsistencyDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InconsistencyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for InconsistencyDetector {
    fn name(&self) -> &str {
        "inconsistency"
    }

    fn stage(&self) -> Stage {
        1
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        true
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ua_lower = request.header("user-agent").unwrap_or("").to_ascii_lowercase();
        let mut score: f64 = 0.1;
        let mut reasons = Vec::new();

        let claims_chrome = ua_lower.contains("chrome") && !ua_lower.contains("headlesschrome");
        let claims_mobile = ua_lower.contains("mobile");
        let sec_ch_mobile = request.header("sec-ch-ua-mobile");

        if claims_chrome && request.header("sec-ch-ua").is_none() && request.header("accept-language").is_none() {
            score = score.max(0.5);
            reasons.push("claims Chrome but carries none of its client hints".to_string());
        }

        if let Some(mobile_hint) = sec_ch_mobile {
            let hint_says_mobile = mobile_hint.trim() == "?1";
            if hint_says_mobile != claims_mobile {
                score = score.max(0.6);
                reasons.push("sec-ch-ua-mobile disagrees with UA mobile claim".to_string());
            }
        }

        if ua_lower.contains("windows") && ua_lower.contains("like mac os x") {
            score = score.max(0.8);
            reasons.push("UA claims both Windows and macOS platform tokens".to_string());
        }

        if let Some(fp) = request.tls_fingerprint() {
            // A UA claiming a modern evergreen browser but a TLS
            // fingerprint string containing "unknown"/"bot" is internally
            // contradictory.
            if claims_chrome && fp.to_ascii_lowercase().contains("bot") {
                score = score.max(0.75);
                reasons.push("TLS fingerprint looks automated while UA claims a browser".to_string());
            }
        }

        if reasons.is_empty() {
            reasons.push("no cross-signal contradictions found".to_string());
        }

        evidence(self.name(), score, 1.0, 0.55, reasons)
    }

    fn reads(&self) -> &[&'static str] {
        &["ua.raw", "tls.fingerprint"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    #[tokio::test]
    async fn contradictory_platform_claims_score_high() {
        let detector = InconsistencyDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "203.0.113.1".parse::<IpAddr>().unwrap())
            .with_user_agent("Mozilla/5.0 (Windows NT 10.0; like Mac OS X) Chrome/120");
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence > 0.6);
    }

    #[tokio::test]
    async fn consistent_mobile_hint_scores_low() {
        let detector = InconsistencyDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "203.0.113.1".parse::<IpAddr>().unwrap())
            .with_user_agent("Mozilla/5.0 (Linux; Android 13) Mobile Chrome/120")
            .with_header("sec-ch-ua-mobile", "?1")
            .with_header("sec-ch-ua", "\"Chromium\";v=\"120\"")
            .with_header("accept-language", "en-US");
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence < 0.5);
    }
}
