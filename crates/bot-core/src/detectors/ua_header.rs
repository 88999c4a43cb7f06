//! UA/header shape detector: heuristics over the
//! User-Agent string, header order, and missing/forbidden headers.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::DetectionContribution;

const KNOWN_BOT_TOKENS: &[&str] = &[
    "bot", "crawl", "spider", "scrape", "curl", "wget", "python-requests", "go-http-client",
    "headlesschrome", "phantomjs", "httpclient",
];

const EXPECTED_BROWSER_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

pub struct UaHeaderDetector;

impl UaHeaderDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UaHeaderDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for UaHeaderDetector {
    fn name(&self) -> &str {
        "ua_header_shape"
    }

    fn stage(&self) -> Stage {
        0
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        true
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ua = request.header("user-agent").unwrap_or("");
        let ua_lower = ua.to_ascii_lowercase();
        let mut reasons = Vec::new();
        let mut score: f64 = 0.0;

        if ua.is_empty() {
            score = score.max(0.75);
            reasons.push("missing user-agent header".to_string());
        } else if KNOWN_BOT_TOKENS.iter().any(|t| ua_lower.contains(t)) {
            score = score.max(0.6);
            reasons.push("user-agent contains a known bot/tool token".to_string());
        }

        let missing: Vec<&str> = EXPECTED_BROWSER_HEADERS
            .iter()
            .filter(|h| request.header(h).is_none())
            .copied()
            .collect();
        if !missing.is_empty() && !ua.is_empty() {
            let fraction = missing.len() as f64 / EXPECTED_BROWSER_HEADERS.len() as f64;
            score = score.max(0.2 + 0.5 * fraction);
            reasons.push(format!("missing expected headers: {}", missing.join(", ")));
        }

        if request.header_names().len() <= 2 {
            score = score.max(0.5);
            reasons.push("unusually few headers present".to_string());
        }

        if reasons.is_empty() {
            evidence(self.name(), 0.1, 1.0, 0.6, vec!["browser-shaped headers".to_string()])
        } else {
            evidence(self.name(), score, 1.0, 0.7, reasons)
        }
    }

    fn reads(&self) -> &[&'static str] {
        &[]
    }

    fn writes(&self) -> &[&'static str] {
        &["ua.raw", "ua.is_known_bot_token", "ua.header_count"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    fn ip() -> IpAddr {
        "203.0.113.5".parse().unwrap()
    }

    #[tokio::test]
    async fn curl_user_agent_scores_high() {
        let detector = UaHeaderDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", ip()).with_user_agent("curl/8.4.0");
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence >= 0.5, "{:?}", contribution);
    }

    #[tokio::test]
    async fn full_browser_headers_score_low() {
        let detector = UaHeaderDetector::new();
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", ip())
            .with_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0")
            .with_header("accept", "text/html")
            .with_header("accept-language", "en-US")
            .with_header("accept-encoding", "gzip");
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.bot_evidence < 0.3, "{:?}", contribution);
    }
}
