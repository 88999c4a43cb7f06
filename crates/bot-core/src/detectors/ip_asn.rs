//! IP/ASN detector: datacenter vs residential, ASN reputation,
//! whitelist/blacklist. The compiled pattern cache (whitelist/blacklist/
//! datacenter CIDR ranges) is an injected capability rather than an
//! in-process MaxMind reader, since that data is a collaborator concern.
//! ASN reputation and Project Honeypot HTTP:BL are likewise injected
//! rather than called directly, so a detector timeout bounds the DNS
//! round trip the same way it bounds everything else in the wave.

use super::{evidence, Detector, Stage};
use crate::blackboard::Blackboard;
use crate::capabilities::CompiledPatternCache;
use crate::external::asn::AsnLookup;
use crate::external::honeypot::HoneypotLookup;
use crate::request::RequestView;
use async_trait::async_trait;
use bot_protocol::{DetectionContribution, EarlyExitVerdict};
use std::sync::Arc;

pub struct IpAsnDetector {
    patterns: Option<Arc<dyn CompiledPatternCache>>,
    asn_lookup: Option<Arc<dyn AsnLookup>>,
    honeypot_lookup: Option<Arc<dyn HoneypotLookup>>,
}

impl IpAsnDetector {
    pub fn new() -> Self {
        Self {
            patterns: None,
            asn_lookup: None,
            honeypot_lookup: None,
        }
    }

    pub fn with_patterns(patterns: Arc<dyn CompiledPatternCache>) -> Self {
        Self {
            patterns: Some(patterns),
            asn_lookup: None,
            honeypot_lookup: None,
        }
    }

    pub fn with_capabilities(
        patterns: Arc<dyn CompiledPatternCache>,
        asn_lookup: Arc<dyn AsnLookup>,
        honeypot_lookup: Arc<dyn HoneypotLookup>,
    ) -> Self {
        Self {
            patterns: Some(patterns),
            asn_lookup: Some(asn_lookup),
            honeypot_lookup: Some(honeypot_lookup),
        }
    }
}

impl Default for IpAsnDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for IpAsnDetector {
    fn name(&self) -> &str {
        "ip_asn"
    }

    fn stage(&self) -> Stage {
        0
    }

    fn trigger(&self, _blackboard: &Blackboard, _request: &dyn RequestView) -> bool {
        true
    }

    async fn run(&self, _blackboard: &Blackboard, request: &dyn RequestView) -> DetectionContribution {
        let ip = request.remote_ip();

        if let Some(patterns) = &self.patterns {
            if patterns.is_blacklisted(ip) {
                let mut contribution = evidence(self.name(), 1.0, 1.0, 1.0, vec!["IP on blacklist".to_string()]);
                contribution.trigger_early_exit = true;
                contribution.early_exit_verdict = Some(EarlyExitVerdict::Blacklisted);
                return contribution;
            }
            if patterns.is_whitelisted(ip) {
                let mut contribution = evidence(self.name(), 0.0, 1.0, 1.0, vec!["IP on whitelist".to_string()]);
                contribution.trigger_early_exit = true;
                contribution.early_exit_verdict = Some(EarlyExitVerdict::Whitelisted);
                return contribution;
            }
        }

        if let Some(honeypot) = &self.honeypot_lookup {
            if let Some(verdict) = honeypot.lookup(ip).await {
                if verdict.is_suspicious_or_harvester() {
                    let mut contribution = evidence(
                        self.name(),
                        0.95,
                        1.0,
                        0.9,
                        vec!["IP listed on Project Honeypot HTTP:BL as a suspicious harvester".to_string()],
                    );
                    contribution.trigger_early_exit = true;
                    contribution.early_exit_verdict = Some(EarlyExitVerdict::Blacklisted);
                    return contribution;
                }
                if verdict.is_comment_spammer() {
                    return evidence(
                        self.name(),
                        0.8,
                        1.0,
                        0.8,
                        vec!["IP listed on Project Honeypot HTTP:BL as a comment spammer".to_string()],
                    );
                }
            }
        }

        let is_datacenter = self
            .patterns
            .as_ref()
            .map(|p| p.is_datacenter(ip))
            .unwrap_or(false);

        let asn_record = match &self.asn_lookup {
            Some(lookup) => lookup.lookup(ip).await,
            None => None,
        };

        let mut reasons = Vec::new();
        let mut bot_evidence = if is_datacenter { 0.65 } else { 0.15 };
        reasons.push(if is_datacenter {
            "remote IP resolves to a datacenter/hosting ASN".to_string()
        } else {
            "residential-looking IP".to_string()
        });

        if let Some(record) = &asn_record {
            if let Some(org) = &record.org_name {
                reasons.push(format!("ASN {} ({org})", record.asn));
            } else {
                reasons.push(format!("ASN {}", record.asn));
            }
        }

        let confidence = if is_datacenter { 0.7 } else { 0.5 };
        bot_evidence = bot_evidence.clamp(0.0, 1.0);
        evidence(self.name(), bot_evidence, 1.0, confidence, reasons)
    }

    fn writes(&self) -> &[&'static str] {
        &["ip.is_datacenter", "ip.asn", "geo.country_code"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StaticRequestView;
    use std::net::IpAddr;

    struct FixedPatterns {
        datacenter: bool,
        blacklisted: bool,
        whitelisted: bool,
    }

    impl CompiledPatternCache for FixedPatterns {
        fn is_whitelisted(&self, _ip: IpAddr) -> bool {
            self.whitelisted
        }
        fn is_blacklisted(&self, _ip: IpAddr) -> bool {
            self.blacklisted
        }
        fn is_datacenter(&self, _ip: IpAddr) -> bool {
            self.datacenter
        }
        fn verified_bot_ranges(&self, _ua_family: &str) -> Vec<ipnet::IpNet> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn blacklisted_ip_early_exits() {
        let detector = IpAsnDetector::with_patterns(Arc::new(FixedPatterns {
            datacenter: false,
            blacklisted: true,
            whitelisted: false,
        }));
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "198.51.100.1".parse::<IpAddr>().unwrap());
        let contribution = detector.run(&bb, &req).await;
        assert!(contribution.trigger_early_exit);
        assert_eq!(contribution.early_exit_verdict, Some(EarlyExitVerdict::Blacklisted));
    }

    #[tokio::test]
    async fn datacenter_ip_without_list_hit_scores_moderate() {
        let detector = IpAsnDetector::with_patterns(Arc::new(FixedPatterns {
            datacenter: true,
            blacklisted: false,
            whitelisted: false,
        }));
        let bb = Blackboard::new();
        let req = StaticRequestView::get("/", "198.51.100.1".parse::<IpAddr>().unwrap());
        let contribution = detector.run(&bb, &req).await;
        assert!(!contribution.trigger_early_exit);
        assert!(contribution.bot_evidence > 0.5);
    }
}
