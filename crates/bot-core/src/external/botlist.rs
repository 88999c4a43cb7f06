//! Verified-bot IP range list fetch: periodic fetch from
//! vendor JSON endpoints, parsing `ipv4Prefix`/`ipv6Prefix`/`ipPrefix`
//! fields. Uses `reqwest` as the HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct VerifiedBotRanges {
    /// ua-family -> CIDR ranges.
    pub ranges: BTreeMap<String, Vec<ipnet::IpNet>>,
}

#[async_trait]
pub trait BotListFetcher: Send + Sync {
    async fn fetch(&self, family: &str, url: &str) -> Option<Vec<ipnet::IpNet>>;
}

/// Vendor JSON shape: `{"prefixes": [{"ipv4Prefix": "..."} | {"ipv6Prefix": "..."} | {"ipPrefix": "..."}]}`.
#[derive(Debug, Deserialize)]
struct VendorDocument {
    prefixes: Vec<VendorPrefix>,
}

#[derive(Debug, Deserialize)]
struct VendorPrefix {
    #[serde(rename = "ipv4Prefix")]
    ipv4_prefix: Option<String>,
    #[serde(rename = "ipv6Prefix")]
    ipv6_prefix: Option<String>,
    #[serde(rename = "ipPrefix")]
    ip_prefix: Option<String>,
}

pub struct HttpBotListFetcher {
    client: reqwest::Client,
}

impl HttpBotListFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBotListFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BotListFetcher for HttpBotListFetcher {
    async fn fetch(&self, _family: &str, url: &str) -> Option<Vec<ipnet::IpNet>> {
        let body = self.client.get(url).send().await.ok()?.text().await.ok()?;
        parse_vendor_document(&body)
    }
}

fn parse_vendor_document(body: &str) -> Option<Vec<ipnet::IpNet>> {
    let doc: VendorDocument = serde_json::from_str(body).ok()?;
    let ranges = doc
        .prefixes
        .into_iter()
        .filter_map(|p| p.ipv4_prefix.or(p.ipv6_prefix).or(p.ip_prefix))
        .filter_map(|s| s.parse::<ipnet::IpNet>().ok())
        .collect();
    Some(ranges)
}

/// Fetcher that never resolves anything; used when no vendor URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBotListFetcher;

#[async_trait]
impl BotListFetcher for NullBotListFetcher {
    async fn fetch(&self, _family: &str, _url: &str) -> Option<Vec<ipnet::IpNet>> {
        None
    }
}

pub fn default_fetcher() -> Arc<dyn BotListFetcher> {
    Arc::new(HttpBotListFetcher::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_prefix_fields() {
        let body = r#"{"prefixes":[{"ipv4Prefix":"66.249.64.0/19"},{"ipv6Prefix":"2001:4860:4801::/48"},{"ipPrefix":"203.0.113.0/24"}]}"#;
        let ranges = parse_vendor_document(body).unwrap();
        assert_eq!(ranges.len(), 3);
    }
}
