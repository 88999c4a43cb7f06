//! ASN lookup: reverse-octet query against
//! `origin.asn.cymru.com` TXT, then `peer.asn.cymru.com` TXT for the org
//! name, over a manual UDP DNS query with Google DNS (`8.8.8.8`) as the
//! fallback resolver.

use super::dns_wire::{self, QType, RData};
use async_trait::async_trait;
use moka::future::Cache;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct AsnRecord {
    pub asn: String,
    pub prefix: String,
    pub country_code: String,
    pub registry: String,
    pub allocated: String,
    pub org_name: Option<String>,
}

#[async_trait]
pub trait AsnLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Option<AsnRecord>;
}

pub struct CymruAsnLookup {
    resolver: String,
    timeout_ms: u64,
    verified_cache: Cache<IpAddr, AsnRecord>,
    failed_cache: Cache<IpAddr, ()>,
}

impl CymruAsnLookup {
    pub fn new(resolver: impl Into<String>, timeout_ms: u64, verified_ttl_hours: u64, failed_ttl_hours: u64, max_entries: u64) -> Self {
        Self {
            resolver: resolver.into(),
            timeout_ms,
            verified_cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(verified_ttl_hours * 3600))
                .build(),
            failed_cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(failed_ttl_hours * 3600))
                .build(),
        }
    }

    async fn resolve(&self, ip: IpAddr) -> Option<AsnRecord> {
        let v4 = dns_wire::normalize_ip(ip)?;
        let name = dns_wire::cymru_origin_name(v4);
        let results = dns_wire::query(&self.resolver, &name, QType::Txt, self.timeout_ms).await.ok()?;
        let raw = results.into_iter().find_map(|r| match r {
            RData::Txt(s) => Some(s),
            _ => None,
        })?;

        // "ASN | prefix | CC | registry | date"
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        if parts.len() < 5 {
            return None;
        }
        let asn = parts[0].to_string();

        let peer_name = format!("AS{asn}.peer.asn.cymru.com");
        let org_name = dns_wire::query(&self.resolver, &peer_name, QType::Txt, self.timeout_ms)
            .await
            .ok()
            .and_then(|records| {
                records.into_iter().find_map(|r| match r {
                    RData::Txt(s) => s.split('|').nth(4).map(|n| n.trim().to_string()),
                    _ => None,
                })
            });

        Some(AsnRecord {
            asn,
            prefix: parts[1].to_string(),
            country_code: parts[2].to_string(),
            registry: parts[3].to_string(),
            allocated: parts[4].to_string(),
            org_name,
        })
    }
}

#[async_trait]
impl AsnLookup for CymruAsnLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<AsnRecord> {
        if let Some(hit) = self.verified_cache.get(&ip).await {
            return Some(hit);
        }
        if self.failed_cache.get(&ip).await.is_some() {
            return None;
        }
        match self.resolve(ip).await {
            Some(record) => {
                self.verified_cache.insert(ip, record.clone()).await;
                Some(record)
            }
            None => {
                self.failed_cache.insert(ip, ()).await;
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullAsnLookup;

#[async_trait]
impl AsnLookup for NullAsnLookup {
    async fn lookup(&self, _ip: IpAddr) -> Option<AsnRecord> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_lookup_returns_none() {
        assert!(NullAsnLookup.lookup("8.8.8.8".parse().unwrap()).await.is_none());
    }
}
