//! Project Honeypot HTTP:BL lookup: `{key}.{reversed-ipv4}.
//! dnsbl.httpbl.org` A-record; first octet must be 127; remaining octets
//! encode `days since last activity, threat score, visitor type bitfield`.

use super::dns_wire::{self, QType, RData};
use async_trait::async_trait;
use moka::future::Cache;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoneypotVerdict {
    pub days_since_last_activity: u8,
    pub threat_score: u8,
    pub visitor_type_bits: u8,
}

impl HoneypotVerdict {
    pub fn is_suspicious_or_harvester(&self) -> bool {
        self.visitor_type_bits & 0b0000_0110 != 0
    }

    pub fn is_comment_spammer(&self) -> bool {
        self.visitor_type_bits & 0b0000_1000 != 0
    }
}

#[async_trait]
pub trait HoneypotLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Option<HoneypotVerdict>;
}

pub struct HttpBlHoneypotLookup {
    resolver: String,
    access_key: String,
    timeout_ms: u64,
    verified_cache: Cache<IpAddr, HoneypotVerdict>,
    failed_cache: Cache<IpAddr, ()>,
}

impl HttpBlHoneypotLookup {
    pub fn new(
        resolver: impl Into<String>,
        access_key: impl Into<String>,
        timeout_ms: u64,
        verified_ttl_hours: u64,
        failed_ttl_hours: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            resolver: resolver.into(),
            access_key: access_key.into(),
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

    fn query_name(&self, ip: Ipv4Addr) -> String {
        let o = ip.octets();
        format!("{}.{}.{}.{}.{}.dnsbl.httpbl.org", self.access_key, o[3], o[2], o[1], o[0])
    }

    async fn resolve(&self, ip: IpAddr) -> Option<HoneypotVerdict> {
        let v4 = dns_wire::normalize_ip(ip)?;
        let name = self.query_name(v4);
        let results = dns_wire::query(&self.resolver, &name, QType::A, self.timeout_ms).await.ok()?;
        let addr = results.into_iter().find_map(|r| match r {
            RData::A(a) => Some(a),
            _ => None,
        })?;
        let o = addr.octets();
        if o[0] != 127 {
            return None;
        }
        Some(HoneypotVerdict {
            days_since_last_activity: o[1],
            threat_score: o[2],
            visitor_type_bits: o[3],
        })
    }
}

#[async_trait]
impl HoneypotLookup for HttpBlHoneypotLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<HoneypotVerdict> {
        if let Some(hit) = self.verified_cache.get(&ip).await {
            return Some(hit);
        }
        if self.failed_cache.get(&ip).await.is_some() {
            return None;
        }
        match self.resolve(ip).await {
            Some(verdict) => {
                self.verified_cache.insert(ip, verdict).await;
                Some(verdict)
            }
            None => {
                self.failed_cache.insert(ip, ()).await;
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullHoneypotLookup;

#[async_trait]
impl HoneypotLookup for NullHoneypotLookup {
    async fn lookup(&self, _ip: IpAddr) -> Option<HoneypotVerdict> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_type_bits_decode_harvester() {
        let verdict = HoneypotVerdict {
            days_since_last_activity: 1,
            threat_score: 50,
            visitor_type_bits: 0b0000_0010,
        };
        assert!(verdict.is_suspicious_or_harvester());
        assert!(!verdict.is_comment_spammer());
    }
}
