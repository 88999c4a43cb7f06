//! Identity hashes used as reputation keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Which identity hash a [`PatternReputationEntry`](crate::PatternReputationEntry)
/// or detector contribution is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    /// Hash of IP + UA.
    Primary,
    /// Hash of the normalized User-Agent string alone.
    Ua,
    /// Hash of the remote IP alone.
    Ip,
    /// Hash of the IP masked to /24 (IPv4) or /48 (IPv6).
    Subnet,
    /// Caller-defined combination of signals not covered above.
    Combined,
}

/// The four stable identity hashes carried by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityVectors {
    pub primary: String,
    pub ua: String,
    pub ip: String,
    pub subnet: String,
}

impl IdentityVectors {
    /// Derive all four identity hashes from a raw UA string and IP address.
    pub fn compute(user_agent: &str, ip: IpAddr) -> Self {
        let ua_norm = normalize_ua(user_agent);
        let ip_str = ip.to_string();
        let subnet_str = subnet_of(ip);

        Self {
            primary: short_hash(&format!("{ip_str}|{ua_norm}")),
            ua: short_hash(&ua_norm),
            ip: short_hash(&ip_str),
            subnet: short_hash(&subnet_str),
        }
    }

    /// Iterate `(kind, hash)` pairs, e.g. for applying reputation feedback
    /// to every identity vector the request carried.
    pub fn iter(&self) -> impl Iterator<Item = (IdentityKind, &str)> {
        [
            (IdentityKind::Primary, self.primary.as_str()),
            (IdentityKind::Ua, self.ua.as_str()),
            (IdentityKind::Ip, self.ip.as_str()),
            (IdentityKind::Subnet, self.subnet.as_str()),
        ]
        .into_iter()
    }

    /// Mask-aware display for zero-PII logging: only the identity hash
    /// leaves this type, never the raw IP/UA, but callers that hold the
    /// raw IP separately can use [`mask_ip`] directly too.
    pub fn for_kind(&self, kind: IdentityKind) -> &str {
        match kind {
            IdentityKind::Primary => &self.primary,
            IdentityKind::Ua => &self.ua,
            IdentityKind::Ip => &self.ip,
            IdentityKind::Subnet => &self.subnet,
            IdentityKind::Combined => &self.primary,
        }
    }
}

fn normalize_ua(ua: &str) -> String {
    ua.trim().to_ascii_lowercase()
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..12])
}

fn subnet_of(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            format!(
                "{:x}:{:x}:{:x}::/48",
                seg[0], seg[1], seg[2]
            )
        }
    }
}

/// Mask an IP address for zero-PII logging: keeps enough structure to be
/// useful (subnet-level) without emitting the full address.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.x", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            format!("{:x}:{:x}:{:x}::/48", seg[0], seg[1], seg[2])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_ip_ua_yields_same_vectors() {
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let a = IdentityVectors::compute("Mozilla/5.0", ip);
        let b = IdentityVectors::compute("Mozilla/5.0", ip);
        assert_eq!(a, b);
    }

    #[test]
    fn ua_case_is_normalized() {
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let a = IdentityVectors::compute("Googlebot", ip);
        let b = IdentityVectors::compute("GOOGLEBOT", ip);
        assert_eq!(a.ua, b.ua);
    }

    #[test]
    fn subnet_masks_ipv4_to_24() {
        let a = IdentityVectors::compute("x", "203.0.113.5".parse().unwrap());
        let b = IdentityVectors::compute("x", "203.0.113.200".parse().unwrap());
        assert_eq!(a.subnet, b.subnet);
        let c = IdentityVectors::compute("x", "203.0.114.5".parse().unwrap());
        assert_ne!(a.subnet, c.subnet);
    }

    #[test]
    fn mask_ip_drops_host_octet() {
        let ip: IpAddr = "198.51.100.42".parse().unwrap();
        assert_eq!(mask_ip(ip), "198.51.100.x");
    }
}
