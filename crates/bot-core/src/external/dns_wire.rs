//! Minimal hand-rolled DNS wire format (RFC 1035 header + single question),
//! shared by the ASN (TXT) and FCrDNS (PTR/A) lookups.
//!
//! This is intentionally not a full resolver: one question per query, no
//! EDNS0, no TCP fallback. Good enough for the TXT/PTR/A record types this
//! kernel's lookups need.

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QType {
    A = 1,
    Ptr = 12,
    Txt = 16,
}

#[derive(Debug, Clone)]
pub enum RData {
    A(Ipv4Addr),
    Txt(String),
    Ptr(String),
    Other,
}

pub async fn query(resolver: &str, qname: &str, qtype: QType, timeout_ms: u64) -> std::io::Result<Vec<RData>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(resolver).await?;

    let id: u16 = rand::random();
    let packet = build_query(id, qname, qtype);
    socket.send(&packet).await?;

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_millis(timeout_ms), socket.recv(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dns query timed out"))??;

    Ok(parse_response(&buf[..n], qtype))
}

fn build_query(id: u16, qname: &str, qtype: QType) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&id.to_be_bytes());
    // flags: recursion desired
    packet.extend_from_slice(&0x0100u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&0u16.to_be_bytes()); // ancount
    packet.extend_from_slice(&0u16.to_be_bytes()); // nscount
    packet.extend_from_slice(&0u16.to_be_bytes()); // arcount

    for label in qname.trim_end_matches('.').split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&(qtype as u16).to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // class IN
    packet
}

/// Build the reversed-octet PTR name for an IPv4 address, e.g.
/// `1.0.168.192.in-addr.arpa` for `192.168.0.1`.
pub fn ptr_name(ip: Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
}

/// Team-Cymru reverse-octet origin query name, e.g. `1.0.168.192.origin.asn.cymru.com`.
pub fn cymru_origin_name(ip: Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}.origin.asn.cymru.com", o[3], o[2], o[1], o[0])
}

pub fn normalize_ip(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

fn parse_response(buf: &[u8], qtype: QType) -> Vec<RData> {
    if buf.len() < 12 {
        return Vec::new();
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;

    let mut pos = 12;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos);
        pos += 4; // qtype + qclass
    }

    let mut out = Vec::new();
    for _ in 0..ancount {
        if pos >= buf.len() {
            break;
        }
        pos = skip_name(buf, pos);
        if pos + 10 > buf.len() {
            break;
        }
        let rtype = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        let rdlength = u16::from_be_bytes([buf[pos + 8], buf[pos + 9]]) as usize;
        pos += 10;
        if pos + rdlength > buf.len() {
            break;
        }
        let rdata = &buf[pos..pos + rdlength];

        match (qtype, rtype) {
            (QType::A, 1) if rdata.len() == 4 => {
                out.push(RData::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])));
            }
            (QType::Txt, 16) => {
                out.push(RData::Txt(decode_txt(rdata)));
            }
            (QType::Ptr, 12) => {
                out.push(RData::Ptr(decode_name(buf, pos)));
            }
            _ => out.push(RData::Other),
        }
        pos += rdlength;
    }
    out
}

fn skip_name(buf: &[u8], mut pos: usize) -> usize {
    while pos < buf.len() {
        let len = buf[pos] as usize;
        if len == 0 {
            return pos + 1;
        }
        if len & 0xc0 == 0xc0 {
            return pos + 2;
        }
        pos += 1 + len;
    }
    pos
}

fn decode_txt(rdata: &[u8]) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while pos < rdata.len() {
        let len = rdata[pos] as usize;
        pos += 1;
        if pos + len > rdata.len() {
            break;
        }
        out.push_str(&String::from_utf8_lossy(&rdata[pos..pos + len]));
        pos += len;
    }
    out
}

/// Decode a (possibly compressed) domain name starting at `pos` in the full
/// packet buffer.
fn decode_name(buf: &[u8], mut pos: usize) -> String {
    let mut labels = Vec::new();
    let mut jumps = 0;
    loop {
        if pos >= buf.len() || jumps > 16 {
            break;
        }
        let len = buf[pos] as usize;
        if len == 0 {
            break;
        }
        if len & 0xc0 == 0xc0 {
            if pos + 1 >= buf.len() {
                break;
            }
            let offset = (((len & 0x3f) as usize) << 8) | buf[pos + 1] as usize;
            pos = offset;
            jumps += 1;
            continue;
        }
        pos += 1;
        if pos + len > buf.len() {
            break;
        }
        labels.push(String::from_utf8_lossy(&buf[pos..pos + len]).to_string());
        pos += len;
    }
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_name_reverses_octets() {
        assert_eq!(ptr_name("192.168.0.1".parse().unwrap()), "1.0.168.192.in-addr.arpa");
    }

    #[test]
    fn cymru_origin_name_format() {
        assert_eq!(
            cymru_origin_name("8.8.8.8".parse().unwrap()),
            "8.8.8.8.origin.asn.cymru.com"
        );
    }

    #[test]
    fn build_query_includes_question_count() {
        let packet = build_query(42, "example.com", QType::A);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), 42);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 1);
    }
}
