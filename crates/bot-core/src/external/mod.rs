//! DNS/external query clients: verified-bot IP range
//! fetch, FCrDNS, ASN lookup (Team-Cymru-style), and Project Honeypot
//! HTTP:BL. All are collaborators the kernel calls through narrow
//! capability traits — the concrete clients here are reference
//! implementations, not mandatory.
//!
//! Each maintains two TTLs, a long "positive" one and a short "negative"
//! one, via `moka`.

pub mod asn;
pub mod botlist;
pub mod dns_wire;
pub mod fcrdns;
pub mod honeypot;

pub use asn::{AsnLookup, AsnRecord, CymruAsnLookup};
pub use botlist::{BotListFetcher, HttpBotListFetcher, VerifiedBotRanges};
pub use fcrdns::{DnsFcrdnsVerifier, FcrdnsVerifier};
pub use honeypot::{HoneypotLookup, HoneypotVerdict, HttpBlHoneypotLookup};
