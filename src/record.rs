//! Stored record schema and conversion to resource records.
//!
//! Each DNS type is a JSON array of items under its own hash field (an object
//! for SOA), e.g. `[{"ttl":300,"ip":"192.0.2.1"}]` in the `A` field.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{DNSResource, DNSResourceData};
use crate::error::{ResolveError, Result};

/// TTL used for synthesized SOA records and stored SOAs without a minimum
pub const MIN_TTL: u32 = 30;

/// Character-string limit of the wire format
const TXT_CHUNK_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpItem {
    #[serde(default, alias = "TTL")]
    pub ttl: u32,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextItem {
    #[serde(alias = "TTL")]
    pub ttl: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostItem {
    #[serde(alias = "TTL")]
    pub ttl: u32,
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MxItem {
    #[serde(alias = "TTL")]
    pub ttl: u32,
    pub host: String,
    pub preference: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrvItem {
    #[serde(alias = "TTL")]
    pub ttl: u32,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaaItem {
    #[serde(alias = "TTL")]
    pub ttl: u32,
    pub flag: u8,
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoaItem {
    pub ns: String,
    #[serde(rename = "Mbox", alias = "mbox")]
    pub mbox: String,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    #[serde(rename = "minTTL", alias = "minttl")]
    pub min_ttl: u32,
}

/// A decoded hash field, one variant per record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSet {
    A(Vec<IpItem>),
    AAAA(Vec<IpItem>),
    CNAME(Vec<HostItem>),
    NS(Vec<HostItem>),
    PTR(Vec<HostItem>),
    TXT(Vec<TextItem>),
    MX(Vec<MxItem>),
    SRV(Vec<SrvItem>),
    CAA(Vec<CaaItem>),
    SOA(SoaItem),
}

impl RecordSet {
    /// Parse a stored value as the schema for `rtype`.
    pub fn decode(raw: &str, rtype: DNSResourceType) -> Result<Self> {
        let set = match rtype {
            DNSResourceType::A => {
                let items: Vec<IpItem> = serde_json::from_str(raw)?;
                if let Some(item) = items.iter().find(|i| !i.ip.is_ipv4()) {
                    return Err(ResolveError::Decode(format!(
                        "{} is not an IPv4 address",
                        item.ip
                    )));
                }
                RecordSet::A(items)
            }
            DNSResourceType::AAAA => RecordSet::AAAA(serde_json::from_str(raw)?),
            DNSResourceType::CNAME => RecordSet::CNAME(serde_json::from_str(raw)?),
            DNSResourceType::NS => RecordSet::NS(serde_json::from_str(raw)?),
            DNSResourceType::PTR => RecordSet::PTR(serde_json::from_str(raw)?),
            DNSResourceType::TXT => RecordSet::TXT(serde_json::from_str(raw)?),
            DNSResourceType::MX => RecordSet::MX(serde_json::from_str(raw)?),
            DNSResourceType::SRV => RecordSet::SRV(serde_json::from_str(raw)?),
            DNSResourceType::CAA => RecordSet::CAA(serde_json::from_str(raw)?),
            DNSResourceType::SOA => RecordSet::SOA(serde_json::from_str(raw)?),
            other => {
                return Err(ResolveError::Decode(format!(
                    "no stored schema for type {}",
                    other
                )));
            }
        };
        Ok(set)
    }

    /// Convert every item into a resource record owned by `owner`, in stored order.
    pub fn into_resources(self, owner: &str) -> Vec<DNSResource> {
        match self {
            RecordSet::A(items) => items.iter().filter_map(|i| i.to_a(owner)).collect(),
            RecordSet::AAAA(items) => items.iter().map(|i| i.to_aaaa(owner)).collect(),
            RecordSet::CNAME(items) => items.iter().map(|i| i.to_cname(owner)).collect(),
            RecordSet::NS(items) => items.iter().map(|i| i.to_ns(owner)).collect(),
            RecordSet::PTR(items) => items.iter().map(|i| i.to_ptr(owner)).collect(),
            RecordSet::TXT(items) => items.iter().map(|i| i.to_txt(owner)).collect(),
            RecordSet::MX(items) => items.iter().map(|i| i.to_mx(owner)).collect(),
            RecordSet::SRV(items) => items.iter().map(|i| i.to_srv(owner)).collect(),
            RecordSet::CAA(items) => items.iter().map(|i| i.to_caa(owner)).collect(),
            RecordSet::SOA(item) => vec![item.to_soa(owner, soa_serial())],
        }
    }
}

impl IpItem {
    /// `None` for an IPv6 address; `RecordSet::decode` rejects those for A.
    pub fn to_a(&self, owner: &str) -> Option<DNSResource> {
        match self.ip {
            IpAddr::V4(addr) => Some(DNSResource::new(owner, self.ttl, DNSResourceData::A(addr))),
            IpAddr::V6(_) => None,
        }
    }

    /// IPv4 addresses are served in their IPv4-mapped form.
    pub fn to_aaaa(&self, owner: &str) -> DNSResource {
        let addr = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        DNSResource::new(owner, self.ttl, DNSResourceData::AAAA(addr))
    }
}

impl TextItem {
    pub fn to_txt(&self, owner: &str) -> DNSResource {
        DNSResource::new(owner, self.ttl, DNSResourceData::TXT(split_text(&self.text)))
    }
}

impl HostItem {
    pub fn target(&self) -> String {
        fqdn(&self.host)
    }

    pub fn to_cname(&self, owner: &str) -> DNSResource {
        DNSResource::new(owner, self.ttl, DNSResourceData::CNAME(self.target()))
    }

    pub fn to_ns(&self, owner: &str) -> DNSResource {
        DNSResource::new(owner, self.ttl, DNSResourceData::NS(self.target()))
    }

    pub fn to_ptr(&self, owner: &str) -> DNSResource {
        DNSResource::new(owner, self.ttl, DNSResourceData::PTR(self.target()))
    }
}

impl MxItem {
    pub fn to_mx(&self, owner: &str) -> DNSResource {
        DNSResource::new(
            owner,
            self.ttl,
            DNSResourceData::MX {
                preference: self.preference,
                exchange: fqdn(&self.host),
            },
        )
    }
}

impl SrvItem {
    pub fn to_srv(&self, owner: &str) -> DNSResource {
        DNSResource::new(
            owner,
            self.ttl,
            DNSResourceData::SRV {
                priority: self.priority,
                weight: self.weight,
                port: self.port,
                target: fqdn(&self.target),
            },
        )
    }
}

impl CaaItem {
    pub fn to_caa(&self, owner: &str) -> DNSResource {
        DNSResource::new(
            owner,
            self.ttl,
            DNSResourceData::CAA {
                flag: self.flag,
                tag: self.tag.clone(),
                value: self.value.clone(),
            },
        )
    }
}

impl SoaItem {
    /// Default SOA for `zone` when none is stored
    pub fn synthesized(zone: &str) -> Self {
        Self {
            ns: format!("ns.dns.{}", zone),
            mbox: format!("hostmaster.{}", zone),
            refresh: 7200,
            retry: 1800,
            expire: 86400,
            min_ttl: MIN_TTL,
        }
    }

    /// The record TTL is the SOA minimum, or `MIN_TTL` when that is zero.
    pub fn to_soa(&self, owner: &str, serial: u32) -> DNSResource {
        let ttl = if self.min_ttl == 0 { MIN_TTL } else { self.min_ttl };
        DNSResource::new(
            owner,
            ttl,
            DNSResourceData::SOA {
                mname: fqdn(&self.ns),
                rname: fqdn(&self.mbox),
                serial,
                refresh: self.refresh,
                retry: self.retry,
                expire: self.expire,
                minimum: self.min_ttl,
            },
        )
    }
}

/// Serial stamped on every SOA we hand out: the current unix time.
pub fn soa_serial() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

/// Split text into character-strings of at most 255 bytes, never inside a
/// UTF-8 sequence.
pub fn split_text(text: &str) -> Vec<String> {
    if text.len() <= TXT_CHUNK_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::with_capacity(text.len() / TXT_CHUNK_LEN + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(TXT_CHUNK_LEN);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk.to_string());
        rest = tail;
    }
    chunks
}

/// Append the root dot if missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}
