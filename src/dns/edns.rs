//! EDNS(0) OPT pseudo-record (RFC 6891)

use super::{
    ParseError,
    enums::{DNSResourceClass, DNSResourceType},
    resource::{DNSResource, DNSResourceData},
};

/// Largest payload we advertise, whatever the client offers
pub const MAX_PAYLOAD_SIZE: u16 = 4096;
/// Payload size without EDNS
pub const DEFAULT_PAYLOAD_SIZE: u16 = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOpt {
    pub payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub do_flag: bool,
    /// Option TLVs, kept opaque
    pub options: Vec<u8>,
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self {
            payload_size: MAX_PAYLOAD_SIZE,
            extended_rcode: 0,
            version: 0,
            do_flag: false,
            options: Vec::new(),
        }
    }
}

impl EdnsOpt {
    /// Interpret an OPT record read from the additional section
    pub fn from_resource(resource: &DNSResource) -> Result<Self, ParseError> {
        if resource.rtype != DNSResourceType::OPT || !resource.labels.is_empty() {
            return Err(ParseError::InvalidAdditionalSection);
        }
        let options = match &resource.rdata {
            DNSResourceData::Raw { data, .. } => data.clone(),
            DNSResourceData::Empty => Vec::new(),
            _ => return Err(ParseError::InvalidAdditionalSection),
        };
        Ok(Self {
            payload_size: u16::from(resource.rclass).max(DEFAULT_PAYLOAD_SIZE),
            extended_rcode: (resource.ttl >> 24) as u8,
            version: (resource.ttl >> 16) as u8,
            do_flag: resource.ttl & 0x8000 != 0,
            options,
        })
    }

    /// OPT record for a response; options are not echoed
    pub fn to_resource(&self) -> DNSResource {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | if self.do_flag { 0x8000 } else { 0 };
        DNSResource {
            labels: Vec::new(),
            rtype: DNSResourceType::OPT,
            rclass: DNSResourceClass::from(self.payload_size),
            ttl,
            rdata: DNSResourceData::Raw {
                rtype: DNSResourceType::OPT,
                data: Vec::new(),
            },
        }
    }

    /// EDNS block to attach to our answer, negotiated against the client's
    pub fn for_response(&self) -> Self {
        Self {
            payload_size: self.payload_size.min(MAX_PAYLOAD_SIZE),
            do_flag: self.do_flag,
            ..Self::default()
        }
    }
}
