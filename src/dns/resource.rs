use std::net::{Ipv4Addr, Ipv6Addr};

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, labels_to_name, name_to_labels, read_name, write_name},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: DNSResourceData,
}

/// Typed RDATA. Domain names are kept fully qualified (`host.example.`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DNSResourceData {
    #[default]
    Empty,
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    PTR(String),
    MX {
        preference: u16,
        exchange: String,
    },
    TXT(Vec<String>),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    CAA {
        flag: u8,
        tag: String,
        value: String,
    },
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Raw {
        rtype: DNSResourceType,
        data: Vec<u8>,
    },
}

impl DNSResourceData {
    pub fn rtype(&self) -> DNSResourceType {
        match self {
            DNSResourceData::Empty => DNSResourceType::Unknown(0),
            DNSResourceData::A(_) => DNSResourceType::A,
            DNSResourceData::AAAA(_) => DNSResourceType::AAAA,
            DNSResourceData::NS(_) => DNSResourceType::NS,
            DNSResourceData::CNAME(_) => DNSResourceType::CNAME,
            DNSResourceData::PTR(_) => DNSResourceType::PTR,
            DNSResourceData::MX { .. } => DNSResourceType::MX,
            DNSResourceData::TXT(_) => DNSResourceType::TXT,
            DNSResourceData::SRV { .. } => DNSResourceType::SRV,
            DNSResourceData::CAA { .. } => DNSResourceType::CAA,
            DNSResourceData::SOA { .. } => DNSResourceType::SOA,
            DNSResourceData::Raw { rtype, .. } => *rtype,
        }
    }

    fn read<E: Endianness>(
        rtype: DNSResourceType,
        rdlength: u16,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<Self, ParseError> {
        let rdlength = rdlength as usize;
        let rdata = match rtype {
            DNSResourceType::A if rdlength == 4 => {
                let mut octets = [0_u8; 4];
                reader.read_bytes(&mut octets)?;
                DNSResourceData::A(Ipv4Addr::from(octets))
            }
            DNSResourceType::AAAA if rdlength == 16 => {
                let mut octets = [0_u8; 16];
                reader.read_bytes(&mut octets)?;
                DNSResourceData::AAAA(Ipv6Addr::from(octets))
            }
            DNSResourceType::A | DNSResourceType::AAAA => {
                return Err(ParseError::InvalidAnswerSection);
            }
            DNSResourceType::NS => DNSResourceData::NS(read_host(reader, packet_buf)?),
            DNSResourceType::CNAME => DNSResourceData::CNAME(read_host(reader, packet_buf)?),
            DNSResourceType::PTR => DNSResourceData::PTR(read_host(reader, packet_buf)?),
            DNSResourceType::MX => DNSResourceData::MX {
                preference: reader.read_var::<u16>(16)?,
                exchange: read_host(reader, packet_buf)?,
            },
            DNSResourceType::SRV => DNSResourceData::SRV {
                priority: reader.read_var::<u16>(16)?,
                weight: reader.read_var::<u16>(16)?,
                port: reader.read_var::<u16>(16)?,
                target: read_host(reader, packet_buf)?,
            },
            DNSResourceType::SOA => DNSResourceData::SOA {
                mname: read_host(reader, packet_buf)?,
                rname: read_host(reader, packet_buf)?,
                serial: reader.read_var::<u32>(32)?,
                refresh: reader.read_var::<u32>(32)?,
                retry: reader.read_var::<u32>(32)?,
                expire: reader.read_var::<u32>(32)?,
                minimum: reader.read_var::<u32>(32)?,
            },
            DNSResourceType::TXT => {
                let mut strings = Vec::new();
                let mut consumed = 0;
                while consumed < rdlength {
                    let len = reader.read_var::<u8>(8)? as usize;
                    consumed += 1 + len;
                    if consumed > rdlength {
                        return Err(ParseError::InvalidAnswerSection);
                    }
                    let mut buf = vec![0_u8; len];
                    reader.read_bytes(&mut buf)?;
                    strings.push(String::from_utf8_lossy(&buf).into_owned());
                }
                DNSResourceData::TXT(strings)
            }
            DNSResourceType::CAA => {
                let flag = reader.read_var::<u8>(8)?;
                let tag_len = reader.read_var::<u8>(8)? as usize;
                let value_len = rdlength
                    .checked_sub(2 + tag_len)
                    .ok_or(ParseError::InvalidAnswerSection)?;
                let mut tag = vec![0_u8; tag_len];
                reader.read_bytes(&mut tag)?;
                let mut value = vec![0_u8; value_len];
                reader.read_bytes(&mut value)?;
                DNSResourceData::CAA {
                    flag,
                    tag: String::from_utf8_lossy(&tag).into_owned(),
                    value: String::from_utf8_lossy(&value).into_owned(),
                }
            }
            other => {
                let mut data = vec![0_u8; rdlength];
                reader.read_bytes(&mut data)?;
                DNSResourceData::Raw { rtype: other, data }
            }
        };
        Ok(rdata)
    }

    /// Uncompressed wire form of the RDATA
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
            match self {
                DNSResourceData::Empty => {}
                DNSResourceData::A(addr) => writer.write_bytes(&addr.octets())?,
                DNSResourceData::AAAA(addr) => writer.write_bytes(&addr.octets())?,
                DNSResourceData::NS(host)
                | DNSResourceData::CNAME(host)
                | DNSResourceData::PTR(host) => write_name(&mut writer, &name_to_labels(host))?,
                DNSResourceData::MX {
                    preference,
                    exchange,
                } => {
                    writer.write_var::<u16>(16, *preference)?;
                    write_name(&mut writer, &name_to_labels(exchange))?;
                }
                DNSResourceData::TXT(strings) => {
                    for s in strings {
                        if s.len() > 255 {
                            return Err(ParseError::InvalidAnswerSection);
                        }
                        writer.write_var::<u8>(8, s.len() as u8)?;
                        writer.write_bytes(s.as_bytes())?;
                    }
                }
                DNSResourceData::SRV {
                    priority,
                    weight,
                    port,
                    target,
                } => {
                    writer.write_var::<u16>(16, *priority)?;
                    writer.write_var::<u16>(16, *weight)?;
                    writer.write_var::<u16>(16, *port)?;
                    write_name(&mut writer, &name_to_labels(target))?;
                }
                DNSResourceData::CAA { flag, tag, value } => {
                    if tag.len() > 255 {
                        return Err(ParseError::InvalidAnswerSection);
                    }
                    writer.write_var::<u8>(8, *flag)?;
                    writer.write_var::<u8>(8, tag.len() as u8)?;
                    writer.write_bytes(tag.as_bytes())?;
                    writer.write_bytes(value.as_bytes())?;
                }
                DNSResourceData::SOA {
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                } => {
                    write_name(&mut writer, &name_to_labels(mname))?;
                    write_name(&mut writer, &name_to_labels(rname))?;
                    writer.write_var::<u32>(32, *serial)?;
                    writer.write_var::<u32>(32, *refresh)?;
                    writer.write_var::<u32>(32, *retry)?;
                    writer.write_var::<u32>(32, *expire)?;
                    writer.write_var::<u32>(32, *minimum)?;
                }
                DNSResourceData::Raw { data, .. } => writer.write_bytes(data)?,
            }
        }
        if buf.len() > u16::MAX as usize {
            return Err(ParseError::InvalidAnswerSection);
        }
        Ok(buf)
    }
}

fn read_host<E: Endianness>(
    reader: &mut BitReader<&[u8], E>,
    packet_buf: &[u8],
) -> Result<String, ParseError> {
    Ok(labels_to_name(&read_name(reader, packet_buf)?))
}

impl DNSResource {
    /// Build an IN-class record owned by `owner`; the type follows the RDATA.
    pub fn new(owner: &str, ttl: u32, rdata: DNSResourceData) -> Self {
        Self {
            labels: name_to_labels(owner),
            rtype: rdata.rtype(),
            rclass: DNSResourceClass::IN,
            ttl,
            rdata,
        }
    }

    pub fn name(&self) -> String {
        labels_to_name(&self.labels)
    }

    /// Alias target if this is a CNAME record
    pub fn cname_target(&self) -> Option<&str> {
        match &self.rdata {
            DNSResourceData::CNAME(target) => Some(target.as_str()),
            _ => None,
        }
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let rdata = self.rdata.to_bytes()?;
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = self.read_labels(reader, packet_buf)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        self.rclass = reader.read_var::<u16>(16)?.into();
        self.ttl = reader.read_var::<u32>(32)?;
        let rdlength = reader.read_var::<u16>(16)?;
        self.rdata = DNSResourceData::read(self.rtype, rdlength, reader, packet_buf)?;
        Ok(())
    }
}
