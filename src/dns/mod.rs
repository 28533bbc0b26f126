pub mod common;
pub mod edns;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWriter};
use common::{PacketComponent, name_to_labels};
use edns::{DEFAULT_PAYLOAD_SIZE, EdnsOpt};
use enums::{DNSResourceClass, DNSResourceType, ResponseCode};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::{debug, trace};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
    /// EDNS0 OPT record if present (extracted from additional records)
    pub edns: Option<EdnsOpt>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Invalid question section")]
    InvalidQuestionSection,
    #[error("Invalid answer section")]
    InvalidAnswerSection,
    #[error("Invalid authority section")]
    InvalidAuthoritySection,
    #[error("Invalid additional section")]
    InvalidAdditionalSection,
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl DNSPacket {
    /// Standard recursive query for a single question
    pub fn query(id: u16, name: &str, qtype: DNSResourceType) -> Self {
        DNSPacket {
            header: DNSHeader {
                id,
                rd: true,
                qdcount: 1,
                ..DNSHeader::default()
            },
            questions: vec![DNSQuestion {
                labels: name_to_labels(name),
                qtype,
                qclass: DNSResourceClass::IN,
            }],
            ..DNSPacket::default()
        }
    }

    /// Empty reply echoing the id, opcode, RD bit and question of `self`
    pub fn reply(&self, rcode: ResponseCode) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                rd: self.header.rd,
                rcode: rcode.to_u8(),
                qdcount: self.questions.len() as u16,
                ..DNSHeader::default()
            },
            questions: self.questions.clone(),
            edns: self.edns.as_ref().map(EdnsOpt::for_response),
            ..DNSPacket::default()
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet
            .header
            .read(&mut reader, buf)
            .map_err(|_| ParseError::InvalidHeader)?;
        debug!(
            "Parsed DNS header: id={}, qr={}, opcode={}, questions={}",
            packet.header.id, packet.header.qr, packet.header.opcode, packet.header.qdcount
        );

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question.read(&mut reader, buf)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer.read(&mut reader, buf)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority.read(&mut reader, buf)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource.read(&mut reader, buf)?;

            if resource.rtype == DNSResourceType::OPT {
                let edns = EdnsOpt::from_resource(&resource)?;
                debug!(
                    "Parsed EDNS0 record: payload_size={}, do={}",
                    edns.payload_size, edns.do_flag
                );
                packet.edns = Some(edns);
                continue;
            }

            packet.resources.push(resource);
        }

        Ok(packet)
    }

    /// Serialize the message. Section counts are taken from the sections
    /// themselves, not from the header fields.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

            let mut header = self.header.clone();
            header.qdcount = self.questions.len() as u16;
            header.ancount = self.answers.len() as u16;
            header.nscount = self.authorities.len() as u16;
            header.arcount = self.resources.len() as u16 + self.edns.is_some() as u16;
            header.write(&mut writer)?;

            for question in &self.questions {
                question.write(&mut writer)?;
            }
            for answer in &self.answers {
                answer.write(&mut writer)?;
            }
            for authority in &self.authorities {
                authority.write(&mut writer)?;
            }
            for resource in &self.resources {
                resource.write(&mut writer)?;
            }
            if let Some(edns) = &self.edns {
                edns.to_resource().write(&mut writer)?;
            }
        }
        Ok(buf)
    }

    /// Get the maximum UDP payload size from EDNS or use default
    pub fn max_udp_payload_size(&self) -> u16 {
        self.edns
            .as_ref()
            .map(|edns| edns.payload_size)
            .unwrap_or(DEFAULT_PAYLOAD_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource::DNSResourceData;

    #[test]
    fn test_query_round_trip() {
        let query = DNSPacket::query(0x1234, "www.example.com.", DNSResourceType::AAAA);
        let bytes = query.serialize().unwrap();
        let parsed = DNSPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, query);
        assert_eq!(parsed.questions[0].name(), "www.example.com.");
    }

    #[test]
    fn test_reply_keeps_question_and_sets_flags() {
        let mut query = DNSPacket::query(7, "example.com.", DNSResourceType::MX);
        query.edns = Some(EdnsOpt::default());
        let reply = query.reply(ResponseCode::NameError);
        assert!(reply.header.qr);
        assert!(reply.header.rd);
        assert_eq!(reply.header.rcode, 3);
        assert_eq!(reply.questions, query.questions);
        assert!(reply.edns.is_some());
    }

    #[test]
    fn test_serialize_counts_sections() {
        let query = DNSPacket::query(1, "example.com.", DNSResourceType::A);
        let mut reply = query.reply(ResponseCode::NoError);
        reply.answers.push(DNSResource::new(
            "example.com.",
            300,
            DNSResourceData::A("192.0.2.1".parse().unwrap()),
        ));
        let parsed = DNSPacket::parse(&reply.serialize().unwrap()).unwrap();
        assert_eq!(parsed.header.ancount, 1);
        assert_eq!(parsed.answers, reply.answers);
    }

    #[test]
    fn test_truncated_packet_is_rejected() {
        let query = DNSPacket::query(1, "example.com.", DNSResourceType::A);
        let bytes = query.serialize().unwrap();
        assert!(DNSPacket::parse(&bytes[..bytes.len() - 3]).is_err());
        assert_eq!(DNSPacket::parse(&bytes[..5]), Err(ParseError::InvalidHeader));
    }
}
