use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{ParseError, common::PacketComponent};

const QR: u16 = 1 << 15;
const AA: u16 = 1 << 10;
const TC: u16 = 1 << 9;
const RD: u16 = 1 << 8;
const RA: u16 = 1 << 7;

/// Fixed 12-byte message header (RFC 1035 §4.1.1)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DNSHeader {
    /// Second header word: flag bits, opcode and rcode
    pub fn flags(&self) -> u16 {
        let mut flags = ((self.opcode as u16 & 0x0F) << 11)
            | ((self.z as u16 & 0x07) << 4)
            | (self.rcode as u16 & 0x0F);
        for (set, bit) in [
            (self.qr, QR),
            (self.aa, AA),
            (self.tc, TC),
            (self.rd, RD),
            (self.ra, RA),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.qr = flags & QR != 0;
        self.opcode = ((flags >> 11) & 0x0F) as u8;
        self.aa = flags & AA != 0;
        self.tc = flags & TC != 0;
        self.rd = flags & RD != 0;
        self.ra = flags & RA != 0;
        self.z = ((flags >> 4) & 0x07) as u8;
        self.rcode = (flags & 0x0F) as u8;
    }
}

impl PacketComponent for DNSHeader {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        for word in [
            self.id,
            self.flags(),
            self.qdcount,
            self.ancount,
            self.nscount,
            self.arcount,
        ] {
            writer.write_var::<u16>(16, word)?;
        }
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        _packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.id = reader.read_var::<u16>(16)?;
        let flags = reader.read_var::<u16>(16)?;
        self.set_flags(flags);
        self.qdcount = reader.read_var::<u16>(16)?;
        self.ancount = reader.read_var::<u16>(16)?;
        self.nscount = reader.read_var::<u16>(16)?;
        self.arcount = reader.read_var::<u16>(16)?;
        Ok(())
    }
}
