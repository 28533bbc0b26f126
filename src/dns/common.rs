use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Upper bound on compression pointers followed while reading one name
const MAX_POINTER_JUMPS: usize = 32;
const MAX_NAME_LENGTH: usize = 255;
const MAX_LABEL_LENGTH: usize = 63;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// Read the component. `packet_buf` is the whole message, needed to follow
    /// compression pointers.
    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;

    fn read_labels<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<Vec<String>, ParseError> {
        read_name(reader, packet_buf)
    }

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        write_name(writer, labels)
    }
}

/// Read a possibly compressed domain name from the stream.
pub(crate) fn read_name<E: Endianness>(
    reader: &mut BitReader<&[u8], E>,
    packet_buf: &[u8],
) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    loop {
        let label_len = reader.read_var::<u8>(8)?;
        match label_len & 0xC0 {
            0x00 => {
                if label_len == 0 {
                    break;
                }
                let mut buf = vec![0; label_len as usize];
                reader.read_bytes(&mut buf)?;
                labels.push(String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?);
            }
            0xC0 => {
                let low = reader.read_var::<u8>(8)?;
                let offset = (((label_len & 0x3F) as usize) << 8) | low as usize;
                labels.extend(read_name_at(packet_buf, offset)?);
                break;
            }
            _ => return Err(ParseError::InvalidLabel),
        }
    }

    check_name_length(&labels)?;
    Ok(labels)
}

/// Read a name starting at `offset` in the raw message, following pointers.
fn read_name_at(packet_buf: &[u8], mut offset: usize) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut jumps = 1;

    loop {
        let label_len = *packet_buf.get(offset).ok_or(ParseError::InvalidLabel)?;
        match label_len & 0xC0 {
            0x00 => {
                if label_len == 0 {
                    return Ok(labels);
                }
                let start = offset + 1;
                let end = start + label_len as usize;
                let bytes = packet_buf
                    .get(start..end)
                    .ok_or(ParseError::InvalidLabel)?;
                labels.push(
                    String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?,
                );
                offset = end;
            }
            0xC0 => {
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(ParseError::InvalidLabel);
                }
                let low = *packet_buf.get(offset + 1).ok_or(ParseError::InvalidLabel)?;
                offset = (((label_len & 0x3F) as usize) << 8) | low as usize;
            }
            _ => return Err(ParseError::InvalidLabel),
        }
    }
}

pub(crate) fn write_name<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    labels: &[String],
) -> Result<(), ParseError> {
    check_name_length(labels)?;
    for label in labels.iter().filter(|l| !l.is_empty()) {
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

fn check_name_length(labels: &[String]) -> Result<(), ParseError> {
    if labels.iter().any(|l| l.len() > MAX_LABEL_LENGTH) {
        return Err(ParseError::InvalidLabel);
    }
    let total: usize = labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
    if total > MAX_NAME_LENGTH {
        return Err(ParseError::InvalidLabel);
    }
    Ok(())
}

/// Presentation form of a label sequence, always fully qualified.
pub fn labels_to_name(labels: &[String]) -> String {
    let mut name = String::new();
    for label in labels.iter().filter(|l| !l.is_empty()) {
        name.push_str(label);
        name.push('.');
    }
    if name.is_empty() {
        name.push('.');
    }
    name
}

pub fn name_to_labels(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}
