//! # Packet Framing
//!
//! This module decodes and encodes the fixed 24-byte packet header that
//! frames every exchange on the wire. All multi-byte integers are
//! little-endian. The header carries its own CRC computed with the CRC field
//! zeroed, so a receiver can validate it in place before trusting
//! `payload_len`; the frame trailer is a CRC-32 over header + payload and is
//! handled by the session send/receive paths.
//!
//! Payload layouts for the individual packet types live in [`payload`].

pub mod payload;

use crate::constants::{HEADER_CRC_OFFSET, WIRE_HEADER_SIZE};
use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
use nom::IResult;

/// Packet types with their stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Session/version negotiation.
    Hello = 1,
    /// Filename, size, and whole-file CRC.
    SendMeta = 2,
    /// Sender asks for resume options.
    ResumeReq = 3,
    /// Receiver responds with a resume action.
    ResumeResp = 4,
    /// File data chunk.
    Data = 5,
    /// Cumulative acknowledgement; `offset` is the next expected byte.
    DataAck = 6,
    /// CRC verification request/response during resume.
    Verify = 7,
    /// File complete.
    Done = 8,
    Error = 9,
    /// End of transmission.
    Eot = 10,
    EotAck = 11,
    DoneAck = 12,
    /// Advisory window-rung announcement.
    ModeSync = 13,
    /// Cooperative cancellation.
    Cancel = 14,
}

impl PacketType {
    pub fn from_wire(byte: u8) -> Option<PacketType> {
        match byte {
            1 => Some(PacketType::Hello),
            2 => Some(PacketType::SendMeta),
            3 => Some(PacketType::ResumeReq),
            4 => Some(PacketType::ResumeResp),
            5 => Some(PacketType::Data),
            6 => Some(PacketType::DataAck),
            7 => Some(PacketType::Verify),
            8 => Some(PacketType::Done),
            9 => Some(PacketType::Error),
            10 => Some(PacketType::Eot),
            11 => Some(PacketType::EotAck),
            12 => Some(PacketType::DoneAck),
            13 => Some(PacketType::ModeSync),
            14 => Some(PacketType::Cancel),
            _ => None,
        }
    }

    /// Control packets are flushed through the transport immediately.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            PacketType::Hello
                | PacketType::Done
                | PacketType::Eot
                | PacketType::Error
                | PacketType::Cancel
        )
    }
}

/// The fixed packet header. `wire_version` must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: u8,
    pub wire_version: u8,
    pub payload_len: u32,
    pub seq: u32,
    pub offset: u64,
    pub header_crc: u32,
}

impl PacketHeader {
    /// Serializes the header, including whatever value `header_crc` holds.
    pub fn to_bytes(&self) -> [u8; WIRE_HEADER_SIZE] {
        let mut raw = [0u8; WIRE_HEADER_SIZE];
        raw[0] = self.packet_type;
        raw[1] = self.wire_version;
        // raw[2..4] reserved, zero
        raw[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        raw[8..12].copy_from_slice(&self.seq.to_le_bytes());
        raw[12..20].copy_from_slice(&self.offset.to_le_bytes());
        raw[20..24].copy_from_slice(&self.header_crc.to_le_bytes());
        raw
    }
}

/// Parses a packet header from a byte slice.
pub fn parse_header(input: &[u8]) -> IResult<&[u8], PacketHeader> {
    let (i, packet_type) = le_u8(input)?;
    let (i, wire_version) = le_u8(i)?;
    let (i, _reserved) = le_u16(i)?;
    let (i, payload_len) = le_u32(i)?;
    let (i, seq) = le_u32(i)?;
    let (i, offset) = le_u64(i)?;
    let (i, header_crc) = le_u32(i)?;
    Ok((
        i,
        PacketHeader {
            packet_type,
            wire_version,
            payload_len,
            seq,
            offset,
            header_crc,
        },
    ))
}

/// The CRC value stored in a raw header.
pub fn stored_header_crc(raw: &[u8]) -> u32 {
    u32::from_le_bytes([
        raw[HEADER_CRC_OFFSET],
        raw[HEADER_CRC_OFFSET + 1],
        raw[HEADER_CRC_OFFSET + 2],
        raw[HEADER_CRC_OFFSET + 3],
    ])
}

/// Copy of a raw header with the CRC field zeroed, the form the header CRC
/// is computed over.
pub fn crc_input(raw: &[u8]) -> [u8; WIRE_HEADER_SIZE] {
    let mut scratch = [0u8; WIRE_HEADER_SIZE];
    scratch.copy_from_slice(&raw[..WIRE_HEADER_SIZE]);
    scratch[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&[0, 0, 0, 0]);
    scratch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc32;

    fn sample_header() -> PacketHeader {
        PacketHeader {
            packet_type: PacketType::Data as u8,
            wire_version: 0,
            payload_len: 996,
            seq: 42,
            offset: 0x1122_3344_5566_7788,
            header_crc: 0,
        }
    }

    #[test]
    fn header_round_trip() {
        let mut header = sample_header();
        header.header_crc = 0xDEAD_BEEF;
        let raw = header.to_bytes();
        let (rest, parsed) = parse_header(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = sample_header();
        let raw = header.to_bytes();
        assert_eq!(raw[0], 5);
        assert_eq!(raw[1], 0);
        assert_eq!(&raw[2..4], &[0, 0]);
        assert_eq!(&raw[4..8], &996u32.to_le_bytes());
        assert_eq!(&raw[8..12], &42u32.to_le_bytes());
        assert_eq!(&raw[12..20], &0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    fn header_crc_recomputes_over_zeroed_field() {
        let mut header = sample_header();
        let crc = crc32(&header.to_bytes());
        header.header_crc = crc;
        let raw = header.to_bytes();
        assert_eq!(stored_header_crc(&raw), crc);
        assert_eq!(crc32(&crc_input(&raw)), crc);
    }

    #[test]
    fn all_packet_types_round_trip() {
        for byte in 1u8..=14 {
            let ty = PacketType::from_wire(byte).unwrap();
            assert_eq!(ty as u8, byte);
        }
        assert_eq!(PacketType::from_wire(0), None);
        assert_eq!(PacketType::from_wire(15), None);
    }
}
