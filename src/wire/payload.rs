//! Payload codecs for the fixed-layout packet types.
//!
//! Every payload here is parsed with `nom` and packed into a `BytesMut`;
//! `deserialize(serialize(x)) == x` holds for all of them. String fields are
//! NUL-padded to their fixed wire width and truncated on encode.

use crate::constants::{
    WIRE_ERROR_SIZE, WIRE_FILENAME_FIELD, WIRE_HELLO_SIZE, WIRE_META_SIZE, WIRE_MODE_SYNC_SIZE,
    WIRE_PATH_FIELD, WIRE_RESUME_RESP_SIZE,
};
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{le_i32, le_u16, le_u32, le_u64, le_u8};
use nom::IResult;

/// HELLO: version/feature/MTU/window negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub magic: u32,
    pub version_major: u8,
    pub version_minor: u8,
    /// Proposed total frame size; both peers adopt the minimum.
    pub packet_size: u32,
    /// Negotiable capability bits compiled into this build.
    pub supported: u32,
    /// Bits the peer must support or the session aborts.
    pub required: u32,
    /// Bits used opportunistically when the peer supports them.
    pub requested: u32,
    pub max_performance_mode: u8,
    pub preferred_initial_mode: u8,
    pub mode_sync_interval: u16,
    /// Bit 0: willing to transmit streaming; bit 1: accepts inbound streaming.
    pub streaming_flags: u8,
}

pub fn pack_hello(hello: &Hello) -> BytesMut {
    let mut buf = BytesMut::with_capacity(WIRE_HELLO_SIZE);
    buf.put_u32_le(hello.magic);
    buf.put_u8(hello.version_major);
    buf.put_u8(hello.version_minor);
    buf.put_u16_le(0); // reserved
    buf.put_u32_le(hello.packet_size);
    buf.put_u32_le(hello.supported);
    buf.put_u32_le(hello.required);
    buf.put_u32_le(hello.requested);
    buf.put_u8(hello.max_performance_mode);
    buf.put_u8(hello.preferred_initial_mode);
    buf.put_u16_le(hello.mode_sync_interval);
    buf.put_u8(hello.streaming_flags);
    buf.put_bytes(0, 3); // reserved
    buf
}

pub fn parse_hello(input: &[u8]) -> IResult<&[u8], Hello> {
    let (i, magic) = le_u32(input)?;
    let (i, version_major) = le_u8(i)?;
    let (i, version_minor) = le_u8(i)?;
    let (i, _reserved) = le_u16(i)?;
    let (i, packet_size) = le_u32(i)?;
    let (i, supported) = le_u32(i)?;
    let (i, required) = le_u32(i)?;
    let (i, requested) = le_u32(i)?;
    let (i, max_performance_mode) = le_u8(i)?;
    let (i, preferred_initial_mode) = le_u8(i)?;
    let (i, mode_sync_interval) = le_u16(i)?;
    let (i, streaming_flags) = le_u8(i)?;
    let (i, _reserved2) = take(3usize)(i)?;
    Ok((
        i,
        Hello {
            magic,
            version_major,
            version_minor,
            packet_size,
            supported,
            required,
            requested,
            max_performance_mode,
            preferred_initial_mode,
            mode_sync_interval,
            streaming_flags,
        },
    ))
}

/// SEND_META: sanitized basename, advisory path hint, size, whole-file CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub filename: String,
    /// Informational only. Receivers must never build output paths from it.
    pub sender_path: String,
    pub file_size: u64,
    pub file_crc32: u32,
}

fn put_padded(buf: &mut BytesMut, value: &str, field: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field - 1);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, field - len);
}

fn take_padded(input: &[u8], field: usize) -> IResult<&[u8], String> {
    let (i, raw) = take(field)(input)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok((i, String::from_utf8_lossy(&raw[..end]).into_owned()))
}

pub fn pack_meta(meta: &Meta) -> BytesMut {
    let mut buf = BytesMut::with_capacity(WIRE_META_SIZE);
    put_padded(&mut buf, &meta.filename, WIRE_FILENAME_FIELD);
    put_padded(&mut buf, &meta.sender_path, WIRE_PATH_FIELD);
    buf.put_u64_le(meta.file_size);
    buf.put_u32_le(meta.file_crc32);
    buf
}

pub fn parse_meta(input: &[u8]) -> IResult<&[u8], Meta> {
    let (i, filename) = take_padded(input, WIRE_FILENAME_FIELD)?;
    let (i, sender_path) = take_padded(i, WIRE_PATH_FIELD)?;
    let (i, file_size) = le_u64(i)?;
    let (i, file_crc32) = le_u32(i)?;
    Ok((
        i,
        Meta {
            filename,
            sender_path,
            file_size,
            file_crc32,
        },
    ))
}

/// Receiver's answer to RESUME_REQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResumeAction {
    StartZero = 0,
    StartOffset = 1,
    VerifyFirst = 2,
    SkipFile = 3,
    AbortFile = 4,
}

impl ResumeAction {
    pub fn from_wire(value: u32) -> Option<ResumeAction> {
        match value {
            0 => Some(ResumeAction::StartZero),
            1 => Some(ResumeAction::StartOffset),
            2 => Some(ResumeAction::VerifyFirst),
            3 => Some(ResumeAction::SkipFile),
            4 => Some(ResumeAction::AbortFile),
            _ => None,
        }
    }
}

/// RESUME_RESP, also echoed back by the sender as the VERIFY request with
/// `verify_crc` replaced by its own computation over the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeResp {
    pub action: u32,
    pub resume_offset: u64,
    pub verify_crc: u32,
    pub verify_len: u64,
}

pub fn pack_resume_resp(resp: &ResumeResp) -> BytesMut {
    let mut buf = BytesMut::with_capacity(WIRE_RESUME_RESP_SIZE);
    buf.put_u32_le(resp.action);
    buf.put_u64_le(resp.resume_offset);
    buf.put_u32_le(resp.verify_crc);
    buf.put_u64_le(resp.verify_len);
    buf
}

pub fn parse_resume_resp(input: &[u8]) -> IResult<&[u8], ResumeResp> {
    let (i, action) = le_u32(input)?;
    let (i, resume_offset) = le_u64(i)?;
    let (i, verify_crc) = le_u32(i)?;
    let (i, verify_len) = le_u64(i)?;
    Ok((
        i,
        ResumeResp {
            action,
            resume_offset,
            verify_crc,
            verify_len,
        },
    ))
}

/// VERIFY status reply: a bare wire status code.
pub fn pack_verify_status(status: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_i32_le(status);
    buf
}

pub fn parse_verify_status(input: &[u8]) -> IResult<&[u8], i32> {
    le_i32(input)
}

/// ERROR: compact code + detail mask, no message strings on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: i32,
    pub detail: u32,
}

pub fn pack_error(payload: &ErrorPayload) -> BytesMut {
    let mut buf = BytesMut::with_capacity(WIRE_ERROR_SIZE);
    buf.put_i32_le(payload.code);
    buf.put_u32_le(payload.detail);
    buf
}

pub fn parse_error(input: &[u8]) -> IResult<&[u8], ErrorPayload> {
    let (i, code) = le_i32(input)?;
    let (i, detail) = le_u32(i)?;
    Ok((i, ErrorPayload { code, detail }))
}

/// MODE_SYNC: best-effort window-rung advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSync {
    pub current_mode: u32,
    pub sequence: u32,
    pub consecutive_errors: u16,
    pub consecutive_successes: u16,
    /// Bit 0: streaming pacing engaged on the announcing side.
    pub flags: u32,
}

pub fn pack_mode_sync(sync: &ModeSync) -> BytesMut {
    let mut buf = BytesMut::with_capacity(WIRE_MODE_SYNC_SIZE);
    buf.put_u32_le(sync.current_mode);
    buf.put_u32_le(sync.sequence);
    buf.put_u16_le(sync.consecutive_errors);
    buf.put_u16_le(sync.consecutive_successes);
    buf.put_u32_le(sync.flags);
    buf
}

pub fn parse_mode_sync(input: &[u8]) -> IResult<&[u8], ModeSync> {
    let (i, current_mode) = le_u32(input)?;
    let (i, sequence) = le_u32(i)?;
    let (i, consecutive_errors) = le_u16(i)?;
    let (i, consecutive_successes) = le_u16(i)?;
    let (i, flags) = le_u32(i)?;
    Ok((
        i,
        ModeSync {
            current_mode,
            sequence,
            consecutive_errors,
            consecutive_successes,
            flags,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PROTOCOL_MAGIC, VERSION_MAJOR, VERSION_MINOR};
    use proptest::prelude::*;

    #[test]
    fn hello_round_trip_and_size() {
        let hello = Hello {
            magic: PROTOCOL_MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            packet_size: 4096,
            supported: 0x3,
            required: 0x1,
            requested: 0x2,
            max_performance_mode: 64,
            preferred_initial_mode: 8,
            mode_sync_interval: 32,
            streaming_flags: 0x3,
        };
        let raw = pack_hello(&hello);
        assert_eq!(raw.len(), WIRE_HELLO_SIZE);
        let (rest, parsed) = parse_hello(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }

    #[test]
    fn meta_round_trip_and_size() {
        let meta = Meta {
            filename: "report.tar.gz".into(),
            sender_path: "/srv/export/report.tar.gz".into(),
            file_size: 123_456_789,
            file_crc32: 0xCAFE_F00D,
        };
        let raw = pack_meta(&meta);
        assert_eq!(raw.len(), WIRE_META_SIZE);
        let (rest, parsed) = parse_meta(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, meta);
    }

    #[test]
    fn meta_truncates_oversized_names() {
        let meta = Meta {
            filename: "x".repeat(400),
            sender_path: "y".repeat(600),
            file_size: 1,
            file_crc32: 0,
        };
        let raw = pack_meta(&meta);
        assert_eq!(raw.len(), WIRE_META_SIZE);
        let (_, parsed) = parse_meta(&raw).unwrap();
        assert_eq!(parsed.filename.len(), WIRE_FILENAME_FIELD - 1);
        assert_eq!(parsed.sender_path.len(), WIRE_PATH_FIELD - 1);
    }

    #[test]
    fn resume_resp_round_trip() {
        let resp = ResumeResp {
            action: ResumeAction::VerifyFirst as u32,
            resume_offset: 40_000,
            verify_crc: 0x1234_5678,
            verify_len: 1024,
        };
        let raw = pack_resume_resp(&resp);
        assert_eq!(raw.len(), WIRE_RESUME_RESP_SIZE);
        let (_, parsed) = parse_resume_resp(&raw).unwrap();
        assert_eq!(parsed, resp);
        assert_eq!(ResumeAction::from_wire(parsed.action), Some(ResumeAction::VerifyFirst));
    }

    #[test]
    fn error_and_mode_sync_round_trip() {
        let err = ErrorPayload { code: -9, detail: 0x6 };
        let (_, parsed) = parse_error(&pack_error(&err)).unwrap();
        assert_eq!(parsed, err);

        let sync = ModeSync {
            current_mode: 16,
            sequence: 7,
            consecutive_errors: 0,
            consecutive_successes: 10,
            flags: 1,
        };
        let raw = pack_mode_sync(&sync);
        assert_eq!(raw.len(), WIRE_MODE_SYNC_SIZE);
        let (_, parsed) = parse_mode_sync(&raw).unwrap();
        assert_eq!(parsed, sync);
    }

    #[test]
    fn verify_status_round_trip() {
        for status in [0i32, 1, -10, -11] {
            let (_, parsed) = parse_verify_status(&pack_verify_status(status)).unwrap();
            assert_eq!(parsed, status);
        }
    }

    proptest! {
        #[test]
        fn hello_round_trips(packet_size in 0u32..=1_000_000, supported: u32,
                             required: u32, requested: u32, max_mode: u8,
                             pref_mode: u8, interval: u16, streaming in 0u8..=3) {
            let hello = Hello {
                magic: PROTOCOL_MAGIC,
                version_major: VERSION_MAJOR,
                version_minor: VERSION_MINOR,
                packet_size,
                supported,
                required,
                requested,
                max_performance_mode: max_mode,
                preferred_initial_mode: pref_mode,
                mode_sync_interval: interval,
                streaming_flags: streaming,
            };
            let (_, parsed) = parse_hello(&pack_hello(&hello)).unwrap();
            prop_assert_eq!(parsed, hello);
        }

        #[test]
        fn resume_resp_round_trips(action in 0u32..=4, offset: u64, crc: u32, len: u64) {
            let resp = ResumeResp { action, resume_offset: offset, verify_crc: crc, verify_len: len };
            let (_, parsed) = parse_resume_resp(&pack_resume_resp(&resp)).unwrap();
            prop_assert_eq!(parsed, resp);
        }

        #[test]
        fn meta_round_trips(name in "[a-zA-Z0-9._-]{1,100}", size: u64, crc: u32) {
            let meta = Meta {
                filename: name,
                sender_path: String::new(),
                file_size: size,
                file_crc32: crc,
            };
            let (_, parsed) = parse_meta(&pack_meta(&meta)).unwrap();
            prop_assert_eq!(parsed, meta);
        }
    }
}
