//! Wire-Protocol Constants
//!
//! This module defines the constants of the filewire transfer protocol:
//! magic, version, packet-size bounds, payload layouts, and the defaults
//! applied when a configuration field is left at zero.

/// Magic identifying the protocol family in HELLO payloads ("FWR1", little-endian).
pub const PROTOCOL_MAGIC: u32 = 0x4657_5231;

/// Major protocol version; peers must match exactly.
pub const VERSION_MAJOR: u8 = 1;

/// Minor protocol version; informational only.
pub const VERSION_MINOR: u8 = 0;

/// Packet header: type, wire version, reserved, payload_len, seq, offset, header CRC.
pub const WIRE_HEADER_SIZE: usize = 24;

/// Trailer: CRC-32 over header + payload.
pub const WIRE_TRAILER_SIZE: usize = 4;

/// Byte offset of the header CRC field within the header.
pub const HEADER_CRC_OFFSET: usize = 20;

/// Smallest negotiable total frame size. Must hold the metadata payload.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest negotiable total frame size.
pub const MAX_PACKET_SIZE: usize = 65536;

/// Longest sanitized basename carried in metadata.
pub const MAX_FILENAME: usize = 127;

/// Longest advisory path hint carried in metadata.
pub const MAX_PATH: usize = 255;

/// Fixed on-wire field widths (NUL-padded).
pub const WIRE_FILENAME_FIELD: usize = MAX_FILENAME + 1;
pub const WIRE_PATH_FIELD: usize = MAX_PATH + 1;

/// Payload sizes for the fixed-layout packet types.
pub const WIRE_HELLO_SIZE: usize = 32;
pub const WIRE_META_SIZE: usize = WIRE_FILENAME_FIELD + WIRE_PATH_FIELD + 8 + 4;
pub const WIRE_RESUME_RESP_SIZE: usize = 24;
pub const WIRE_VERIFY_STATUS_SIZE: usize = 4;
pub const WIRE_ERROR_SIZE: usize = 8;
pub const WIRE_MODE_SYNC_SIZE: usize = 16;

/// Tail verification window cap, keeps resume probes fast on slow storage.
pub const TAIL_VERIFY_CAP: u64 = 2 * 1024 * 1024;

/// Full-prefix verification cap; larger local files verify only their last
/// `FULL_VERIFY_CAP` bytes.
pub const FULL_VERIFY_CAP: u64 = 512 * 1024 * 1024;

/// Timeout bounds applied when the configured values are zero.
pub const DEFAULT_MIN_TIMEOUT_MS: u32 = 200;
pub const DEFAULT_MAX_TIMEOUT_MS: u32 = 8000;

/// Initial MTU proposal used by `SessionConfig::default`.
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Tail-verify window applied when `crc_verify_bytes` is zero.
pub const DEFAULT_VERIFY_BYTES: u32 = 1024;

/// Flow-control thresholds applied when the configured values are zero.
pub const DEFAULT_DEGRADE_ERROR_THRESHOLD: u16 = 3;
pub const DEFAULT_RECOVERY_SUCCESS_THRESHOLD: u16 = 10;

/// Number of CANCEL packets emitted by an emergency cancel.
pub const CANCEL_BURST: u8 = 3;
