//! # Error Handling
//!
//! This module defines the FileWireError enum, which represents the different
//! error types that can occur in the filewire crate, together with the stable
//! numeric codes and detail masks that travel in ERROR packets.

use bitflags::bitflags;
use thiserror::Error;

/// Stable wire status codes. `OK` and `SKIPPED` are positive outcomes; the
/// rest are negative error codes as carried in ERROR payloads and VERIFY
/// status replies.
pub mod status {
    pub const OK: i32 = 0;
    pub const SKIPPED: i32 = 1;
    pub const INVALID_ARG: i32 = -1;
    pub const NO_MEMORY: i32 = -2;
    pub const IO: i32 = -3;
    pub const TIMEOUT: i32 = -4;
    pub const CRC: i32 = -5;
    pub const PROTOCOL: i32 = -6;
    pub const INCOMPATIBLE_VERSION: i32 = -7;
    pub const PACKET_SIZE_MISMATCH: i32 = -8;
    pub const FEATURE_NEGOTIATION: i32 = -9;
    pub const RESUME_VERIFY: i32 = -10;
    pub const ABORTED: i32 = -11;
}

bitflags! {
    /// Detail mask accompanying an error code. Identifies which operation or
    /// check produced the failure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorDetail: u32 {
        const SEND_FAILED    = 1 << 0;
        const RECV_FAILED    = 1 << 1;
        const CONNECTION     = 1 << 2;
        const FILE_NOT_FOUND = 1 << 3;
        const PERMISSION     = 1 << 4;
        const DISK_FULL      = 1 << 5;
        const CRC_HEADER     = 1 << 6;
        const CRC_TRAILER    = 1 << 7;
        const CRC_FILE       = 1 << 8;
        const PACKET_CORRUPT = 1 << 9;
        const TIMEOUT_HELLO  = 1 << 10;
        const TIMEOUT_META   = 1 << 11;
        const TIMEOUT_DATA   = 1 << 12;
        const TIMEOUT_ACK    = 1 << 13;
        const PAYLOAD_SIZE   = 1 << 14;
        const PACKET_SIZE    = 1 << 15;
        const MALFORMED_PKT  = 1 << 16;
        const UNKNOWN_TYPE   = 1 << 17;
        const INVALID_STATE  = 1 << 18;
        const VERSION_MAJOR  = 1 << 19;
    }
}

/// Represents the different error types that can occur in the filewire crate.
#[derive(Debug, Error)]
pub enum FileWireError {
    /// Caller contract violation: MTU out of range, oversized payload,
    /// missing collaborator.
    #[error("invalid argument ({detail:?})")]
    InvalidArg { detail: ErrorDetail },

    /// Allocation failure reported by a peer. Local allocation failure
    /// aborts the process and is never mapped to this variant.
    #[error("out of memory")]
    NoMemory,

    /// Transport or filesystem failure.
    #[error("I/O failure ({detail:?})")]
    Io { detail: ErrorDetail },

    /// Retry budget exhausted; the detail names the operation that timed out.
    #[error("operation timed out ({detail:?})")]
    Timeout { detail: ErrorDetail },

    /// Header, trailer, or whole-file CRC mismatch.
    #[error("CRC mismatch ({detail:?})")]
    Crc { detail: ErrorDetail },

    /// Malformed packet, unexpected type for the current state, or an ERROR
    /// packet from the peer.
    #[error("protocol violation ({detail:?})")]
    Protocol { detail: ErrorDetail },

    /// Major protocol version differs from the peer's.
    #[error("incompatible protocol version")]
    IncompatibleVersion,

    /// Negotiated packet size fell outside the allowed range.
    #[error("negotiated packet size out of range")]
    PacketSizeMismatch,

    /// A required feature bit is not supported by the other side.
    #[error("feature negotiation failed (missing bits {missing:#010x})")]
    FeatureNegotiation { missing: u32 },

    /// Resume CRC probe mismatch; signals restart-from-zero, not a session
    /// failure.
    #[error("resume verification mismatch")]
    ResumeVerify,

    /// Local or remote cancellation.
    #[error("transfer aborted")]
    Aborted,
}

impl FileWireError {
    /// The stable numeric code for this error as carried on the wire.
    pub fn code(&self) -> i32 {
        match self {
            FileWireError::InvalidArg { .. } => status::INVALID_ARG,
            FileWireError::NoMemory => status::NO_MEMORY,
            FileWireError::Io { .. } => status::IO,
            FileWireError::Timeout { .. } => status::TIMEOUT,
            FileWireError::Crc { .. } => status::CRC,
            FileWireError::Protocol { .. } => status::PROTOCOL,
            FileWireError::IncompatibleVersion => status::INCOMPATIBLE_VERSION,
            FileWireError::PacketSizeMismatch => status::PACKET_SIZE_MISMATCH,
            FileWireError::FeatureNegotiation { .. } => status::FEATURE_NEGOTIATION,
            FileWireError::ResumeVerify => status::RESUME_VERIFY,
            FileWireError::Aborted => status::ABORTED,
        }
    }

    /// The detail mask for this error, zero when the variant carries none.
    pub fn detail(&self) -> u32 {
        match self {
            FileWireError::InvalidArg { detail }
            | FileWireError::Io { detail }
            | FileWireError::Timeout { detail }
            | FileWireError::Crc { detail }
            | FileWireError::Protocol { detail } => detail.bits(),
            FileWireError::FeatureNegotiation { missing } => *missing,
            FileWireError::IncompatibleVersion => ErrorDetail::VERSION_MAJOR.bits(),
            FileWireError::PacketSizeMismatch => ErrorDetail::PACKET_SIZE.bits(),
            _ => 0,
        }
    }

    /// Reconstructs an error from a wire `(code, detail)` pair. Unknown codes
    /// map to `Protocol` so a newer peer cannot produce an unrepresentable
    /// state.
    pub fn from_wire(code: i32, detail: u32) -> FileWireError {
        let detail_mask = ErrorDetail::from_bits_truncate(detail);
        match code {
            status::INVALID_ARG => FileWireError::InvalidArg { detail: detail_mask },
            status::NO_MEMORY => FileWireError::NoMemory,
            status::IO => FileWireError::Io { detail: detail_mask },
            status::TIMEOUT => FileWireError::Timeout { detail: detail_mask },
            status::CRC => FileWireError::Crc { detail: detail_mask },
            status::INCOMPATIBLE_VERSION => FileWireError::IncompatibleVersion,
            status::PACKET_SIZE_MISMATCH => FileWireError::PacketSizeMismatch,
            status::FEATURE_NEGOTIATION => FileWireError::FeatureNegotiation { missing: detail },
            status::RESUME_VERIFY => FileWireError::ResumeVerify,
            status::ABORTED => FileWireError::Aborted,
            _ => FileWireError::Protocol { detail: detail_mask },
        }
    }
}
