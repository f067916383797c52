//! # filewire - Reliable File Transfer for Point-to-Point Byte Links
//!
//! The filewire crate implements a reliable file-transfer protocol for
//! links that deliver bytes in order but provide no framing, no integrity
//! guarantees, and no retransmission: serial lines, raw sockets, packet
//! radios. One session moves one or more files with resume support,
//! whole-file CRC verification, adaptive timeouts, and cooperative
//! cancellation.
//!
//! ## Features
//!
//! - CRC-32 framed packets with byte-level resynchronization after
//!   corruption
//! - Handshake negotiating packet size, capabilities, and transmission
//!   window rungs (both peers independently take the element-wise minimum)
//! - Resume of interrupted transfers, optionally verified by a CRC probe
//!   over the existing local bytes
//! - Cumulative acknowledgements, so duplicated or reordered ACKs are
//!   harmless
//! - RFC 6298-style adaptive timeouts with Karn's rule, and AIMD window
//!   adaptation announced via best-effort MODE_SYNC packets
//! - Host-supplied transport, filesystem, and clock seams with std-backed
//!   defaults (TCP, `std::fs`, `Instant`)
//!
//! ## Usage
//!
//! ```no_run
//! use filewire::{Session, SessionConfig, TcpTransport};
//!
//! // Sending side
//! let transport = TcpTransport::connect("192.168.1.20:9000").unwrap();
//! let mut session = Session::new(Box::new(transport), SessionConfig::default()).unwrap();
//! session.send_files(&["./firmware.bin"], None).unwrap();
//!
//! // Receiving side
//! let transport = TcpTransport::accept("0.0.0.0:9000").unwrap();
//! let mut session = Session::new(Box::new(transport), SessionConfig::default()).unwrap();
//! session.receive_files("./downloads").unwrap();
//! ```

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crc;
pub mod error;
pub mod filesystem;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod timing;
pub mod transport;
pub mod util;
pub mod wire;

pub use crate::error::{status, ErrorDetail, FileWireError};
pub use crate::logging::{init_logger, log_info};

// Core session types
pub use adaptive::TxMode;
pub use clock::{Clock, SystemClock};
pub use config::{
    AdaptiveConfig, FeatureConfig, Features, FileMetadata, FileOutcome, ProgressInfo, ResumeConfig,
    ResumeMode, RetryConfig, SessionConfig, TimeoutConfig, ValidationAction,
};
pub use crc::{crc32, CrcDigest, CrcProvider};
pub use filesystem::{OpenMode, StdFs, Vfs, VfsFile};
pub use metrics::Metrics;
pub use session::{CancelHandle, Packet, Session};
pub use transport::{MockLink, TcpTransport, Transport};
pub use wire::PacketType;

/// The negotiable capability bits compiled into this build.
pub fn builtin_features() -> u32 {
    Features::builtin().bits()
}
