//! Session configuration.
//!
//! One [`SessionConfig`] snapshot is taken at session creation; the host
//! never mutates it afterwards. Every section has workable defaults; a
//! zero in a threshold or timeout field means "use the built-in default",
//! matching the wire peers that leave those fields unset.

use crate::adaptive::TxMode;
use crate::constants::{DEFAULT_PACKET_SIZE, DEFAULT_VERIFY_BYTES};
use crate::crc::CrcProvider;
use bitflags::bitflags;
use std::path::Path;

bitflags! {
    /// Negotiable optional capability bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Features: u32 {
        /// CRC-verified resume of partially transferred files.
        const CRC_RESUME = 1 << 0;
        /// Multiple files per session between EOTs.
        const MULTI_FILES = 1 << 1;
    }
}

impl Features {
    /// Everything this build can negotiate. Bits outside this mask are
    /// zeroed on send and ignored on receive.
    pub const fn builtin() -> Features {
        Features::CRC_RESUME.union(Features::MULTI_FILES)
    }
}

/// RTO bounds in milliseconds. Zeroes select the defaults (200 / 8000);
/// inverted bounds are silently swapped.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub min_timeout_ms: u32,
    pub max_timeout_ms: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig { min_timeout_ms: 0, max_timeout_ms: 0 }
    }
}

/// Retry budgets per operation and the base backoff delay, doubled on every
/// retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub handshake_retries: u8,
    pub meta_retries: u8,
    pub data_retries: u8,
    pub ack_retries: u8,
    pub backoff_ms_base: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            handshake_retries: 5,
            meta_retries: 4,
            data_retries: 4,
            ack_retries: 4,
            backoff_ms_base: 10,
        }
    }
}

/// Receiver policy for pre-existing local files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Always restart from zero.
    #[default]
    Never,
    /// Skip any file that already exists locally with non-zero size.
    SkipExisting,
    /// Verify a CRC window at the local tail; mismatch skips the file.
    CrcTail,
    /// Verify the tail; mismatch restarts from zero.
    CrcTailOrZero,
    /// Verify the whole local prefix; mismatch skips the file.
    CrcFull,
    /// Verify the whole local prefix; mismatch restarts from zero.
    CrcFullOrZero,
}

#[derive(Debug, Clone, Copy)]
pub struct ResumeConfig {
    pub mode: ResumeMode,
    /// Tail window size for the CRC_TAIL modes; zero selects 1024.
    pub crc_verify_bytes: u32,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        ResumeConfig { mode: ResumeMode::Never, crc_verify_bytes: DEFAULT_VERIFY_BYTES }
    }
}

/// Window-rung flow-control settings.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    /// Fastest rung this endpoint will ever run.
    pub max_performance_mode: TxMode,
    /// Rung proposed as the starting point at handshake.
    pub preferred_initial_mode: TxMode,
    /// Consecutive errors before degrading; zero selects 3.
    pub degrade_error_threshold: u16,
    /// Consecutive successes before upgrading; zero selects 10.
    pub recovery_success_threshold: u16,
    /// Advisory MODE_SYNC cadence advertised at handshake.
    pub mode_sync_interval: u16,
    /// Advertised willingness to stream. The core never engages streaming;
    /// the bit exists so peers that could are told whether we would accept.
    pub allow_streaming: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            max_performance_mode: TxMode::Window8,
            preferred_initial_mode: TxMode::Window2,
            degrade_error_threshold: 0,
            recovery_success_threshold: 0,
            mode_sync_interval: 0,
            allow_streaming: false,
        }
    }
}

/// Raw 32-bit capability masks. Only bits inside [`Features::builtin`]
/// participate in negotiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureConfig {
    /// Peer must support these or the handshake fails.
    pub required: u32,
    /// Used opportunistically when the peer supports them.
    pub requested: u32,
}

/// Decoded file metadata handed to the validator and callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub filename: String,
    /// Sender-reported origin, advisory only.
    pub sender_path: String,
    pub file_size: u64,
    pub file_crc32: u32,
}

/// Verdict of the optional metadata validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationAction {
    Accept,
    Skip,
    Abort,
}

/// Terminal state of one file, reported through `on_file_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Completed,
    Skipped,
    Aborted,
    /// Any other terminating wire status code.
    Failed(i32),
}

/// Progress snapshot. Totals are zero on the receiving side, which does not
/// learn the batch size in advance.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo<'a> {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub current_file_bytes: u64,
    pub files_completed: u32,
    pub total_files: u32,
    pub transfer_rate_bps: u32,
    pub eta_seconds: u32,
    pub current_filename: &'a str,
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressInfo<'_>) + Send>;
pub type FileStartCallback = Box<dyn FnMut(&str, &str, u64, u64) + Send>;
pub type FileCompleteCallback = Box<dyn FnMut(&str, &str, FileOutcome) + Send>;
pub type MetadataValidator = Box<dyn FnMut(&FileMetadata, &Path) -> ValidationAction + Send>;

/// Host callbacks. All receive plain data and must not attempt to re-enter
/// the session; cancellation from inside a callback goes through
/// [`crate::session::CancelHandle`].
#[derive(Default)]
pub struct SessionCallbacks {
    pub on_progress: Option<ProgressCallback>,
    /// `(filename, sender_path, file_size, resume_offset)`
    pub on_file_start: Option<FileStartCallback>,
    /// `(filename, sender_path, outcome)`
    pub on_file_complete: Option<FileCompleteCallback>,
    /// Invoked after metadata arrives, before resume logic.
    pub validator: Option<MetadataValidator>,
}

/// Complete session configuration.
pub struct SessionConfig {
    /// Proposed total frame size; the handshake adopts the pairwise minimum.
    pub packet_size: usize,
    pub timeouts: TimeoutConfig,
    pub retries: RetryConfig,
    pub resume: ResumeConfig,
    pub adaptive: AdaptiveConfig,
    pub features: FeatureConfig,
    pub callbacks: SessionCallbacks,
    /// Optional CRC delegation, e.g. to a hardware unit.
    pub crc: Option<Box<dyn CrcProvider>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            packet_size: DEFAULT_PACKET_SIZE,
            timeouts: TimeoutConfig::default(),
            retries: RetryConfig::default(),
            resume: ResumeConfig::default(),
            adaptive: AdaptiveConfig::default(),
            features: FeatureConfig::default(),
            callbacks: SessionCallbacks::default(),
            crc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_features_cover_the_defined_bits() {
        assert_eq!(Features::builtin().bits(), 0x3);
        assert!(Features::builtin().contains(Features::CRC_RESUME));
        assert!(Features::builtin().contains(Features::MULTI_FILES));
    }

    #[test]
    fn defaults_are_usable() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.packet_size, DEFAULT_PACKET_SIZE);
        assert_eq!(cfg.resume.mode, ResumeMode::Never);
        assert_eq!(cfg.resume.crc_verify_bytes, DEFAULT_VERIFY_BYTES);
        assert!(cfg.callbacks.on_progress.is_none());
    }
}
