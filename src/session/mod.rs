//! # Session Core
//!
//! A [`Session`] owns one logical connection: the transport, filesystem and
//! clock seams, the reusable frame buffers, sequence counter, negotiated
//! packet size, last-error record, timing estimator, and flow controller.
//! All public operations take `&mut self`; exclusive ownership is what
//! serializes the session, so there is no lock to forget. A cloneable
//! [`CancelHandle`] is the one piece of cross-thread state, polled by the
//! transfer loops between packets.
//!
//! The low-level framer lives here as [`Session::send_packet`] and
//! [`Session::recv_packet`]; the handshake, resume, sender, and receiver
//! state machines build on it from the sibling modules.

mod handshake;
mod receiver;
mod resume;
mod sender;

use crate::adaptive::{AdaptiveTx, TxMode};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::constants::{
    CANCEL_BURST, MAX_PACKET_SIZE, MIN_PACKET_SIZE, WIRE_HEADER_SIZE, WIRE_TRAILER_SIZE,
};
use crate::crc::{crc32 as crc32_oneshot, CrcDigest, CrcProvider};
use crate::error::{status, ErrorDetail, FileWireError};
use crate::filesystem::{StdFs, Vfs};
use crate::metrics::Metrics;
use crate::timing::TimingEstimator;
use crate::transport::Transport;
use crate::wire::payload::{pack_error, pack_mode_sync, parse_mode_sync, ErrorPayload, ModeSync};
use crate::wire::{crc_input, parse_header, stored_header_crc, PacketHeader, PacketType};
use bytes::{BufMut, BytesMut};
use log::{debug, info, trace, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One validated inbound frame.
#[derive(Debug, Clone)]
pub struct Packet {
    pub ty: PacketType,
    pub seq: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Cross-thread cancellation handle. Cloneable and cheap; the owning
/// session observes the flag between I/O operations and performs the
/// cancel wire sequence itself.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub struct Session {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) fs: Box<dyn Vfs>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) cfg: SessionConfig,
    send_buf: BytesMut,
    recv_buf: Vec<u8>,
    seq: u32,
    pub(crate) effective_packet_size: usize,
    pub(crate) handshake_done: bool,
    pub(crate) peer_features: u32,
    pub(crate) peer_streaming: bool,
    pub(crate) send_streaming_allowed: bool,
    pub(crate) recv_streaming_allowed: bool,
    last_error: (i32, u32),
    pub(crate) timing: TimingEstimator,
    pub(crate) adaptive: AdaptiveTx,
    cancel: Arc<AtomicBool>,
    cancel_from_peer: bool,
    cancel_notified: bool,
    pub(crate) output_dir: PathBuf,
    pub(crate) metrics: Metrics,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session over `transport` with the standard filesystem and
    /// clock.
    pub fn new(transport: Box<dyn Transport>, cfg: SessionConfig) -> Result<Session, FileWireError> {
        Session::with_environment(transport, Box::new(StdFs), Box::new(SystemClock::new()), cfg)
    }

    /// Creates a session with every collaborator supplied by the host.
    pub fn with_environment(
        transport: Box<dyn Transport>,
        fs: Box<dyn Vfs>,
        clock: Box<dyn Clock>,
        cfg: SessionConfig,
    ) -> Result<Session, FileWireError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&cfg.packet_size) {
            return Err(FileWireError::InvalidArg { detail: ErrorDetail::PACKET_SIZE });
        }
        let timing = TimingEstimator::new(cfg.timeouts.min_timeout_ms, cfg.timeouts.max_timeout_ms);
        let adaptive = AdaptiveTx::new(&cfg.adaptive);
        let packet_size = cfg.packet_size;
        Ok(Session {
            transport,
            fs,
            clock,
            cfg,
            send_buf: BytesMut::with_capacity(packet_size),
            recv_buf: vec![0; packet_size],
            seq: 1,
            effective_packet_size: packet_size,
            handshake_done: false,
            peer_features: 0,
            peer_streaming: false,
            send_streaming_allowed: false,
            recv_streaming_allowed: false,
            last_error: (status::OK, 0),
            timing,
            adaptive,
            cancel: Arc::new(AtomicBool::new(false)),
            cancel_from_peer: false,
            cancel_notified: false,
            output_dir: PathBuf::new(),
            metrics: Metrics::default(),
        })
    }

    /// Negotiated total frame size, the proposal until the handshake runs.
    pub fn effective_packet_size(&self) -> usize {
        self.effective_packet_size
    }

    /// Largest payload a single DATA packet can carry.
    pub(crate) fn max_payload(&self) -> usize {
        self.effective_packet_size - WIRE_HEADER_SIZE - WIRE_TRAILER_SIZE
    }

    pub fn current_tx_mode(&self) -> TxMode {
        self.adaptive.current()
    }

    /// The peer's last announced window rung.
    pub fn peer_tx_mode(&self) -> TxMode {
        self.adaptive.peer()
    }

    pub fn peer_features(&self) -> u32 {
        self.peer_features
    }

    /// Negotiated streaming permissions `(outbound, inbound)`. Advisory: the
    /// core never engages streaming pacing.
    pub fn streaming_allowed(&self) -> (bool, bool) {
        (self.send_streaming_allowed, self.recv_streaming_allowed)
    }

    /// True while the peer reports streaming pacing engaged.
    pub fn is_peer_streaming(&self) -> bool {
        self.peer_streaming
    }

    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done
    }

    /// Last `(code, detail)` recorded on this session; `(0, 0)` when clean.
    pub fn last_error(&self) -> (i32, u32) {
        self.last_error
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = Metrics::default();
    }

    /// Callback slots, mutable after construction so a host can wire
    /// callbacks that capture this session's [`CancelHandle`].
    pub fn callbacks_mut(&mut self) -> &mut crate::config::SessionCallbacks {
        &mut self.cfg.callbacks
    }

    /// Handle for cancelling this session from another thread or from
    /// inside a progress callback.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { flag: self.cancel.clone() }
    }

    /// True once a local or remote cancel has been observed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.last_error.0 == status::ABORTED
    }

    /// Best-effort cancellation: a short CANCEL burst with backoff, a
    /// transport flush, and the session marked aborted so every loop exits
    /// at its next poll.
    pub fn emergency_cancel(&mut self) -> Result<(), FileWireError> {
        self.cancel.store(true, Ordering::Relaxed);
        if self.send_cancel_burst() {
            Ok(())
        } else {
            Err(FileWireError::Io { detail: ErrorDetail::SEND_FAILED })
        }
    }

    fn send_cancel_burst(&mut self) -> bool {
        let mut any_sent = false;
        let mut backoff = if self.cfg.retries.backoff_ms_base == 0 {
            5
        } else {
            self.cfg.retries.backoff_ms_base
        };
        for attempt in 1..=CANCEL_BURST {
            let sent = self.send_packet(PacketType::Cancel, &[], 0).is_ok();
            debug!("emergency cancel: CANCEL attempt {attempt} sent={sent}");
            any_sent |= sent;
            self.clock.sleep_ms(backoff);
            if backoff < 50 {
                backoff <<= 1;
            }
        }
        let _ = self.transport.flush();
        self.set_last_error(status::ABORTED, 0);
        self.cancel_notified = true;
        any_sent
    }

    /// Terminates the current operation after a local cancel. Notifies the
    /// peer unless the cancel originated from the wire or was already sent.
    pub(crate) fn abort_local(&mut self) -> FileWireError {
        if !self.cancel_from_peer && !self.cancel_notified {
            self.send_cancel_burst();
        } else {
            self.set_last_error(status::ABORTED, 0);
        }
        FileWireError::Aborted
    }

    pub(crate) fn set_last_error(&mut self, code: i32, detail: u32) {
        self.last_error = (code, detail);
    }

    /// Records `err` as the session's last error and hands it back, so call
    /// sites read `return Err(self.fail(...))`.
    pub(crate) fn fail(&mut self, err: FileWireError) -> FileWireError {
        self.set_last_error(err.code(), err.detail());
        err
    }

    /// Doubling backoff between retries; zero base means no delay.
    pub(crate) fn sleep_backoff(&self, backoff: &mut u32) {
        if *backoff > 0 {
            self.clock.sleep_ms(*backoff);
            *backoff <<= 1;
        }
    }

    /// RTT sample for an exchange started at `t0`, unless a retransmission
    /// poisoned it (Karn's rule).
    pub(crate) fn record_rtt_since(&mut self, t0: u32) {
        if self.timing.in_retransmit() {
            return;
        }
        let elapsed = self.clock.now_ms().wrapping_sub(t0);
        self.timing.record_rtt(elapsed);
        self.metrics.inc_rtt_sample();
    }

    pub(crate) fn crc32(&self, data: &[u8]) -> u32 {
        match &self.cfg.crc {
            Some(provider) => provider.checksum(data),
            None => crc32_oneshot(data),
        }
    }

    pub(crate) fn crc_digest(&self) -> Box<dyn CrcDigest> {
        match &self.cfg.crc {
            Some(provider) => provider.digest(),
            None => crate::crc::Crc32Ieee.digest(),
        }
    }

    fn header_crc_ok(&self, raw: &[u8]) -> bool {
        stored_header_crc(raw) == self.crc32(&crc_input(raw))
    }

    /// Sends an ERROR packet; used before terminating so the peer can report
    /// the same failure.
    pub(crate) fn send_error(&mut self, code: i32, detail: u32) -> Result<(), FileWireError> {
        let payload = pack_error(&ErrorPayload { code, detail });
        self.send_packet(PacketType::Error, &payload, 0)
    }

    /// Records a successful exchange with the flow controller, announcing
    /// any rung upgrade.
    pub(crate) fn note_tx_success(&mut self) {
        if let Some(mode) = self.adaptive.record_success() {
            info!("adaptive: upgrading window rung to {:?}", mode);
            self.broadcast_mode_sync(mode);
        }
    }

    /// Records a retransmission with the flow controller, announcing any
    /// rung degrade.
    pub(crate) fn note_tx_error(&mut self) {
        self.metrics.inc_retransmit();
        if let Some(mode) = self.adaptive.record_error() {
            info!("adaptive: degrading window rung to {:?}", mode);
            self.broadcast_mode_sync(mode);
        }
    }

    /// Fire-and-forget MODE_SYNC; the protocol tolerates losing every one.
    fn broadcast_mode_sync(&mut self, mode: TxMode) {
        let (errors, successes) = self.adaptive.counters();
        let sync = ModeSync {
            current_mode: mode.window(),
            sequence: self.adaptive.next_sync_sequence(),
            consecutive_errors: errors,
            consecutive_successes: successes,
            flags: 0,
        };
        let payload = pack_mode_sync(&sync);
        if let Err(err) = self.send_packet(PacketType::ModeSync, &payload, 0) {
            debug!("mode sync dropped: {err}");
        }
    }

    pub(crate) fn emit_file_start(&mut self, filename: &str, sender_path: &str, size: u64, resume: u64) {
        if let Some(cb) = self.cfg.callbacks.on_file_start.as_mut() {
            cb(filename, sender_path, size, resume);
        }
    }

    pub(crate) fn emit_file_complete(
        &mut self,
        filename: &str,
        sender_path: &str,
        outcome: crate::config::FileOutcome,
    ) {
        if let Some(cb) = self.cfg.callbacks.on_file_complete.as_mut() {
            cb(filename, sender_path, outcome);
        }
    }

    /// Streams `remaining` bytes from the file's current position through
    /// the CRC digest. Short reads that never make progress are I/O errors.
    pub(crate) fn crc_over_open_file(
        &self,
        file: &mut dyn crate::filesystem::VfsFile,
        mut remaining: u64,
    ) -> std::io::Result<u32> {
        let mut digest = self.crc_digest();
        let mut buf = vec![0u8; self.effective_packet_size];
        while remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            let mut have = 0;
            while have < take {
                let n = std::io::Read::read(file, &mut buf[have..take])?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "file shrank during CRC",
                    ));
                }
                have += n;
            }
            digest.update(&buf[..take]);
            remaining -= take as u64;
        }
        Ok(digest.finalize())
    }

    /// Frames and transmits one packet: header with its own CRC, payload,
    /// trailer CRC over header + payload, one transport send of the exact
    /// total. Control packets are flushed through.
    pub fn send_packet(
        &mut self,
        ty: PacketType,
        payload: &[u8],
        offset: u64,
    ) -> Result<(), FileWireError> {
        if !self.transport.is_connected() {
            return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
        }
        if payload.len() > self.max_payload() {
            warn!("send_packet: payload {} exceeds MTU budget", payload.len());
            return Err(self.fail(FileWireError::InvalidArg { detail: ErrorDetail::PAYLOAD_SIZE }));
        }
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let header = PacketHeader {
            packet_type: ty as u8,
            wire_version: 0,
            payload_len: payload.len() as u32,
            seq,
            offset,
            header_crc: 0,
        };
        let mut raw = header.to_bytes();
        let header_crc = self.crc32(&raw);
        raw[20..24].copy_from_slice(&header_crc.to_le_bytes());

        self.send_buf.clear();
        self.send_buf.extend_from_slice(&raw);
        self.send_buf.extend_from_slice(payload);
        let trailer_crc = self.crc32(&self.send_buf);
        self.send_buf.put_u32_le(trailer_crc);

        trace!(
            "tx {:?} seq={} off={} len={} hdr={}",
            ty,
            seq,
            offset,
            payload.len(),
            hex::encode(&raw)
        );
        if self.transport.send(&self.send_buf).is_err() {
            warn!("send_packet: transport send failed");
            return Err(self.fail(FileWireError::Io { detail: ErrorDetail::SEND_FAILED }));
        }
        self.metrics.add_sent(WIRE_HEADER_SIZE + payload.len() + WIRE_TRAILER_SIZE, ty as u8);
        if ty.is_control() {
            let _ = self.transport.flush();
        }
        Ok(())
    }

    /// Receives and validates one packet. On a corrupted header the framer
    /// resynchronizes byte by byte until a plausible header passes its CRC
    /// and sanity checks, giving up after one MTU worth of scanning.
    pub fn recv_packet(&mut self, timeout_ms: u32) -> Result<Packet, FileWireError> {
        let max_payload = self.max_payload();
        let mut hdr_raw = [0u8; WIRE_HEADER_SIZE];

        let got = match self.transport.recv(&mut hdr_raw, timeout_ms) {
            Ok(n) => n,
            Err(err) => {
                warn!("recv_packet: transport error on header: {err}");
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::RECV_FAILED }));
            }
        };
        if got != WIRE_HEADER_SIZE {
            debug!("recv_packet: header timeout ({got} bytes)");
            self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_DATA.bits());
            self.metrics.inc_timeout();
            return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_DATA });
        }

        if !self.header_crc_ok(&hdr_raw) {
            warn!("recv_packet: header CRC mismatch, resynchronizing");
            self.set_last_error(status::CRC, ErrorDetail::CRC_HEADER.bits());
            self.metrics.inc_crc_error();
            let mut scanned = 0usize;
            loop {
                hdr_raw.copy_within(1.., 0);
                let got = match self
                    .transport
                    .recv(&mut hdr_raw[WIRE_HEADER_SIZE - 1..], timeout_ms)
                {
                    Ok(n) => n,
                    Err(err) => {
                        warn!("recv_packet: transport error during resync: {err}");
                        return Err(self.fail(FileWireError::Io { detail: ErrorDetail::RECV_FAILED }));
                    }
                };
                if got != 1 {
                    debug!("recv_packet: timeout while resyncing after bad header");
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_DATA.bits());
                    self.metrics.inc_timeout();
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_DATA });
                }
                scanned += 1;
                if self.header_crc_ok(&hdr_raw) {
                    if let Ok((_, candidate)) = parse_header(&hdr_raw) {
                        if candidate.wire_version == 0
                            && candidate.payload_len as usize <= max_payload
                        {
                            debug!("recv_packet: resynchronized after {scanned} bytes");
                            break;
                        }
                    }
                }
                if scanned > self.effective_packet_size {
                    warn!("recv_packet: resync failed after scanning {scanned} bytes");
                    return Err(self.fail(FileWireError::Crc { detail: ErrorDetail::CRC_HEADER }));
                }
            }
        }

        let (_, header) = parse_header(&hdr_raw)
            .map_err(|_| FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })?;
        if header.wire_version != 0 {
            return Err(self.fail(FileWireError::IncompatibleVersion));
        }
        let payload_len = header.payload_len as usize;
        if payload_len > max_payload {
            warn!("recv_packet: payload_len {payload_len} exceeds MTU budget");
            return Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::PAYLOAD_SIZE }));
        }

        if payload_len > 0 {
            let got = match self.transport.recv(&mut self.recv_buf[..payload_len], timeout_ms) {
                Ok(n) => n,
                Err(err) => {
                    warn!("recv_packet: transport error on payload: {err}");
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::RECV_FAILED }));
                }
            };
            if got != payload_len {
                debug!("recv_packet: payload timeout");
                self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_DATA.bits());
                self.metrics.inc_timeout();
                return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_DATA });
            }
        }

        let mut trailer = [0u8; WIRE_TRAILER_SIZE];
        let got = match self.transport.recv(&mut trailer, timeout_ms) {
            Ok(n) => n,
            Err(err) => {
                warn!("recv_packet: transport error on trailer: {err}");
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::RECV_FAILED }));
            }
        };
        if got != WIRE_TRAILER_SIZE {
            debug!("recv_packet: trailer timeout");
            self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_DATA.bits());
            self.metrics.inc_timeout();
            return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_DATA });
        }

        let mut digest = self.crc_digest();
        digest.update(&hdr_raw);
        digest.update(&self.recv_buf[..payload_len]);
        let calc_crc = digest.finalize();
        if u32::from_le_bytes(trailer) != calc_crc {
            warn!("recv_packet: trailer CRC mismatch");
            self.metrics.inc_crc_error();
            return Err(self.fail(FileWireError::Crc { detail: ErrorDetail::CRC_TRAILER }));
        }

        let ty = match PacketType::from_wire(header.packet_type) {
            Some(ty) => ty,
            None => {
                debug!("recv_packet: unknown packet type {}", header.packet_type);
                return Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::UNKNOWN_TYPE }));
            }
        };
        trace!("rx {:?} seq={} off={} len={}", ty, header.seq, header.offset, payload_len);
        self.metrics.add_recv(WIRE_HEADER_SIZE + payload_len + WIRE_TRAILER_SIZE, ty as u8);

        if ty == PacketType::Cancel {
            warn!("recv_packet: observed CANCEL on wire");
            self.set_last_error(status::ABORTED, 0);
            self.cancel.store(true, Ordering::Relaxed);
            self.cancel_from_peer = true;
        }
        if ty == PacketType::ModeSync {
            if let Ok((_, sync)) = parse_mode_sync(&self.recv_buf[..payload_len]) {
                let mode = TxMode::from_wire(sync.current_mode.min(255) as u8);
                debug!("peer announced window rung {:?} (seq {})", mode, sync.sequence);
                self.adaptive.set_peer(mode);
                self.peer_streaming = sync.flags & 1 != 0;
            }
        }

        Ok(Packet {
            ty,
            seq: header.seq,
            offset: header.offset,
            payload: self.recv_buf[..payload_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;

    fn session_pair() -> (Session, Session) {
        let (a, b) = MockLink::pair();
        let sa = Session::new(Box::new(a), SessionConfig::default()).unwrap();
        let sb = Session::new(Box::new(b), SessionConfig::default()).unwrap();
        (sa, sb)
    }

    #[test]
    fn packet_size_bounds_are_enforced() {
        let (a, _b) = MockLink::pair();
        let cfg = SessionConfig { packet_size: 64, ..SessionConfig::default() };
        let err = Session::new(Box::new(a), cfg).unwrap_err();
        assert!(matches!(err, FileWireError::InvalidArg { detail } if detail == ErrorDetail::PACKET_SIZE));
    }

    #[test]
    fn frame_round_trip_over_mock_link() {
        let (mut tx, mut rx) = session_pair();
        tx.send_packet(PacketType::Data, b"chunk of data", 4096).unwrap();
        let pkt = rx.recv_packet(200).unwrap();
        assert_eq!(pkt.ty, PacketType::Data);
        assert_eq!(pkt.offset, 4096);
        assert_eq!(pkt.payload, b"chunk of data");
        assert_eq!(pkt.seq, 1);
    }

    #[test]
    fn sequence_numbers_increase() {
        let (mut tx, mut rx) = session_pair();
        tx.send_packet(PacketType::Data, b"a", 0).unwrap();
        tx.send_packet(PacketType::Data, b"b", 1).unwrap();
        assert_eq!(rx.recv_packet(200).unwrap().seq, 1);
        assert_eq!(rx.recv_packet(200).unwrap().seq, 2);
    }

    #[test]
    fn payload_at_mtu_budget_is_accepted_one_more_rejected() {
        let (mut tx, mut rx) = session_pair();
        let max = tx.max_payload();
        tx.send_packet(PacketType::Data, &vec![0xA5; max], 0).unwrap();
        let pkt = rx.recv_packet(500).unwrap();
        assert_eq!(pkt.payload.len(), max);

        let err = tx.send_packet(PacketType::Data, &vec![0xA5; max + 1], 0).unwrap_err();
        assert!(matches!(err, FileWireError::InvalidArg { detail } if detail == ErrorDetail::PAYLOAD_SIZE));
        assert_eq!(tx.last_error().0, status::INVALID_ARG);
    }

    #[test]
    fn recv_times_out_on_silence() {
        let (_tx, mut rx) = session_pair();
        let err = rx.recv_packet(20).unwrap_err();
        assert!(matches!(err, FileWireError::Timeout { .. }));
    }

    #[test]
    fn corrupted_header_resyncs_to_next_frame() {
        let (a, b) = MockLink::pair();
        let injector = a.raw_sender();
        let mut tx = Session::new(Box::new(a), SessionConfig::default()).unwrap();
        let mut rx = Session::new(Box::new(b), SessionConfig::default()).unwrap();

        // Garbage shorter than one MTU, then a valid frame.
        injector.send(vec![0x55; 64]).unwrap();
        tx.send_packet(PacketType::Data, b"after noise", 7).unwrap();
        let pkt = rx.recv_packet(500).unwrap();
        assert_eq!(pkt.ty, PacketType::Data);
        assert_eq!(pkt.payload, b"after noise");
    }

    #[test]
    fn flipped_trailer_bit_is_detected() {
        let (a, b) = MockLink::pair();
        let injector = a.raw_sender();
        let mut rx = Session::new(Box::new(b), SessionConfig::default()).unwrap();

        // Hand-build a valid frame, then flip one trailer bit.
        let header = PacketHeader {
            packet_type: PacketType::Data as u8,
            wire_version: 0,
            payload_len: 7,
            seq: 1,
            offset: 0,
            header_crc: 0,
        };
        let mut raw = header.to_bytes();
        let header_crc = crc32_oneshot(&raw);
        raw[20..24].copy_from_slice(&header_crc.to_le_bytes());
        let mut frame = raw.to_vec();
        frame.extend_from_slice(b"payload");
        let trailer = crc32_oneshot(&frame);
        frame.extend_from_slice(&trailer.to_le_bytes());
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        injector.send(frame).unwrap();
        let err = rx.recv_packet(200).unwrap_err();
        assert!(matches!(err, FileWireError::Crc { detail } if detail == ErrorDetail::CRC_TRAILER));
        drop(a);
    }

    #[test]
    fn emergency_cancel_bursts_cancels_and_marks_aborted() {
        let (mut tx, mut rx) = session_pair();
        tx.emergency_cancel().unwrap();
        assert!(tx.is_cancelled());
        assert_eq!(tx.last_error().0, status::ABORTED);
        let pkt = rx.recv_packet(200).unwrap();
        assert_eq!(pkt.ty, PacketType::Cancel);
        assert!(rx.is_cancelled());
    }

    #[test]
    fn cancel_packet_marks_session_aborted_but_is_returned() {
        let (mut tx, mut rx) = session_pair();
        tx.send_packet(PacketType::Cancel, &[], 0).unwrap();
        let pkt = rx.recv_packet(200).unwrap();
        assert_eq!(pkt.ty, PacketType::Cancel);
        assert!(rx.is_cancelled());
        assert_eq!(rx.last_error().0, status::ABORTED);
    }

    #[test]
    fn mode_sync_updates_peer_mode_only() {
        let (mut tx, mut rx) = session_pair();
        let sync = ModeSync {
            current_mode: 16,
            sequence: 1,
            consecutive_errors: 0,
            consecutive_successes: 0,
            flags: 0,
        };
        tx.send_packet(PacketType::ModeSync, &pack_mode_sync(&sync), 0).unwrap();
        let before = rx.current_tx_mode();
        let pkt = rx.recv_packet(200).unwrap();
        assert_eq!(pkt.ty, PacketType::ModeSync);
        assert_eq!(rx.peer_tx_mode(), TxMode::Window16);
        assert_eq!(rx.current_tx_mode(), before);
    }

    #[test]
    fn cancel_handle_is_visible_across_clones() {
        let (tx, _rx) = session_pair();
        let handle = tx.cancel_handle();
        assert!(!tx.is_cancelled());
        handle.cancel();
        assert!(tx.is_cancelled());
    }
}
