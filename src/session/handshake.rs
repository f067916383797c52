//! HELLO exchange.
//!
//! The sender speaks first; both sides then independently take the
//! element-wise minimum of packet size, window cap, and starting rung, so
//! they agree without a third message. Validation order: magic, major
//! version, negotiated MTU bounds, then required-feature coverage — a
//! missing-feature failure is reported to the peer with an ERROR packet
//! before the session gives up, so both ends fail with the same diagnosis.
//! The handshake runs at most once per session, triggered by the first
//! `send_files` or `receive_files` call.

use crate::config::Features;
use crate::constants::{
    MAX_PACKET_SIZE, MIN_PACKET_SIZE, PROTOCOL_MAGIC, VERSION_MAJOR, VERSION_MINOR,
    WIRE_HELLO_SIZE,
};
use crate::error::{status, ErrorDetail, FileWireError};
use crate::session::Session;
use crate::timing::Operation;
use crate::wire::payload::{pack_hello, parse_error, parse_hello, Hello};
use crate::wire::PacketType;
use log::{debug, info, trace};

impl Session {
    fn local_hello(&self, packet_size: u32) -> Hello {
        let negotiable = Features::builtin().bits();
        Hello {
            magic: PROTOCOL_MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            packet_size,
            supported: negotiable,
            required: self.cfg.features.required & negotiable,
            requested: self.cfg.features.requested & negotiable,
            max_performance_mode: self.cfg.adaptive.max_performance_mode as u8,
            preferred_initial_mode: self.cfg.adaptive.preferred_initial_mode as u8,
            mode_sync_interval: self.cfg.adaptive.mode_sync_interval,
            streaming_flags: if self.cfg.adaptive.allow_streaming { 0x3 } else { 0 },
        }
    }

    /// Required bits outside this build's negotiable mask can never be
    /// satisfied; fail before anything reaches the wire.
    fn validate_local_features(&mut self) -> Result<(), FileWireError> {
        let missing = self.cfg.features.required & !Features::builtin().bits();
        if missing != 0 {
            return Err(self.fail(FileWireError::FeatureNegotiation { missing }));
        }
        Ok(())
    }

    fn adopt_packet_size(&mut self, peer_proposed: u32) -> Result<(), FileWireError> {
        let negotiated = (peer_proposed as usize).min(self.cfg.packet_size);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&negotiated) {
            return Err(self.fail(FileWireError::PacketSizeMismatch));
        }
        self.effective_packet_size = negotiated;
        Ok(())
    }

    fn validate_peer_identity(&mut self, peer: &Hello) -> Result<(), FileWireError> {
        if peer.magic != PROTOCOL_MAGIC {
            return Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT }));
        }
        if peer.version_major != VERSION_MAJOR {
            return Err(self.fail(FileWireError::IncompatibleVersion));
        }
        Ok(())
    }

    /// Our masked required bits must all appear in the peer's supported set.
    /// On failure the peer is told which bits were missing.
    fn enforce_required_features(&mut self, peer: &Hello) -> Result<(), FileWireError> {
        let required = self.cfg.features.required & Features::builtin().bits();
        let missing_on_peer = required & !peer.supported;
        if missing_on_peer != 0 {
            let _ = self.send_error(status::FEATURE_NEGOTIATION, missing_on_peer);
            return Err(self.fail(FileWireError::FeatureNegotiation { missing: missing_on_peer }));
        }
        Ok(())
    }

    fn finish_negotiation(&mut self, peer: &Hello) {
        self.peer_features = peer.supported;
        self.adaptive
            .negotiate(&self.cfg.adaptive, peer.max_performance_mode, peer.preferred_initial_mode);
        let peer_rx_accept = peer.streaming_flags & 0x2 != 0;
        self.send_streaming_allowed = self.cfg.adaptive.allow_streaming && peer_rx_accept;
        self.recv_streaming_allowed = self.cfg.adaptive.allow_streaming;
        self.handshake_done = true;
        self.metrics.inc_handshake();
        info!(
            "handshake complete: mtu={} window cap={:?} starting rung={:?}",
            self.effective_packet_size,
            self.adaptive.cap(),
            self.adaptive.current()
        );
    }

    fn parse_peer_hello(&mut self, payload: &[u8]) -> Result<Hello, FileWireError> {
        if payload.len() < WIRE_HELLO_SIZE {
            return Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT }));
        }
        match parse_hello(payload) {
            Ok((_, hello)) => Ok(hello),
            Err(_) => Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })),
        }
    }

    /// Maps an ERROR packet received mid-handshake back into the failure the
    /// peer diagnosed, so both ends report the same cause.
    fn peer_reported_error(&mut self, payload: &[u8]) -> FileWireError {
        let err = match parse_error(payload) {
            Ok((_, e)) => FileWireError::from_wire(e.code, e.detail),
            Err(_) => FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT },
        };
        self.fail(err)
    }

    pub(crate) fn handshake_sender(&mut self) -> Result<(), FileWireError> {
        if self.handshake_done {
            return Ok(());
        }
        self.validate_local_features()?;
        let hello = self.local_hello(self.cfg.packet_size as u32);
        let wire = pack_hello(&hello);
        trace!("handshake(sender): sending HELLO");
        self.send_packet(PacketType::Hello, &wire, 0)?;

        let timeout = self.timing.timeout_for(Operation::Handshake);
        let mut tries = self.cfg.retries.handshake_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let peer = loop {
            match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::Hello => break self.parse_peer_hello(&pkt.payload)?,
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    PacketType::Error => return Err(self.peer_reported_error(&pkt.payload)),
                    _ => {
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })
                        )
                    }
                },
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("handshake(sender): timeout, retransmitting HELLO");
                    self.send_packet(PacketType::Hello, &wire, 0)?;
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_HELLO.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_HELLO });
                }
                Err(err) => return Err(err),
            }
        };

        self.validate_peer_identity(&peer)?;
        self.adopt_packet_size(peer.packet_size)?;
        self.enforce_required_features(&peer)?;
        self.finish_negotiation(&peer);
        Ok(())
    }

    pub(crate) fn handshake_receiver(&mut self) -> Result<(), FileWireError> {
        if self.handshake_done {
            return Ok(());
        }
        self.validate_local_features()?;

        let timeout = self.timing.timeout_for(Operation::Handshake);
        let mut tries = self.cfg.retries.handshake_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let peer = loop {
            match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::Hello => break self.parse_peer_hello(&pkt.payload)?,
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    PacketType::Error => return Err(self.peer_reported_error(&pkt.payload)),
                    _ => {
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })
                        )
                    }
                },
                // The receiver stays quiet until a HELLO arrives.
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("handshake(receiver): still waiting for HELLO");
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_HELLO.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_HELLO });
                }
                Err(err) => return Err(err),
            }
        };

        self.validate_peer_identity(&peer)?;
        self.adopt_packet_size(peer.packet_size)?;
        self.enforce_required_features(&peer)?;

        // Reply with the already-negotiated size so the sender's own
        // min-rule lands on the same value.
        let hello = self.local_hello(self.effective_packet_size as u32);
        trace!("handshake(receiver): sending HELLO response");
        self.send_packet(PacketType::Hello, &pack_hello(&hello), 0)?;
        self.finish_negotiation(&peer);
        Ok(())
    }
}
