//! Sender loop.
//!
//! Per file: compute the whole-file CRC, announce metadata, negotiate
//! resume (answering the receiver's CRC probe when asked), then stream DATA
//! chunks and follow the receiver's cumulative ACKs — the ACK offset is the
//! receiver's next expected byte, so the sender reconciles its file cursor
//! to whatever the ACK says, forward or backward, and duplicate or
//! reordered ACKs are harmless. DONE/DONE_ACK closes each file and a final
//! EOT/EOT_ACK closes the batch; the session stays usable for further
//! batches afterwards.

use crate::config::{FileOutcome, ProgressInfo};
use crate::constants::{WIRE_RESUME_RESP_SIZE, WIRE_VERIFY_STATUS_SIZE};
use crate::error::{status, ErrorDetail, FileWireError};
use crate::filesystem::OpenMode;
use crate::session::Session;
use crate::timing::Operation;
use crate::util::{clean_filename, clean_path};
use crate::wire::payload::{
    pack_meta, pack_resume_resp, pack_verify_status, parse_resume_resp, parse_verify_status, Meta,
    ResumeAction, ResumeResp,
};
use crate::wire::PacketType;
use log::{debug, info, warn};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Cumulative progress across one `send_files` batch.
struct BatchProgress {
    total_bytes: u64,
    transferred: u64,
    total_files: u32,
    files_completed: u32,
    start_ms: u32,
}

/// Outcome of the resume negotiation for one file.
enum SendPlan {
    /// Begin (or continue) sending at this offset.
    Start(u64),
    /// The receiver declined the file; jump straight to DONE.
    Skip,
}

fn outcome_of(err: &FileWireError) -> FileOutcome {
    match err {
        FileWireError::Aborted => FileOutcome::Aborted,
        other => FileOutcome::Failed(other.code()),
    }
}

impl Session {
    /// Sends a batch of files, then EOT. The optional `path_hint` is an
    /// advisory origin string included in each file's metadata; receivers
    /// must treat it as informational only.
    pub fn send_files<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        path_hint: Option<&str>,
    ) -> Result<(), FileWireError> {
        if paths.is_empty() {
            return Err(self.fail(FileWireError::InvalidArg { detail: ErrorDetail::empty() }));
        }
        self.handshake_sender()?;

        let mut batch = BatchProgress {
            total_bytes: 0,
            transferred: 0,
            total_files: paths.len() as u32,
            files_completed: 0,
            start_ms: 0,
        };
        // Best-effort pre-scan so progress can report a batch total.
        for path in paths {
            if let Ok((size, _)) = self.file_size_and_name(path.as_ref()) {
                batch.total_bytes += size;
            }
        }
        batch.start_ms = self.clock.now_ms();

        for (index, path) in paths.iter().enumerate() {
            info!(
                "send_files: sending [{}/{}] '{}'",
                index + 1,
                paths.len(),
                path.as_ref().display()
            );
            self.send_file(path.as_ref(), path_hint, &mut batch)?;
        }

        self.send_packet(PacketType::Eot, &[], 0)?;
        self.wait_eot_ack()
    }

    fn file_size_and_name(&mut self, path: &Path) -> Result<(u64, String), FileWireError> {
        let mut file = match self.fs.open(path, OpenMode::Read) {
            Ok(f) => f,
            Err(err) => {
                warn!("open '{}' failed: {err}", path.display());
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::FILE_NOT_FOUND }));
            }
        };
        let size = match crate::filesystem::file_size(file.as_mut()) {
            Ok(n) => n,
            Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
        };
        let base = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok((size, clean_filename(&base)))
    }

    /// Whole-file CRC, streamed with cancellation polled between chunks.
    fn compute_whole_file_crc(&mut self, path: &Path) -> Result<u32, FileWireError> {
        let mut file = match self.fs.open(path, OpenMode::Read) {
            Ok(f) => f,
            Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::FILE_NOT_FOUND })),
        };
        let mut digest = self.crc_digest();
        let mut buf = vec![0u8; self.effective_packet_size];
        loop {
            if self.is_cancelled() {
                warn!("file CRC: local cancel");
                return Err(self.abort_local());
            }
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => digest.update(&buf[..n]),
                Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
            }
        }
        Ok(digest.finalize())
    }

    /// CRC over `[end_offset - len, end_offset)` of the source file, the
    /// window named by a receiver's verify-first response.
    fn crc_region(&mut self, path: &Path, end_offset: u64, len: u64) -> Result<u32, FileWireError> {
        let mut file = match self.fs.open(path, OpenMode::Read) {
            Ok(f) => f,
            Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
        };
        if file.seek(SeekFrom::Start(end_offset - len)).is_err() {
            return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
        }
        match self.crc_over_open_file(file.as_mut(), len) {
            Ok(crc) => Ok(crc),
            Err(_) => Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
        }
    }

    /// Sends RESUME_REQ and follows the receiver's decision, including the
    /// CRC verification round-trip when asked for one.
    fn request_resume(&mut self, path: &Path, file_size: u64) -> Result<SendPlan, FileWireError> {
        self.send_packet(PacketType::ResumeReq, &[], 0)?;
        debug!("resume: sent RESUME_REQ");

        let timeout = self.timing.timeout_for(Operation::Verify);
        let mut tries = self.cfg.retries.ack_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let t0 = self.clock.now_ms();
        self.timing.clear_retransmit();
        let resp: ResumeResp = loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::ResumeResp => {
                        if pkt.payload.len() < WIRE_RESUME_RESP_SIZE {
                            return Err(self
                                .fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT }));
                        }
                        match parse_resume_resp(&pkt.payload) {
                            Ok((_, resp)) => {
                                self.record_rtt_since(t0);
                                break resp;
                            }
                            Err(_) => {
                                return Err(self.fail(FileWireError::Protocol {
                                    detail: ErrorDetail::MALFORMED_PKT,
                                }))
                            }
                        }
                    }
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    other => {
                        warn!("resume: expected RESUME_RESP, got {other:?}");
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })
                        );
                    }
                },
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("resume: timeout, retransmitting RESUME_REQ");
                    self.timing.mark_retransmit();
                    self.send_packet(PacketType::ResumeReq, &[], 0)?;
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_ACK.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_ACK });
                }
                Err(err) => return Err(err),
            }
        };
        info!(
            "resume: action={} offset={} verify_len={}",
            resp.action, resp.resume_offset, resp.verify_len
        );

        match ResumeAction::from_wire(resp.action) {
            Some(ResumeAction::VerifyFirst) => self.answer_verify_first(path, file_size, resp),
            Some(ResumeAction::StartOffset) => Ok(SendPlan::Start(resp.resume_offset)),
            Some(ResumeAction::SkipFile) => Ok(SendPlan::Skip),
            Some(ResumeAction::AbortFile) => {
                warn!("resume: receiver aborted the file");
                Err(self.fail(FileWireError::Aborted))
            }
            Some(ResumeAction::StartZero) | None => Ok(SendPlan::Start(0)),
        }
    }

    /// Computes the requested CRC window, sends VERIFY, and interprets the
    /// receiver's verdict.
    fn answer_verify_first(
        &mut self,
        path: &Path,
        file_size: u64,
        resp: ResumeResp,
    ) -> Result<SendPlan, FileWireError> {
        if resp.verify_len == 0 || resp.resume_offset < resp.verify_len {
            // No valid window to check; tell the receiver and restart clean.
            warn!("verify: invalid region from receiver, restarting at 0");
            let _ = self.send_packet(
                PacketType::Verify,
                &pack_verify_status(status::RESUME_VERIFY),
                0,
            );
            return Ok(SendPlan::Start(0));
        }
        let crc = self.crc_region(path, resp.resume_offset, resp.verify_len)?;
        let echo = ResumeResp { verify_crc: crc, ..resp };
        let wire = pack_resume_resp(&echo);
        self.send_packet(PacketType::Verify, &wire, 0)?;
        debug!("verify: sent our CRC for [{}, {})", resp.resume_offset - resp.verify_len, resp.resume_offset);

        let timeout = self.timing.timeout_for(Operation::Verify);
        let mut tries = self.cfg.retries.ack_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let t0 = self.clock.now_ms();
        self.timing.clear_retransmit();
        let verdict: i32 = loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            if self.is_cancelled() {
                warn!("verify: local cancel while waiting for verdict");
                return Err(self.abort_local());
            }
            match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::Verify => {
                        self.record_rtt_since(t0);
                        if pkt.payload.len() >= WIRE_VERIFY_STATUS_SIZE {
                            match parse_verify_status(&pkt.payload) {
                                Ok((_, code)) => break code,
                                Err(_) => break status::OK,
                            }
                        }
                        break status::OK;
                    }
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    PacketType::Error => {
                        warn!("verify: peer reported an error");
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::empty() })
                        );
                    }
                    // Retransmission strays; keep waiting for the verdict.
                    other => debug!("verify: ignoring {other:?} during verdict wait"),
                },
                Err(FileWireError::Protocol { detail }) if detail == ErrorDetail::UNKNOWN_TYPE => {
                    debug!("verify: ignoring unknown packet type");
                }
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("verify: timeout, retransmitting VERIFY");
                    self.timing.mark_retransmit();
                    self.send_packet(PacketType::Verify, &wire, 0)?;
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_ACK.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_ACK });
                }
                Err(err) => return Err(err),
            }
        };
        debug!("verify: receiver verdict {verdict}");

        match verdict {
            status::RESUME_VERIFY => Ok(SendPlan::Start(0)),
            status::SKIPPED => Ok(SendPlan::Skip),
            status::ABORTED => {
                warn!("verify: receiver aborted the file");
                Err(self.fail(FileWireError::Aborted))
            }
            code if code < 0 => Err(self.fail(FileWireError::from_wire(code, 0))),
            // OK, or a future positive status: resume where the receiver said.
            _ => {
                if resp.resume_offset >= file_size {
                    Ok(SendPlan::Skip)
                } else {
                    Ok(SendPlan::Start(resp.resume_offset))
                }
            }
        }
    }

    fn send_file(
        &mut self,
        path: &Path,
        path_hint: Option<&str>,
        batch: &mut BatchProgress,
    ) -> Result<(), FileWireError> {
        let (size, filename) = self.file_size_and_name(path)?;
        let reported = match path_hint {
            Some(hint) if !hint.is_empty() => clean_path(hint),
            _ => clean_path(&path.to_string_lossy()),
        };

        let file_crc = self.compute_whole_file_crc(path)?;
        let meta = Meta {
            filename: filename.clone(),
            sender_path: reported.clone(),
            file_size: size,
            file_crc32: file_crc,
        };
        self.send_packet(PacketType::SendMeta, &pack_meta(&meta), 0)?;
        info!("sent SEND_META for '{filename}' ({size} bytes, crc {file_crc:#010x})");

        let resume_off = match self.request_resume(path, size)? {
            SendPlan::Skip => {
                info!("receiver elected to skip '{filename}'");
                self.emit_file_start(&filename, &reported, size, size);
                if let Err(err) = self.finish_done(size) {
                    self.emit_file_complete(&filename, &reported, outcome_of(&err));
                    return Err(err);
                }
                self.emit_file_complete(&filename, &reported, FileOutcome::Skipped);
                batch.files_completed += 1;
                batch.transferred += size;
                self.emit_progress(batch, &filename, size, false);
                return Ok(());
            }
            SendPlan::Start(offset) => offset,
        };

        let mut file = match self.fs.open(path, OpenMode::Read) {
            Ok(f) => f,
            Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
        };
        if resume_off != 0 && file.seek(SeekFrom::Start(resume_off)).is_err() {
            return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
        }

        self.emit_file_start(&filename, &reported, size, resume_off);
        // Initial snapshot at the resume offset, before any data moves, so a
        // UI (or a cancel triggered from it) reacts before the first chunk.
        self.emit_progress(batch, &filename, resume_off, true);
        if self.is_cancelled() {
            let err = self.abort_local();
            self.emit_file_complete(&filename, &reported, FileOutcome::Aborted);
            return Err(err);
        }

        let max_payload = self.max_payload();
        let mut chunk = vec![0u8; max_payload];
        let mut sent = resume_off;
        let mut pos = resume_off;

        while sent < size {
            let to_read = (size - sent).min(max_payload as u64) as usize;
            if pos != sent {
                if file.seek(SeekFrom::Start(sent)).is_err() {
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
                }
                pos = sent;
            }

            // Fill the chunk; one reopen+seek recovery for a transient short
            // read mid-file before giving up.
            let mut have = 0usize;
            let mut reopen_retry = true;
            loop {
                while have < to_read {
                    if self.is_cancelled() {
                        let err = self.abort_local();
                        self.emit_file_complete(&filename, &reported, FileOutcome::Aborted);
                        return Err(err);
                    }
                    match file.read(&mut chunk[have..to_read]) {
                        Ok(0) => break,
                        Ok(n) => have += n,
                        Err(_) => {
                            return Err(
                                self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })
                            )
                        }
                    }
                }
                if have == to_read {
                    break;
                }
                if !reopen_retry {
                    warn!("read stalled at offset {} ({}/{} bytes)", sent, have, to_read);
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
                }
                reopen_retry = false;
                debug!("short read at offset {sent}, reopening source");
                file = match self.fs.open(path, OpenMode::Read) {
                    Ok(f) => f,
                    Err(_) => {
                        return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }))
                    }
                };
                if file.seek(SeekFrom::Start(sent)).is_err() {
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
                }
                have = 0;
            }
            pos = sent + to_read as u64;

            debug!("data: sending chunk off={sent} len={to_read}");
            self.send_packet(PacketType::Data, &chunk[..to_read], sent)?;

            let timeout = self.timing.timeout_for(Operation::DataAck);
            let mut tries = self.cfg.retries.ack_retries;
            let mut backoff = self.cfg.retries.backoff_ms_base;
            let t0 = self.clock.now_ms();
            self.timing.clear_retransmit();
            loop {
                if !self.transport.is_connected() {
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
                }
                if self.is_cancelled() {
                    let err = self.abort_local();
                    self.emit_file_complete(&filename, &reported, FileOutcome::Aborted);
                    return Err(err);
                }
                match self.recv_packet(timeout) {
                    Ok(pkt) => match pkt.ty {
                        PacketType::DataAck => {
                            self.record_rtt_since(t0);
                            self.note_tx_success();
                            let ack = pkt.offset;
                            if ack > sent + to_read as u64 {
                                debug!("data: receiver ahead, jumping to {ack}");
                            } else if ack < sent {
                                debug!("data: receiver rewound to {ack}");
                            }
                            // Cumulative semantics: the ACK names the next
                            // expected byte; converge on it unconditionally.
                            sent = ack;
                            break;
                        }
                        PacketType::Cancel => {
                            warn!("data: received CANCEL");
                            self.emit_file_complete(&filename, &reported, FileOutcome::Aborted);
                            return Err(FileWireError::Aborted);
                        }
                        PacketType::Error => {
                            warn!("data: peer reported an error");
                            return Err(
                                self.fail(FileWireError::Protocol { detail: ErrorDetail::empty() })
                            );
                        }
                        other => {
                            warn!("data: expected DATA_ACK, got {other:?}");
                            return Err(self
                                .fail(FileWireError::Protocol { detail: ErrorDetail::UNKNOWN_TYPE }));
                        }
                    },
                    Err(FileWireError::Timeout { .. }) | Err(FileWireError::Crc { .. })
                        if tries > 0 =>
                    {
                        debug!("data: no usable ACK, retransmitting chunk at {sent}");
                        self.timing.mark_retransmit();
                        self.note_tx_error();
                        self.send_packet(PacketType::Data, &chunk[..to_read], sent)?;
                        self.sleep_backoff(&mut backoff);
                        tries -= 1;
                    }
                    Err(FileWireError::Timeout { .. }) => {
                        self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_ACK.bits());
                        let err = FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_ACK };
                        self.emit_file_complete(&filename, &reported, outcome_of(&err));
                        return Err(err);
                    }
                    Err(err) => return Err(err),
                }
            }
            self.emit_progress(batch, &filename, sent, true);
        }

        if self.is_cancelled() {
            let err = self.abort_local();
            self.emit_file_complete(&filename, &reported, FileOutcome::Aborted);
            return Err(err);
        }

        if let Err(err) = self.finish_done(size) {
            self.emit_file_complete(&filename, &reported, outcome_of(&err));
            return Err(err);
        }
        self.emit_file_complete(&filename, &reported, FileOutcome::Completed);
        self.metrics.inc_file_sent();
        batch.files_completed += 1;
        batch.transferred += size;
        self.emit_progress(batch, &filename, size, false);
        Ok(())
    }

    /// DONE / DONE_ACK with retries. Any stray packet other than the ACK
    /// (late duplicate DATA_ACKs, for instance) re-arms the DONE
    /// retransmission.
    fn finish_done(&mut self, size: u64) -> Result<(), FileWireError> {
        self.send_packet(PacketType::Done, &[], size)?;
        let timeout = self.timing.timeout_for(Operation::DoneAck);
        let mut tries = self.cfg.retries.ack_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let t0 = self.clock.now_ms();
        self.timing.clear_retransmit();
        loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            if self.is_cancelled() {
                return Err(self.abort_local());
            }
            let retry = match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::DoneAck => {
                        self.record_rtt_since(t0);
                        return Ok(());
                    }
                    PacketType::Error => {
                        warn!("done: peer reported an error");
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::empty() })
                        );
                    }
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    other => {
                        debug!("done: ignoring {other:?}, re-sending DONE");
                        true
                    }
                },
                Err(FileWireError::Timeout { .. }) | Err(FileWireError::Crc { .. }) => true,
                Err(FileWireError::Protocol { detail }) if detail == ErrorDetail::UNKNOWN_TYPE => {
                    true
                }
                Err(err) => return Err(err),
            };
            if retry {
                if tries == 0 {
                    warn!("done: retries exhausted");
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_ACK.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_ACK });
                }
                self.timing.mark_retransmit();
                self.send_packet(PacketType::Done, &[], size)?;
                self.sleep_backoff(&mut backoff);
                tries -= 1;
            }
        }
    }

    fn wait_eot_ack(&mut self) -> Result<(), FileWireError> {
        let timeout = self.timing.timeout_for(Operation::EotAck);
        let mut tries = self.cfg.retries.ack_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let t0 = self.clock.now_ms();
        self.timing.clear_retransmit();
        loop {
            if self.is_cancelled() {
                warn!("eot: local cancel while waiting for EOT_ACK");
                return Err(self.abort_local());
            }
            let retry = match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::EotAck => {
                        self.record_rtt_since(t0);
                        info!("batch complete");
                        return Ok(());
                    }
                    PacketType::Error => {
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::empty() })
                        )
                    }
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    other => {
                        debug!("eot: ignoring {other:?}, re-sending EOT");
                        true
                    }
                },
                Err(FileWireError::Timeout { .. }) | Err(FileWireError::Crc { .. }) => true,
                Err(FileWireError::Protocol { detail }) if detail == ErrorDetail::UNKNOWN_TYPE => {
                    true
                }
                Err(err) => return Err(err),
            };
            if retry {
                if tries == 0 {
                    warn!("eot: retries exhausted");
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_ACK.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_ACK });
                }
                self.timing.mark_retransmit();
                self.send_packet(PacketType::Eot, &[], 0)?;
                self.sleep_backoff(&mut backoff);
                tries -= 1;
            }
        }
    }

    /// Progress snapshot for the sending side, with rate and ETA derived
    /// from the batch clock. `include_current` folds the in-flight file's
    /// bytes into the batch total.
    fn emit_progress(
        &mut self,
        batch: &BatchProgress,
        filename: &str,
        current_file_bytes: u64,
        include_current: bool,
    ) {
        if self.cfg.callbacks.on_progress.is_none() {
            return;
        }
        let bytes_transferred =
            batch.transferred + if include_current { current_file_bytes } else { 0 };
        let now = self.clock.now_ms();
        let elapsed_ms = now.wrapping_sub(batch.start_ms);
        let (rate, eta) = if elapsed_ms > 0 {
            let bps = bytes_transferred.saturating_mul(1000) / u64::from(elapsed_ms);
            let eta = if batch.total_bytes > bytes_transferred && bps > 0 {
                ((batch.total_bytes - bytes_transferred) / bps).min(u64::from(u32::MAX)) as u32
            } else {
                0
            };
            (bps.min(u64::from(u32::MAX)) as u32, eta)
        } else {
            (0, 0)
        };
        let snapshot = ProgressInfo {
            bytes_transferred,
            total_bytes: batch.total_bytes,
            current_file_bytes,
            files_completed: batch.files_completed,
            total_files: batch.total_files,
            transfer_rate_bps: rate,
            eta_seconds: eta,
            current_filename: filename,
        };
        if let Some(cb) = self.cfg.callbacks.on_progress.as_mut() {
            cb(&snapshot);
        }
    }
}
