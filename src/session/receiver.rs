//! Receiver loop.
//!
//! Waits for file metadata (or EOT, which ends the batch), sanitizes the
//! name, consults the optional validator and the resume engine, then writes
//! DATA in order while answering every chunk with a cumulative ACK naming
//! the next byte it expects. Duplicates and gaps are dropped without
//! rolling anything back — the ACK alone steers the sender — and the
//! running whole-file CRC is checked against the announced one when DONE
//! arrives. The receiver alone decides output paths: the configured output
//! directory joined with the sanitized basename, never the sender's hint.

use crate::config::{FileMetadata, FileOutcome, ProgressInfo, ValidationAction};
use crate::constants::WIRE_META_SIZE;
use crate::error::{status, ErrorDetail, FileWireError};
use crate::filesystem::OpenMode;
use crate::session::{Packet, Session};
use crate::timing::Operation;
use crate::util::clean_filename;
use crate::wire::payload::{parse_meta, ResumeAction};
use crate::wire::PacketType;
use log::{debug, info, warn};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

impl Session {
    /// Receives files into `output_dir` until the sender's EOT. Runs the
    /// handshake first if this session has not completed one.
    pub fn receive_files<P: AsRef<Path>>(&mut self, output_dir: P) -> Result<(), FileWireError> {
        self.output_dir = output_dir.as_ref().to_path_buf();
        self.handshake_receiver()?;
        self.receive_batch()
    }

    /// Waits for the next SEND_META (or EOT), tolerating metadata-wait
    /// timeouts up to the configured retry budget.
    fn await_metadata(&mut self) -> Result<Packet, FileWireError> {
        let timeout = self.timing.timeout_for(Operation::Meta);
        let mut tries = self.cfg.retries.meta_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            if self.is_cancelled() {
                warn!("recv: local cancel before metadata");
                return Err(self.abort_local());
            }
            match self.recv_packet(timeout) {
                Ok(pkt) => return Ok(pkt),
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("recv: waiting for metadata");
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_META.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_META });
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn receive_batch(&mut self) -> Result<(), FileWireError> {
        let mut batch_transferred: u64 = 0;
        let mut files_completed: u32 = 0;
        let start_ms = self.clock.now_ms();

        loop {
            let pkt = self.await_metadata()?;
            let meta = match pkt.ty {
                PacketType::Eot => {
                    let _ = self.send_packet(PacketType::EotAck, &[], 0);
                    return Ok(());
                }
                PacketType::Cancel => {
                    warn!("recv: CANCEL while waiting for metadata");
                    return Err(FileWireError::Aborted);
                }
                PacketType::SendMeta => {
                    if pkt.payload.len() < WIRE_META_SIZE {
                        return Err(
                            self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })
                        );
                    }
                    match parse_meta(&pkt.payload) {
                        Ok((_, m)) => FileMetadata {
                            filename: m.filename,
                            sender_path: m.sender_path,
                            file_size: m.file_size,
                            file_crc32: m.file_crc32,
                        },
                        Err(_) => {
                            return Err(self
                                .fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT }))
                        }
                    }
                }
                other => {
                    warn!("recv: expected SEND_META, got {other:?}");
                    return Err(
                        self.fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT })
                    );
                }
            };

            // The receiver owns the output path: its directory, the
            // sanitized basename, and nothing from the sender's hint.
            let meta = FileMetadata { filename: clean_filename(&meta.filename), ..meta };
            let target: PathBuf = if self.output_dir.as_os_str().is_empty() {
                PathBuf::from(&meta.filename)
            } else {
                self.output_dir.join(&meta.filename)
            };
            info!(
                "incoming file '{}' ({} bytes) -> '{}'",
                meta.filename,
                meta.file_size,
                target.display()
            );

            let mut validation_skipped = false;
            let mut resume_off = 0u64;
            let verdict = match self.cfg.callbacks.validator.as_mut() {
                Some(validator) => validator(&meta, &target),
                None => ValidationAction::Accept,
            };
            match verdict {
                ValidationAction::Accept => {}
                ValidationAction::Skip => {
                    info!("validator skipped '{}'", meta.filename);
                    let _ = self.send_resume_response(ResumeAction::SkipFile, 0, 0, 0);
                    validation_skipped = true;
                    resume_off = meta.file_size;
                    self.emit_file_start(&meta.filename, &meta.sender_path, meta.file_size, meta.file_size);
                }
                ValidationAction::Abort => {
                    warn!("validator aborted '{}'", meta.filename);
                    let _ = self.send_resume_response(ResumeAction::AbortFile, 0, 0, 0);
                    return Err(self.fail(FileWireError::Aborted));
                }
            }

            if !validation_skipped {
                resume_off = match self.handle_file_resume(&meta, &target) {
                    Ok(offset) => offset,
                    Err(FileWireError::Aborted) => {
                        let _ = self.send_error(status::ABORTED, 0);
                        return Err(FileWireError::Aborted);
                    }
                    Err(err) => return Err(err),
                };
            }
            let skipping = resume_off >= meta.file_size;

            match self.receive_one_file(&meta, &target, resume_off, skipping, batch_transferred, files_completed, start_ms) {
                Ok(()) => {}
                Err(err) => return Err(err),
            }

            self.emit_file_complete(
                &meta.filename,
                &meta.sender_path,
                if skipping { FileOutcome::Skipped } else { FileOutcome::Completed },
            );
            self.metrics.inc_file_recv();
            files_completed += 1;
            batch_transferred += meta.file_size;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn receive_one_file(
        &mut self,
        meta: &FileMetadata,
        target: &Path,
        resume_off: u64,
        skipping: bool,
        batch_transferred: u64,
        files_completed: u32,
        start_ms: u32,
    ) -> Result<(), FileWireError> {
        let mut file = if skipping {
            None
        } else {
            let mode = if resume_off == 0 { OpenMode::Write } else { OpenMode::Append };
            match self.fs.open(target, mode) {
                Ok(f) => Some(f),
                Err(err) => {
                    warn!("open '{}' for write failed: {err}", target.display());
                    return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
                }
            }
        };

        // The whole-file CRC covers the final file contents, so a resumed
        // transfer seeds the digest by re-reading the bytes already present.
        let mut digest = self.crc_digest();
        if !skipping && resume_off > 0 {
            let mut existing = match self.fs.open(target, OpenMode::Read) {
                Ok(f) => f,
                Err(_) => return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })),
            };
            if existing.seek(SeekFrom::Start(0)).is_err() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION }));
            }
            let mut buf = vec![0u8; self.effective_packet_size];
            let mut left = resume_off;
            while left > 0 {
                let take = left.min(buf.len() as u64) as usize;
                let mut have = 0;
                while have < take {
                    match existing.read(&mut buf[have..take]) {
                        Ok(0) | Err(_) => {
                            return Err(
                                self.fail(FileWireError::Io { detail: ErrorDetail::PERMISSION })
                            )
                        }
                        Ok(n) => have += n,
                    }
                }
                digest.update(&buf[..take]);
                left -= take as u64;
            }
        }

        let mut written = resume_off;
        debug!("data: receive loop starts written={written} total={}", meta.file_size);
        loop {
            let pkt = self.await_data(meta)?;
            match pkt.ty {
                PacketType::Data => {
                    if pkt.offset == written {
                        if !skipping && !pkt.payload.is_empty() {
                            if let Some(f) = file.as_mut() {
                                if f.write_all(&pkt.payload).is_err() {
                                    warn!("write failed at offset {written}");
                                    return Err(
                                        self.fail(FileWireError::Io { detail: ErrorDetail::DISK_FULL })
                                    );
                                }
                            }
                            digest.update(&pkt.payload);
                        }
                        written += pkt.payload.len() as u64;
                    } else if pkt.offset < written {
                        debug!("data: duplicate/overlap at {} ignored", pkt.offset);
                    } else {
                        debug!("data: sender ahead at {}, re-acking {written}", pkt.offset);
                    }

                    self.emit_receiver_progress(
                        &meta.filename,
                        written,
                        batch_transferred,
                        files_completed,
                        start_ms,
                    );
                    if self.is_cancelled() {
                        warn!("data: local cancel after progress, before ACK");
                        let err = self.abort_local();
                        self.emit_file_complete(&meta.filename, &meta.sender_path, FileOutcome::Aborted);
                        return Err(err);
                    }
                    self.send_packet(PacketType::DataAck, &[], written)?;
                }
                PacketType::Done => {
                    if !skipping {
                        let crc_final =
                            std::mem::replace(&mut digest, self.crc_digest()).finalize();
                        if crc_final != meta.file_crc32 {
                            warn!(
                                "done: whole-file CRC mismatch (got {crc_final:#010x}, expected {:#010x})",
                                meta.file_crc32
                            );
                            let _ = self.send_error(status::CRC, ErrorDetail::CRC_FILE.bits());
                            return Err(self.fail(FileWireError::Crc { detail: ErrorDetail::CRC_FILE }));
                        }
                    }
                    self.send_packet(PacketType::DoneAck, &[], written)?;
                    return Ok(());
                }
                PacketType::Error => {
                    warn!("data: peer reported an error");
                    return Err(self.fail(FileWireError::Protocol { detail: ErrorDetail::empty() }));
                }
                PacketType::Cancel => {
                    warn!("data: received CANCEL");
                    self.emit_file_complete(&meta.filename, &meta.sender_path, FileOutcome::Aborted);
                    return Err(FileWireError::Aborted);
                }
                PacketType::SendMeta => {
                    warn!("data: unexpected SEND_META mid-file");
                    return Err(
                        self.fail(FileWireError::Protocol { detail: ErrorDetail::INVALID_STATE })
                    );
                }
                PacketType::DataAck => debug!("data: ignoring stray DATA_ACK at receiver"),
                other => debug!("data: ignoring unexpected {other:?}"),
            }
        }
    }

    /// Inbound-data wait: timeouts and per-packet CRC failures are retried
    /// within the data retry budget, unknown packet types are skipped
    /// without consuming it.
    fn await_data(&mut self, meta: &FileMetadata) -> Result<Packet, FileWireError> {
        let timeout = self.timing.timeout_for(Operation::DataRecv);
        let mut tries = self.cfg.retries.data_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            if self.is_cancelled() {
                warn!("data: local cancel at receiver");
                let err = self.abort_local();
                self.emit_file_complete(&meta.filename, &meta.sender_path, FileOutcome::Aborted);
                return Err(err);
            }
            match self.recv_packet(timeout) {
                Ok(pkt) => return Ok(pkt),
                Err(FileWireError::Protocol { detail }) if detail == ErrorDetail::UNKNOWN_TYPE => {
                    debug!("data: skipping unknown packet type");
                }
                Err(FileWireError::Timeout { .. }) | Err(FileWireError::Crc { .. }) if tries > 0 => {
                    self.sleep_backoff(&mut backoff);
                    tries -= 1;
                }
                Err(FileWireError::Timeout { .. }) => {
                    self.set_last_error(status::TIMEOUT, ErrorDetail::TIMEOUT_DATA.bits());
                    return Err(FileWireError::Timeout { detail: ErrorDetail::TIMEOUT_DATA });
                }
                Err(FileWireError::Crc { .. }) => {
                    self.set_last_error(status::CRC, ErrorDetail::PACKET_CORRUPT.bits());
                    return Err(FileWireError::Crc { detail: ErrorDetail::PACKET_CORRUPT });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Receiver progress: batch totals are unknown on this side, so only
    /// cumulative bytes and rate are reported.
    fn emit_receiver_progress(
        &mut self,
        filename: &str,
        written: u64,
        batch_transferred: u64,
        files_completed: u32,
        start_ms: u32,
    ) {
        if self.cfg.callbacks.on_progress.is_none() {
            return;
        }
        let bytes_transferred = batch_transferred + written;
        let elapsed_ms = self.clock.now_ms().wrapping_sub(start_ms);
        let rate = if elapsed_ms > 0 {
            (bytes_transferred.saturating_mul(1000) / u64::from(elapsed_ms)).min(u64::from(u32::MAX))
                as u32
        } else {
            0
        };
        let snapshot = ProgressInfo {
            bytes_transferred,
            total_bytes: 0,
            current_file_bytes: written,
            files_completed,
            total_files: 0,
            transfer_rate_bps: rate,
            eta_seconds: 0,
            current_filename: filename,
        };
        if let Some(cb) = self.cfg.callbacks.on_progress.as_mut() {
            cb(&snapshot);
        }
    }
}
