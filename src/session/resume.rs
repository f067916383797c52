//! Resume engine, receiver side.
//!
//! For every incoming file the receiver inspects whatever already exists at
//! the target path and answers the sender's RESUME_REQ with one of:
//! start at zero, skip the file, abort, or verify-first — a CRC probe over a
//! window of the local bytes that the sender must reproduce from its copy
//! before either side trusts a resume offset. No state is persisted
//! anywhere; the local file is the only source of truth.
//!
//! Verification windows: the tail modes cover at most 2 MiB ending at local
//! EOF; the full modes cover the whole local prefix up to 512 MiB, after
//! which only the last 512 MiB are checked and `verify_len` carries the
//! truncated window so the sender CRCs the same range.

use crate::config::{FileMetadata, ResumeMode};
use crate::constants::{DEFAULT_VERIFY_BYTES, FULL_VERIFY_CAP, TAIL_VERIFY_CAP, WIRE_RESUME_RESP_SIZE};
use crate::error::{status, ErrorDetail, FileWireError};
use crate::filesystem::OpenMode;
use crate::session::Session;
use crate::timing::Operation;
use crate::wire::payload::{
    pack_resume_resp, pack_verify_status, parse_resume_resp, ResumeAction, ResumeResp,
};
use crate::wire::PacketType;
use log::{debug, info, warn};
use std::io::{Seek, SeekFrom};
use std::path::Path;

struct ResumePlan {
    action: ResumeAction,
    resume_offset: u64,
    verify_crc: u32,
    verify_len: u64,
}

impl ResumePlan {
    fn start_zero() -> ResumePlan {
        ResumePlan { action: ResumeAction::StartZero, resume_offset: 0, verify_crc: 0, verify_len: 0 }
    }

    fn skip() -> ResumePlan {
        ResumePlan { action: ResumeAction::SkipFile, resume_offset: 0, verify_crc: 0, verify_len: 0 }
    }
}

impl Session {
    pub(crate) fn send_resume_response(
        &mut self,
        action: ResumeAction,
        offset: u64,
        crc: u32,
        verify_len: u64,
    ) -> Result<(), FileWireError> {
        let resp = ResumeResp {
            action: action as u32,
            resume_offset: offset,
            verify_crc: crc,
            verify_len,
        };
        self.send_packet(PacketType::ResumeResp, &pack_resume_resp(&resp), offset)
    }

    /// Consults the resume mode and the local file, producing the response
    /// plan. Local I/O trouble never fails the transfer; it degrades to
    /// starting from zero.
    fn determine_resume_action(&mut self, target: &Path, incoming_size: u64) -> ResumePlan {
        let mode = self.cfg.resume.mode;
        let mut file = match self.fs.open(target, OpenMode::Read) {
            Ok(f) => f,
            Err(_) => {
                info!("resume: no existing file, starting at 0");
                return ResumePlan::start_zero();
            }
        };
        let existing = match file.seek(SeekFrom::End(0)) {
            Ok(n) => n,
            Err(_) => return ResumePlan::start_zero(),
        };

        match mode {
            ResumeMode::Never => {
                info!("resume: disabled, starting at 0");
                ResumePlan::start_zero()
            }
            ResumeMode::SkipExisting => {
                if existing > 0 {
                    info!("resume: file exists, skipping");
                    ResumePlan::skip()
                } else {
                    ResumePlan::start_zero()
                }
            }
            ResumeMode::CrcTail | ResumeMode::CrcTailOrZero => {
                if existing == 0 {
                    info!("resume: no bytes locally, starting at 0");
                    return ResumePlan::start_zero();
                }
                if existing > incoming_size {
                    return if mode == ResumeMode::CrcTail {
                        info!("resume: local larger than incoming, skipping");
                        ResumePlan::skip()
                    } else {
                        info!("resume: local larger than incoming, starting at 0");
                        ResumePlan::start_zero()
                    };
                }
                let configured = if self.cfg.resume.crc_verify_bytes == 0 {
                    DEFAULT_VERIFY_BYTES
                } else {
                    self.cfg.resume.crc_verify_bytes
                };
                let window = u64::from(configured).min(existing).min(TAIL_VERIFY_CAP);
                if file.seek(SeekFrom::Start(existing - window)).is_err() {
                    return ResumePlan::start_zero();
                }
                match self.crc_over_open_file(file.as_mut(), window) {
                    Ok(crc) => {
                        info!("resume: requesting tail verification ({window} bytes)");
                        ResumePlan {
                            action: ResumeAction::VerifyFirst,
                            resume_offset: existing,
                            verify_crc: crc,
                            verify_len: window,
                        }
                    }
                    Err(_) => ResumePlan::start_zero(),
                }
            }
            ResumeMode::CrcFull | ResumeMode::CrcFullOrZero => {
                if existing == 0 {
                    info!("resume: no bytes locally, starting at 0");
                    return ResumePlan::start_zero();
                }
                if existing > incoming_size {
                    return if mode == ResumeMode::CrcFull {
                        info!("resume: local larger than incoming, skipping");
                        ResumePlan::skip()
                    } else {
                        info!("resume: local larger than incoming, starting at 0");
                        ResumePlan::start_zero()
                    };
                }
                let window = existing.min(FULL_VERIFY_CAP);
                if file.seek(SeekFrom::Start(existing - window)).is_err() {
                    return ResumePlan::start_zero();
                }
                match self.crc_over_open_file(file.as_mut(), window) {
                    Ok(crc) => {
                        if window == existing {
                            info!("resume: requesting full-prefix verification ({window} bytes)");
                        } else {
                            info!("resume: prefix over cap, requesting large-tail verification");
                        }
                        ResumePlan {
                            action: ResumeAction::VerifyFirst,
                            resume_offset: existing,
                            verify_crc: crc,
                            verify_len: window,
                        }
                    }
                    Err(_) => ResumePlan::start_zero(),
                }
            }
        }
    }

    /// Waits for the sender's VERIFY echo, compares CRCs, and reports the
    /// verdict back in a VERIFY status packet. Duplicate RESUME_REQs are
    /// answered by replaying the RESUME_RESP; everything else is ignored
    /// until VERIFY arrives. Returns the status code that was sent.
    fn verification_exchange(
        &mut self,
        expected_offset: u64,
        expected_crc: u32,
        verify_len: u64,
        on_match: i32,
    ) -> Result<i32, FileWireError> {
        debug!("verify: waiting for sender CRC");
        let timeout = self.timing.timeout_for(Operation::Verify);
        let mut tries = self.cfg.retries.ack_retries;
        let mut backoff = self.cfg.retries.backoff_ms_base;
        let t0 = self.clock.now_ms();
        self.timing.clear_retransmit();
        let their_crc = loop {
            if !self.transport.is_connected() {
                return Err(self.fail(FileWireError::Io { detail: ErrorDetail::CONNECTION }));
            }
            match self.recv_packet(timeout) {
                Ok(pkt) => match pkt.ty {
                    PacketType::ResumeReq => {
                        info!("verify: duplicate RESUME_REQ, replaying RESUME_RESP");
                        let _ = self.send_resume_response(
                            ResumeAction::VerifyFirst,
                            expected_offset,
                            expected_crc,
                            verify_len,
                        );
                    }
                    PacketType::Verify => {
                        if pkt.payload.len() < WIRE_RESUME_RESP_SIZE {
                            return Err(self
                                .fail(FileWireError::Protocol { detail: ErrorDetail::MALFORMED_PKT }));
                        }
                        match parse_resume_resp(&pkt.payload) {
                            Ok((_, vr)) => {
                                self.record_rtt_since(t0);
                                break vr.verify_crc;
                            }
                            Err(_) => {
                                return Err(self.fail(FileWireError::Protocol {
                                    detail: ErrorDetail::MALFORMED_PKT,
                                }))
                            }
                        }
                    }
                    PacketType::Cancel => return Err(FileWireError::Aborted),
                    _ => debug!("verify: ignoring {:?} during verify wait", pkt.ty),
                },
                Err(FileWireError::Protocol { detail }) if detail == ErrorDetail::UNKNOWN_TYPE => {
                    debug!("verify: ignoring unknown packet type");
                }
                Err(FileWireError::Timeout { .. }) if tries > 0 => {
                    debug!("verify: still waiting for sender CRC");
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

        let result = if their_crc == expected_crc {
            on_match
        } else {
            match self.cfg.resume.mode {
                // Strict modes refuse to touch a mismatching file.
                ResumeMode::CrcTail | ResumeMode::CrcFull => status::SKIPPED,
                _ => status::RESUME_VERIFY,
            }
        };
        debug!("verify: local={expected_crc:#010x} sender={their_crc:#010x} -> status {result}");
        self.send_packet(PacketType::Verify, &pack_verify_status(result), 0)?;
        Ok(result)
    }

    /// Full resume negotiation for one incoming file. Returns the offset
    /// reception starts at; an offset at or past the file size means the
    /// file is skipped and only DONE is expected.
    pub(crate) fn handle_file_resume(
        &mut self,
        meta: &FileMetadata,
        target: &Path,
    ) -> Result<u64, FileWireError> {
        let plan = self.determine_resume_action(target, meta.file_size);
        self.send_resume_response(plan.action, plan.resume_offset, plan.verify_crc, plan.verify_len)?;
        debug!("resume: sent RESUME_RESP {:?}", plan.action);

        match plan.action {
            ResumeAction::SkipFile => {
                self.emit_file_start(&meta.filename, &meta.sender_path, meta.file_size, meta.file_size);
                Ok(meta.file_size)
            }
            ResumeAction::AbortFile => Err(self.fail(FileWireError::Aborted)),
            ResumeAction::VerifyFirst => {
                // A full-prefix match over the entire incoming size means the
                // file is already here in full.
                let on_match = match self.cfg.resume.mode {
                    ResumeMode::CrcFull | ResumeMode::CrcFullOrZero
                        if plan.verify_len == meta.file_size =>
                    {
                        status::SKIPPED
                    }
                    _ => status::OK,
                };
                let mut resume_offset = plan.resume_offset;
                match self.verification_exchange(
                    plan.resume_offset,
                    plan.verify_crc,
                    plan.verify_len,
                    on_match,
                ) {
                    Ok(st) if st == status::RESUME_VERIFY => {
                        info!("resume: verification mismatch, restarting at 0");
                        resume_offset = 0;
                    }
                    Ok(st) if st == status::SKIPPED => {
                        warn!("resume: skipping '{}'", meta.filename);
                        resume_offset = meta.file_size;
                    }
                    Ok(_) => {}
                    Err(FileWireError::Timeout { .. }) => {
                        // Failure to verify is not fatal to the session.
                        info!("resume: verification timed out, restarting at 0");
                        resume_offset = 0;
                    }
                    Err(err) => return Err(err),
                }
                info!("resume: receiver starts at offset {resume_offset}");
                self.emit_file_start(&meta.filename, &meta.sender_path, meta.file_size, resume_offset);
                Ok(resume_offset)
            }
            ResumeAction::StartZero | ResumeAction::StartOffset => {
                info!("resume: receiver starts at offset {}", plan.resume_offset);
                self.emit_file_start(
                    &meta.filename,
                    &meta.sender_path,
                    meta.file_size,
                    plan.resume_offset,
                );
                Ok(plan.resume_offset)
            }
        }
    }
}
