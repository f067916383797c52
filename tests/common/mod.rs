//! Shared helpers for the integration tests: fast-timeout configs, seeded
//! pseudorandom files, raw frame construction, and a transport wrapper that
//! counts DATA frames on the wire.

#![allow(dead_code)]

use filewire::constants::{WIRE_HEADER_SIZE, WIRE_TRAILER_SIZE};
use filewire::{crc32, MockLink, PacketType, Session, SessionConfig, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

/// Config with short timeouts so failure paths resolve quickly in tests.
pub fn fast_config() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.timeouts.min_timeout_ms = 20;
    cfg.timeouts.max_timeout_ms = 400;
    cfg.retries.backoff_ms_base = 2;
    cfg
}

pub fn fast_config_with_packet_size(packet_size: usize) -> SessionConfig {
    SessionConfig { packet_size, ..fast_config() }
}

/// Writes `len` seeded pseudorandom bytes to `path` and returns them.
pub fn write_random_file(path: &Path, len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    fs::write(path, &data).unwrap();
    data
}

/// Builds a raw frame by hand: header with patched CRC, payload, trailer.
pub fn build_frame(type_byte: u8, seq: u32, offset: u64, payload: &[u8]) -> Vec<u8> {
    let mut header = [0u8; WIRE_HEADER_SIZE];
    header[0] = type_byte;
    header[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[8..12].copy_from_slice(&seq.to_le_bytes());
    header[12..20].copy_from_slice(&offset.to_le_bytes());
    let header_crc = crc32(&header);
    header[20..24].copy_from_slice(&header_crc.to_le_bytes());

    let mut frame = Vec::with_capacity(WIRE_HEADER_SIZE + payload.len() + WIRE_TRAILER_SIZE);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    let trailer = crc32(&frame);
    frame.extend_from_slice(&trailer.to_le_bytes());
    frame
}

/// Transport wrapper counting outbound DATA frames that carry payload.
pub struct CountingLink {
    inner: MockLink,
    data_frames: Arc<AtomicU32>,
}

impl CountingLink {
    pub fn new(inner: MockLink) -> (CountingLink, Arc<AtomicU32>) {
        let counter = Arc::new(AtomicU32::new(0));
        (CountingLink { inner, data_frames: counter.clone() }, counter)
    }
}

impl Transport for CountingLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.first() == Some(&(PacketType::Data as u8))
            && frame.len() > WIRE_HEADER_SIZE + WIRE_TRAILER_SIZE
        {
            self.data_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.send(frame)
    }

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> io::Result<usize> {
        self.inner.recv(buf, timeout_ms)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Runs `sender` on a worker thread while `receiver` runs inline, returning
/// both sessions and both results.
pub type TransferOutcome = (
    Session,
    Result<(), filewire::FileWireError>,
    Session,
    Result<(), filewire::FileWireError>,
);

pub fn run_transfer(
    mut sender: Session,
    mut receiver: Session,
    files: Vec<std::path::PathBuf>,
    output_dir: std::path::PathBuf,
) -> TransferOutcome {
    let tx_thread = thread::spawn(move || {
        let result = sender.send_files(&files, None);
        (sender, result)
    });
    let rx_result = receiver.receive_files(&output_dir);
    let (sender, tx_result) = tx_thread.join().unwrap();
    (sender, tx_result, receiver, rx_result)
}
