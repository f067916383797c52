//! In-memory duplex transport.
//!
//! [`MockLink::pair`] creates two connected endpoints over mpsc channels.
//! Tests drive full two-session transfers with one end per thread, inject
//! raw bytes (corruption, resync garbage) through [`MockLink::raw_sender`],
//! and simulate link loss through the shared connected flag.

use super::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MockLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    connected: Arc<AtomicBool>,
}

impl MockLink {
    /// Two endpoints of an in-memory duplex link sharing one connected flag.
    pub fn pair() -> (MockLink, MockLink) {
        let (a_tx, a_rx) = channel();
        let (b_tx, b_rx) = channel();
        let connected = Arc::new(AtomicBool::new(true));
        let a = MockLink {
            tx: a_tx,
            rx: b_rx,
            pending: VecDeque::new(),
            connected: connected.clone(),
        };
        let b = MockLink {
            tx: b_tx,
            rx: a_rx,
            pending: VecDeque::new(),
            connected,
        };
        (a, b)
    }

    /// Clone of the outbound channel. Bytes pushed here arrive at the peer
    /// interleaved with regular sends, which is exactly what corruption and
    /// resynchronization tests need.
    pub fn raw_sender(&self) -> Sender<Vec<u8>> {
        self.tx.clone()
    }

    /// Shared connected flag; clearing it makes both ends report link loss.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }
}

impl Transport for MockLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link down"));
        }
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> io::Result<usize> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut filled = 0;
        while filled < buf.len() {
            while filled < buf.len() {
                match self.pending.pop_front() {
                    Some(byte) => {
                        buf[filled] = byte;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled == buf.len() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    if filled > 0 {
                        break;
                    }
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
                }
            }
        }
        Ok(filled)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
