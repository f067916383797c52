//! TCP transport.
//!
//! Ready-made [`Transport`] over `std::net::TcpStream` for the CLI and for
//! hosts that bridge the protocol across a socket. Timeouts are implemented
//! with per-call read deadlines; a closed peer surfaces as a hard error.

use super::Transport;
use std::io;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to a remote endpoint.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<TcpTransport> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport { stream })
    }

    /// Binds `addr` and waits for a single inbound connection.
    pub fn accept<A: ToSocketAddrs>(addr: A) -> io::Result<TcpTransport> {
        let listener = TcpListener::bind(addr)?;
        let (stream, peer) = listener.accept()?;
        log::info!("accepted connection from {peer}");
        stream.set_nodelay(true)?;
        Ok(TcpTransport { stream })
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<TcpTransport> {
        stream.set_nodelay(true)?;
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame)
    }

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> io::Result<usize> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms.max(1)));
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    ))
                }
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
