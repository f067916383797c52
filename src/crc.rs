//! # CRC-32 Provider
//!
//! Frame trailers, header checks, and whole-file integrity all use CRC-32
//! (IEEE 802.3): reflected polynomial 0xEDB88320, initial state 0xFFFFFFFF,
//! final XOR 0xFFFFFFFF. The default implementation is backed by the `crc`
//! crate (`CRC_32_ISO_HDLC` is exactly this parameterization); a host with a
//! hardware CRC unit can install its own [`CrcProvider`] through the session
//! configuration.

use crc::{Crc, CRC_32_ISO_HDLC};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot CRC-32 over a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC state. Any sequence of `update` calls must produce the
/// same result as a single call over the concatenated input.
pub trait CrcDigest: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> u32;
}

/// CRC implementation seam. Hosts may delegate to hardware; the values
/// produced must match the IEEE 802.3 parameterization bit for bit or the
/// two ends will never agree.
pub trait CrcProvider: Send {
    fn checksum(&self, data: &[u8]) -> u32;
    fn digest(&self) -> Box<dyn CrcDigest>;
}

/// Default software CRC-32 provider.
#[derive(Debug, Default)]
pub struct Crc32Ieee;

struct Crc32IeeeDigest {
    inner: crc::Digest<'static, u32>,
}

impl CrcDigest for Crc32IeeeDigest {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(self: Box<Self>) -> u32 {
        self.inner.finalize()
    }
}

impl CrcProvider for Crc32Ieee {
    fn checksum(&self, data: &[u8]) -> u32 {
        CRC32.checksum(data)
    }

    fn digest(&self) -> Box<dyn CrcDigest> {
        Box::new(Crc32IeeeDigest { inner: CRC32.digest() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn chunked_matches_one_shot() {
        let data: Vec<u8> = (0u16..2048).map(|v| (v % 251) as u8).collect();
        let provider = Crc32Ieee;
        for chunk_size in [1usize, 3, 7, 64, 255, 1024] {
            let mut digest = provider.digest();
            for chunk in data.chunks(chunk_size) {
                digest.update(chunk);
            }
            assert_eq!(digest.finalize(), crc32(&data), "chunk size {chunk_size}");
        }
    }

    #[test]
    fn provider_matches_free_function() {
        let provider = Crc32Ieee;
        assert_eq!(provider.checksum(b"filewire"), crc32(b"filewire"));
    }
}
