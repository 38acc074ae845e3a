//! # Framing
//!
//! Every outbound payload is gzip-compressed before it reaches a transport; the
//! client decompresses. Inbound payloads are handed to contexts unmodified.

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

pub fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2 + 32), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Reverses `compress`. Used by clients and tests.
pub fn decompress(frame: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(frame);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// The request as a context sees it: the whole inbound message, from offset 0.
pub fn inbound(raw: &[u8]) -> &[u8] {
    raw
}
