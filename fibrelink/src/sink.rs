//! Bounded byte sinks
//!
//! Endpoint handlers and the packet encoder write through the [`Sink`] trait so
//! that response size limits, schema paging and checksum accumulation compose
//! without intermediate buffers. Overflow is absorbed by truncation, never
//! reported as an error: the worst case anywhere in this stack is a short
//! response, which the peer handles by re-requesting with an offset.

use crate::crc::Crc16;

/// A byte stream consumer with bounded free space
pub trait Sink {
    fn push_bytes(&mut self, bytes: &[u8]);

    /// Remaining capacity; `usize::MAX` for unbounded sinks
    fn free(&self) -> usize;
}

/// Writes into a borrowed buffer, silently truncating at capacity
pub struct MemorySink<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> MemorySink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Sink for MemorySink<'_> {
    fn push_bytes(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.buf.len() - self.written);
        self.buf[self.written..self.written + n].copy_from_slice(&bytes[..n]);
        self.written += n;
    }

    fn free(&self) -> usize {
        self.buf.len() - self.written
    }
}

/// Discards the first `offset` bytes, then forwards to the inner sink
///
/// Self-description requests page through documents larger than one packet by
/// re-reading with increasing offsets.
pub struct OffsetSink<'a> {
    inner: &'a mut dyn Sink,
    skip: usize,
}

impl<'a> OffsetSink<'a> {
    pub fn new(inner: &'a mut dyn Sink, offset: usize) -> Self {
        Self {
            inner,
            skip: offset,
        }
    }
}

impl Sink for OffsetSink<'_> {
    fn push_bytes(&mut self, bytes: &[u8]) {
        let skipped = bytes.len().min(self.skip);
        self.skip -= skipped;
        self.inner.push_bytes(&bytes[skipped..]);
    }

    fn free(&self) -> usize {
        self.inner.free().saturating_add(self.skip)
    }
}

/// Accumulates a CRC16 over everything pushed, storing nothing
#[derive(Default)]
pub struct CrcSink {
    crc: Crc16,
    length: usize,
}

impl CrcSink {
    pub fn get(&self) -> u16 {
        self.crc.get()
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Sink for CrcSink {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.crc.add_bytes(bytes);
        self.length += bytes.len();
    }

    fn free(&self) -> usize {
        usize::MAX
    }
}

/// `core::fmt::Write` adapter over a sink, for formatted text output
pub struct SinkWrite<'a>(pub &'a mut dyn Sink);

impl core::fmt::Write for SinkWrite<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.push_bytes(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn test_memory_sink_truncates() {
        let mut buf = [0u8; 4];
        let mut sink = MemorySink::new(&mut buf);
        sink.push_bytes(&[1, 2, 3]);
        assert_eq!(sink.free(), 1);
        sink.push_bytes(&[4, 5, 6]);
        assert_eq!(sink.written(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_offset_sink_skips_across_pushes() {
        let mut buf = [0u8; 8];
        let mut inner = MemorySink::new(&mut buf);
        let mut sink = OffsetSink::new(&mut inner, 3);
        sink.push_bytes(&[1, 2]);
        sink.push_bytes(&[3, 4, 5]);
        sink.push_bytes(&[6]);
        assert_eq!(inner.written(), 3);
        assert_eq!(buf[..3], [4, 5, 6]);
    }

    #[test]
    fn test_crc_sink_matches_direct_compute() {
        let mut sink = CrcSink::default();
        sink.push_bytes(b"hello ");
        sink.push_bytes(b"world");
        assert_eq!(sink.get(), Crc16::compute(b"hello world"));
        assert_eq!(sink.length(), 11);
    }

    #[test]
    fn test_sink_write_formats() {
        let mut buf = [0u8; 16];
        let mut inner = MemorySink::new(&mut buf);
        write!(SinkWrite(&mut inner), "id\":{}", 42).unwrap();
        let written = inner.written();
        assert_eq!(&buf[..written], b"id\":42");
    }
}
