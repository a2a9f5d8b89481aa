//! Length-delimited packet framing over unreliable byte streams
//!
//! Wire format: `[SYNC_BYTE, length, crc8(header)]` + `payload[length]` +
//! `crc16(payload)` big-endian. The length's high bit must be clear; packets of
//! 128 bytes or more are not supported by this protocol version.
//!
//! Corrupt input is never surfaced as an error. The decoder resynchronizes on
//! the next sync byte, which may consume extra bytes when corruption happens to
//! resemble a valid prefix elsewhere in the stream.

use crate::crc::{Crc16, Crc8};
use crate::sink::Sink;

/// Fixed packet prefix
pub const SYNC_BYTE: u8 = 0xaa;

/// Largest payload a single packet can carry
pub const MAX_PAYLOAD: usize = 127;

const HEADER_LENGTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    PayloadTooLong,
}

/// Encodes one payload as a framed packet into `out`
///
/// Nothing is written when the payload exceeds [`MAX_PAYLOAD`]; there is no
/// fragmentation in this protocol version.
///
/// ```
/// use fibrelink::framing::encode_packet;
/// use fibrelink::sink::MemorySink;
///
/// let mut buf = [0u8; 8];
/// let mut out = MemorySink::new(&mut buf);
/// encode_packet(&[0x01, 0x02, 0x03], &mut out).unwrap();
/// assert_eq!(out.written(), 3 + 3 + 2);
/// assert_eq!(buf[..2], [0xaa, 0x03]);
/// ```
pub fn encode_packet(payload: &[u8], out: &mut dyn Sink) -> Result<(), EncodeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLong);
    }
    let mut header = [SYNC_BYTE, payload.len() as u8, 0];
    header[2] = Crc8::compute(&header[..2]);
    out.push_bytes(&header);
    out.push_bytes(payload);
    out.push_bytes(&Crc16::compute(payload).to_be_bytes());
    Ok(())
}

/// Stream-to-packet state machine
///
/// Consumes one byte at a time into two bounded buffers and yields each
/// CRC-validated payload exactly once. Single-threaded, not reentrant; one
/// instance per physical link.
pub struct Deframer {
    header: [u8; HEADER_LENGTH],
    header_index: usize,
    // payload plus its 2-byte CRC16 trailer
    packet: [u8; MAX_PAYLOAD + Crc16::LENGTH],
    packet_index: usize,
    packet_length: usize,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    pub const fn new() -> Self {
        Self {
            header: [0; HEADER_LENGTH],
            header_index: 0,
            packet: [0; MAX_PAYLOAD + Crc16::LENGTH],
            packet_index: 0,
            packet_length: 0,
        }
    }

    /// Feeds one byte; returns a validated payload when one completes
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        if self.header_index < HEADER_LENGTH {
            self.header[self.header_index] = byte;
            self.header_index += 1;
            if self.header_index == 1 && self.header[0] != SYNC_BYTE {
                self.header_index = 0;
            } else if self.header_index == 2 && (self.header[1] & 0x80) != 0 {
                // packets >= 128 bytes unsupported in this protocol version
                self.header_index = 0;
            } else if self.header_index == HEADER_LENGTH {
                if Crc8::compute(&self.header) != 0 {
                    self.header_index = 0;
                } else {
                    self.packet_length = self.header[1] as usize + Crc16::LENGTH;
                }
            }
            return None;
        }

        self.packet[self.packet_index] = byte;
        self.packet_index += 1;
        if self.packet_index < self.packet_length {
            return None;
        }

        let valid = Crc16::compute(&self.packet[..self.packet_length]) == 0;
        let payload_length = self.packet_length - Crc16::LENGTH;
        self.header_index = 0;
        self.packet_index = 0;
        self.packet_length = 0;
        if valid {
            Some(&self.packet[..payload_length])
        } else {
            trace!("dropping packet with bad crc16");
            None
        }
    }

    /// Feeds a block of bytes, delivering each completed payload to `deliver`
    pub fn process_bytes(&mut self, bytes: &[u8], deliver: &mut dyn FnMut(&[u8])) {
        for &byte in bytes {
            if let Some(payload) = self.push(byte) {
                deliver(payload);
            }
        }
    }
}
