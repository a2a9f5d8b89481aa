//! Endpoint RPC over framed packets
//!
//! A decoded packet payload carries one request or one acknowledgment:
//!
//! ```text
//! request:  [seq_no:2 LE] [endpoint_id:2 LE] [resp_len:2 LE] [body…] [trailer:2 LE]
//! response: [seq_no | 0x8000 :2 LE] [response bytes…]
//! ```
//!
//! Bit 15 of `endpoint_id` asks for a response; bit 15 of `seq_no` marks an
//! acknowledgment of a previously sent request. The trailer pins the peer's
//! notion of the endpoint table: the protocol version for the reserved
//! self-description endpoint, the schema CRC for everything else. A mismatch
//! drops the request without a response; callers recover via timeout and
//! retry.

pub mod requests;

use crate::framing::encode_packet;
use crate::registry::Endpoints;
use crate::sink::{MemorySink, Sink};

pub use requests::{AckSink, CallError, Caller, RequestTable};

/// Trailer value accepted by the reserved self-description endpoint
pub const PROTOCOL_VERSION: u16 = 1;

/// Bit 15 of `seq_no`: this payload is an acknowledgment
pub const ACK_FLAG: u16 = 0x8000;

/// Bit 15 of `endpoint_id`: the peer expects a response
pub const RESPONSE_FLAG: u16 = 0x8000;

const ENVELOPE_OVERHEAD: usize = 8;

/// Resolves decoded packets against the endpoint table
///
/// `TX` is the transmit buffer size; responses are clamped to `TX - 2` bytes to
/// leave room for the prepended sequence number. One dispatcher per physical
/// link, driven from that link's single consumer context.
pub struct Dispatcher<'a, const TX: usize> {
    endpoints: &'a dyn Endpoints,
    acks: Option<&'a dyn AckSink>,
    tx_buf: [u8; TX],
}

impl<'a, const TX: usize> Dispatcher<'a, TX> {
    pub fn new(endpoints: &'a dyn Endpoints) -> Self {
        Self {
            endpoints,
            acks: None,
            tx_buf: [0; TX],
        }
    }

    /// Routes incoming acknowledgments to an outstanding-request table
    pub fn with_requests(mut self, acks: &'a dyn AckSink) -> Self {
        self.acks = Some(acks);
        self
    }

    /// Processes one decoded packet payload
    ///
    /// Malformed or mismatching requests are dropped with no side effects.
    /// A response, when requested and produced, is framed into `out`.
    pub fn process_packet(&mut self, payload: &[u8], out: &mut dyn Sink) {
        if payload.len() < 4 {
            return;
        }

        let seq_no = u16::from_le_bytes([payload[0], payload[1]]);
        if seq_no & ACK_FLAG != 0 {
            let seq = crate::core::SeqNo::from_u16_truncating(seq_no);
            match self.acks {
                Some(acks) => acks.complete(seq, &payload[2..]),
                None => trace!("ignoring ack without a request table"),
            }
            return;
        }

        if payload.len() < ENVELOPE_OVERHEAD {
            return;
        }

        let endpoint_id = u16::from_le_bytes([payload[2], payload[3]]);
        let expect_response = endpoint_id & RESPONSE_FLAG != 0;
        let index = usize::from(endpoint_id & !RESPONSE_FLAG);
        if index >= self.endpoints.count() {
            // out of range: no response, even if one was requested
            return;
        }

        let trailer = u16::from_le_bytes([payload[payload.len() - 2], payload[payload.len() - 1]]);
        let expected_trailer = if index == 0 {
            PROTOCOL_VERSION
        } else {
            self.endpoints.schema_crc()
        };
        if trailer != expected_trailer {
            trace!(
                "trailer mismatch for endpoint {}: expected {:#x}, got {:#x}",
                index,
                expected_trailer,
                trailer
            );
            return;
        }

        let expected_response_length =
            usize::from(u16::from_le_bytes([payload[4], payload[5]]));
        // leave room for the prepended seq_no, within the packet size limit
        let capacity = expected_response_length
            .min(TX - 2)
            .min(crate::framing::MAX_PAYLOAD - 2);
        let body = &payload[6..payload.len() - 2];

        let endpoints = self.endpoints;
        let mut response = MemorySink::new(&mut self.tx_buf[2..2 + capacity]);
        if index == 0 {
            endpoints.handle_descriptor(body, &mut response);
        } else {
            match endpoints.handler(index) {
                Some(handler) => handler.handle(body, &mut response),
                // objects have table slots but take no requests
                None => return,
            }
        }
        let written = response.written();

        if expect_response {
            self.tx_buf[..2].copy_from_slice(&(seq_no | ACK_FLAG).to_le_bytes());
            // cannot exceed MAX_PAYLOAD: capacity is clamped above
            let _ = encode_packet(&self.tx_buf[..2 + written], out);
        }
    }
}
