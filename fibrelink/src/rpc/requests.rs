//! Outstanding-request tracking for the calling side
//!
//! A [`RequestTable`] holds up to `N` in-flight requests, each identified by
//! its sequence number. The dispatcher feeds incoming acknowledgments into the
//! table through [`AckSink`]; a [`Caller`] allocates a slot, transmits the
//! request and waits for the matching acknowledgment, re-sending the identical
//! packet on timeout. A late acknowledgment from an earlier attempt still
//! completes the call because retries keep their sequence number.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::{with_timeout, Duration};

use crate::core::{EndpointId, SeqNo};
use crate::framing::{encode_packet, MAX_PAYLOAD};
use crate::registry::EndpointRef;
use crate::rpc::{ENVELOPE_OVERHEAD, PROTOCOL_VERSION, RESPONSE_FLAG};
use crate::sink::Sink;

/// Call failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallError {
    /// All request slots are occupied
    Busy,
    /// The request body does not fit in one packet
    RequestTooLong,
    /// No acknowledgment arrived within any attempt
    Timeout,
}

/// Consumer of acknowledgment payloads, keyed by sequence number
///
/// Implemented by [`RequestTable`]; the dispatcher calls it for every decoded
/// packet whose sequence number carries the acknowledgment bit.
pub trait AckSink: Sync {
    fn complete(&self, seq: SeqNo, response: &[u8]);
}

struct Slot<const RESP: usize> {
    seq: Option<SeqNo>,
    waker: WakerRegistration,
    response: [u8; RESP],
    response_len: Option<usize>,
}

impl<const RESP: usize> Slot<RESP> {
    fn new() -> Self {
        Self {
            seq: None,
            waker: WakerRegistration::new(),
            response: [0; RESP],
            response_len: None,
        }
    }
}

struct State<const N: usize, const RESP: usize> {
    slots: [Slot<RESP>; N],
    next_seq: SeqNo,
}

/// Table of in-flight requests
///
/// `N` bounds the number of concurrent calls, `RESP` the acknowledgment
/// payload size a slot can buffer. Responses longer than `RESP` are truncated
/// on arrival.
pub struct RequestTable<M: RawMutex, const N: usize, const RESP: usize> {
    state: Mutex<M, RefCell<State<N, RESP>>>,
}

impl<M: RawMutex, const N: usize, const RESP: usize> RequestTable<M, N, RESP> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                slots: core::array::from_fn(|_| Slot::new()),
                next_seq: SeqNo::from_u16_truncating(0),
            })),
        }
    }

    /// Claims a free slot and assigns it the next sequence number
    ///
    /// Returns `None` when all slots are in flight. The slot frees itself when
    /// the guard drops, including on cancellation.
    pub fn allocate(&self) -> Option<SlotGuard<'_, M, N, RESP>> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let index = state.slots.iter().position(|slot| slot.seq.is_none())?;
            let seq = state.next_seq;
            state.next_seq = seq.next();

            let slot = &mut state.slots[index];
            slot.seq = Some(seq);
            slot.response_len = None;
            Some(SlotGuard {
                table: self,
                index,
                seq,
            })
        })
    }
}

impl<M: RawMutex, const N: usize, const RESP: usize> Default for RequestTable<M, N, RESP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex + Sync, const N: usize, const RESP: usize> AckSink for RequestTable<M, N, RESP> {
    fn complete(&self, seq: SeqNo, response: &[u8]) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let Some(slot) = state
                .slots
                .iter_mut()
                .find(|slot| slot.seq == Some(seq) && slot.response_len.is_none())
            else {
                // Unknown or already completed sequence number. Stale
                // acknowledgments from retried requests end up here.
                trace!("dropping unmatched ack");
                return;
            };

            let len = response.len().min(RESP);
            slot.response[..len].copy_from_slice(&response[..len]);
            slot.response_len = Some(len);
            slot.waker.wake();
        });
    }
}

/// Exclusive handle on one allocated request slot
pub struct SlotGuard<'a, M: RawMutex, const N: usize, const RESP: usize> {
    table: &'a RequestTable<M, N, RESP>,
    index: usize,
    seq: SeqNo,
}

impl<M: RawMutex, const N: usize, const RESP: usize> SlotGuard<'_, M, N, RESP> {
    pub fn seq(&self) -> SeqNo {
        self.seq
    }

    /// Waits for the acknowledgment and copies its payload into `buf`
    ///
    /// Returns the number of bytes copied, bounded by both `buf` and the
    /// slot's `RESP` capacity.
    pub async fn wait(&mut self, buf: &mut [u8]) -> usize {
        poll_fn(|cx| {
            self.table.state.lock(|state| {
                let mut state = state.borrow_mut();
                let slot = &mut state.slots[self.index];
                match slot.response_len {
                    Some(len) => {
                        let len = len.min(buf.len());
                        buf[..len].copy_from_slice(&slot.response[..len]);
                        Poll::Ready(len)
                    }
                    None => {
                        slot.waker.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }
}

impl<M: RawMutex, const N: usize, const RESP: usize> Drop for SlotGuard<'_, M, N, RESP> {
    fn drop(&mut self) {
        self.table.state.lock(|state| {
            let mut state = state.borrow_mut();
            let slot = &mut state.slots[self.index];
            slot.seq = None;
            slot.response_len = None;
        });
    }
}

/// Request originator with timeout-and-resend recovery
///
/// Lost packets are indistinguishable from lost acknowledgments, so a retry
/// re-sends the identical packet under the identical sequence number and the
/// peer's answer to whichever copy arrives settles the call.
pub struct Caller<'a, M: RawMutex, const N: usize, const RESP: usize> {
    table: &'a RequestTable<M, N, RESP>,
    timeout: Duration,
    attempts: usize,
}

impl<'a, M: RawMutex, const N: usize, const RESP: usize> Caller<'a, M, N, RESP> {
    pub fn new(table: &'a RequestTable<M, N, RESP>, timeout: Duration, attempts: usize) -> Self {
        Self {
            table,
            timeout,
            attempts,
        }
    }

    /// Invokes `endpoint_ref` with `request`, writing the outgoing packet to
    /// `out` and the acknowledgment payload to `response`
    ///
    /// Returns the response length. The reserved self-description endpoint is
    /// pinned by protocol version instead of schema CRC.
    pub async fn call(
        &self,
        endpoint_ref: EndpointRef,
        request: &[u8],
        response: &mut [u8],
        out: &mut dyn Sink,
    ) -> Result<usize, CallError> {
        let payload_len = ENVELOPE_OVERHEAD + request.len();
        if payload_len > MAX_PAYLOAD {
            return Err(CallError::RequestTooLong);
        }
        let mut guard = self.table.allocate().ok_or(CallError::Busy)?;

        let endpoint_word = u16::from(endpoint_ref.endpoint_id) | RESPONSE_FLAG;
        let resp_len = response.len().min(RESP).min(u16::MAX as usize) as u16;
        let trailer = if endpoint_ref.endpoint_id == EndpointId::DESCRIPTOR {
            PROTOCOL_VERSION
        } else {
            endpoint_ref.schema_crc
        };

        let mut payload = [0u8; MAX_PAYLOAD];
        payload[0..2].copy_from_slice(&guard.seq().into_u16().to_le_bytes());
        payload[2..4].copy_from_slice(&endpoint_word.to_le_bytes());
        payload[4..6].copy_from_slice(&resp_len.to_le_bytes());
        payload[6..6 + request.len()].copy_from_slice(request);
        payload[payload_len - 2..payload_len].copy_from_slice(&trailer.to_le_bytes());

        for attempt in 0..self.attempts {
            if attempt != 0 {
                trace!("retrying request, attempt {}", attempt + 1);
            }
            // Length was checked above, encoding cannot fail
            unwrap!(encode_packet(&payload[..payload_len], out));

            match with_timeout(self.timeout, guard.wait(response)).await {
                Ok(len) => return Ok(len),
                Err(_) => continue,
            }
        }
        Err(CallError::Timeout)
    }
}
