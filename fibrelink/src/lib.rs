//! # Fibrelink
//!
//! This library provides a zero-configuration CAN node stack for modular
//! devices in no_std environments: nodes negotiate their own bus addresses by
//! claiming and defending them with periodic heartbeats, and expose a typed
//! endpoint tree over a framed, CRC-guarded packet protocol. No dynamic
//! memory allocation is required.
//!
//! The library primarily targets the Embassy async framework; the host side
//! of the packet protocol also runs on std executors.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────┐
//!            │ Runner │
//!            └────┬───┘
//!                 ▼
//! ┌──────┐   ┌────────┐   ┌────────┐ ┌────────┐
//! │ Link ├──►│  Node  │◄──┤ Sender │ │ Status │
//! └──────┘   └────────┘   └────────┘ └────────┘
//!
//! ┌────────────────┐   ┌────────────┐   ┌──────────┐
//! │ Deframer/      │──►│ Dispatcher │──►│ Registry │
//! │ encode_packet  │   └──────┬─────┘   └──────────┘
//! └────────────────┘          ▼
//!                      ┌──────────────┐
//!                      │ RequestTable │◄── Caller
//!                      └──────────────┘
//! ```
//!
//! Components:
//! * _Node_ holds the address negotiation state and the frame channels. It
//!   absorbs heartbeats from the bus and hands everything else to the inbox.
//! * _Runner_ is a worker task for background node activities: scheduling
//!   heartbeats, consuming bus events and maintaining receiver filters.
//! * _Link_ is an asynchronous channel trio that a CAN peripheral driver
//!   consumes.
//! * _Deframer_ recovers packets from an unreliable byte stream, resyncing on
//!   corruption; `encode_packet` is its transmit-side counterpart.
//! * _Registry_ is the endpoint table built from a declarative member tree,
//!   with a self-describing JSON document on the reserved endpoint.
//! * _Dispatcher_ resolves decoded packets against the registry and routes
//!   acknowledgments to the _RequestTable_, which a _Caller_ uses for
//!   timeout-and-resend request recovery.
//!
//! ## Concurrency model
//!
//! All shared state sits behind `embassy_sync` blocking mutexes, generic over
//! the `RawMutex` choice. Critical sections only copy frames and flip small
//! state, so the stack is safe to drive from interrupt-level executors with
//! _CriticalSectionRawMutex_, or entirely in thread mode with
//! _ThreadModeRawMutex_. The driver-facing channels exert no back-pressure on
//! the receive path; frames arriving while the inbox is full are dropped.
#![no_std]

#[cfg(test)]
extern crate std;

pub use fibrelink_core as core;
pub use fibrelink_driver::{frame, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod crc;
pub mod endpoint;
pub mod framing;
pub mod node;
pub mod registry;
pub mod rpc;
pub mod sink;
