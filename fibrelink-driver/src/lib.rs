//! Fibrelink driver interface
//!
//! The crate provides an interface between a CAN device driver and the fibrelink
//! stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Fibrelink stack users should depend
//! on the `fibrelink` crate instead.
//!
//! A `Link` encompasses three asynchronous channels:
//! * `RxFilter` produces receiver filter updates
//! * `Rx` consumes bus events (received frames and transmit confirmations)
//! * `Tx` produces frames for transmission
//!
//! Unlike other network stack implementations, fibrelink relies on driver runners
//! to pull and push data. This design works because the basic stack structures are
//! channel-like, while common drivers need their own task to dispatch preempted
//! frames. Thus, the inverse structure eliminates intermediate channels and
//! redundant runners.
//!
//! A driver should be able to filter in heartbeat frames, which occupy a reserved
//! identifier range, and regular frames addressed to the node once an address is
//! held. `RxFilter` provides a stream of filter add and removal requests; the
//! first request always enables the heartbeat bank.
//!
//! The `Rx` channel carries two kinds of events. Received frames are the frames
//! that passed the hardware filters. Transmit confirmations report whether the
//! previously fetched frame completed on the wire (hardware ACK); the stack uses
//! them both to release the single per-interface transmit slot and to drive the
//! address claim state machine. A driver must report exactly one confirmation per
//! fetched frame. The interrupt-side work is one frame copy and one push; the
//! channel may block only for short periods and must not be used to exert
//! back-pressure on the bus.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod frame;
pub mod internal;
pub mod link;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
