//! Zero-configuration node addressing
//!
//! Every node periodically heartbeats the address it claims, carrying its
//! serial number as proof of identity. An address is free when no heartbeat
//! for it was seen within the trailing occupancy window; collisions resolve
//! through CAN arbitration (losing a transmission marks the address taken)
//! and through foreign heartbeats (the established claim survives, the
//! newcomer reselects). A node may source regular frames only while its own
//! claim is fresh.
//!
//! [`Negotiator`] is the pure state machine; [`Node`] wraps it with channels,
//! heartbeat scheduling and the driver-facing [`Link`].

mod context;
mod negotiator;

pub use context::{Inbox, Node, Runner, SendError, Sender, Status, HEARTBEAT_PERIOD};
pub use fibrelink_driver::link::Link;
pub use negotiator::{ClaimState, Negotiator};
