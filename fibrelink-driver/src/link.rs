//! Channels connecting driver and fibrelink stack

use core::future::poll_fn;
use fibrelink_core::NodeId;

use crate::frame::CanFrame;
use crate::internal;

/// Receiver filter update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterUpdate {
    /// Enable the reserved heartbeat identifier bank
    AddHeartbeats,
    /// Accept regular frames addressed to `NodeId`
    AddNode(NodeId),
    /// Stop accepting regular frames addressed to `NodeId`
    RemoveNode(NodeId),
}

/// An event the driver reports to the stack
///
/// `TxComplete` refers to the frame most recently fetched through [`Tx`]:
/// `success` is the hardware transmit-complete acknowledgment, `!success` is an
/// abort (arbitration loss, missing ACK, mailbox error). Exactly one
/// confirmation must be reported per fetched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    Received(CanFrame),
    TxComplete { success: bool },
}

/// Producer of receiver filter update requests
///
/// The first update always enables the heartbeat bank. Node-address updates
/// follow the claim state: an address is added once defended and removed when
/// the claim is lost.
pub struct RxFilter<'a>(&'a (dyn internal::DynamicRxFilter + Sync));

impl<'a> RxFilter<'a> {
    /// Asynchronously fetches the next filter update request. Safe to drop.
    pub async fn pop(&mut self) -> FilterUpdate {
        poll_fn(|cx| self.0.poll_pop(cx)).await
    }
}

/// Consumer of bus events
///
/// The interrupt side should do no more than copy one frame and push. The
/// channel may block only for short periods; it must not be used to exert
/// back-pressure on the driver.
pub struct Rx<'a>(&'a (dyn internal::DynamicRx + Sync));

impl<'a> Rx<'a> {
    /// Asynchronously pushes an event. Safe to drop.
    pub async fn push(&mut self, event: BusEvent) {
        poll_fn(|cx| self.0.poll_push(cx, &event)).await;
    }
}

/// Producer of frames for transmission
///
/// The stack never offers more than one frame per interface until the
/// confirmation for the previous one arrives, so a single hardware mailbox
/// suffices.
pub struct Tx<'a>(&'a (dyn internal::DynamicTx + Sync));

impl<'a> Tx<'a> {
    /// Asynchronously fetches the next frame to transmit. Safe to drop.
    pub async fn pop(&mut self) -> CanFrame {
        poll_fn(|cx| self.0.poll_pop(cx)).await
    }
}

/// Channel container. A driver should consume it.
pub struct Link<'a>(&'a (dyn internal::DynamicLink + Sync));

impl<'a> Link<'a> {
    pub fn new(access: &'a (dyn internal::DynamicLink + Sync)) -> Self {
        Self(access)
    }

    pub fn split(self) -> (RxFilter<'a>, Rx<'a>, Tx<'a>) {
        (RxFilter(self.0), Rx(self.0), Tx(self.0))
    }
}
