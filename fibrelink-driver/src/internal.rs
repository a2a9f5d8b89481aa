/// Private interfaces for the fibrelink node
///
/// Drivers should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use core::task::{Context, Poll};

use crate::frame::CanFrame;
use crate::link::{BusEvent, FilterUpdate};

pub trait DynamicRxFilter {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<FilterUpdate>;
}

pub trait DynamicRx {
    fn poll_push(&self, cx: &mut Context<'_>, event: &BusEvent) -> Poll<()>;
}

pub trait DynamicTx {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<CanFrame>;
}

pub trait DynamicLink: DynamicRxFilter + DynamicRx + DynamicTx {}
