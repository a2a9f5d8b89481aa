//! Node context: channels, transmit gating and the background runner
//!
//! [`Node`] owns the shared state; [`Node::split`] hands out the user-facing
//! handles plus the [`Link`] a CAN driver consumes and the [`Runner`] that
//! must be polled for the node to operate. All cross-task state sits behind
//! blocking mutexes, so handles can live on different executors as long as the
//! `RawMutex` choice matches.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::Ticker;
use fibrelink_driver::internal::{DynamicLink, DynamicRx, DynamicRxFilter, DynamicTx};
use fibrelink_driver::link::{BusEvent, FilterUpdate, Link};

use crate::core::{NodeId, SerialNumber};
use crate::frame::{CanFrame, Data};
use crate::node::negotiator::{ClaimState, Negotiator};
use crate::time::{Duration, Instant};

/// Interval between two heartbeats of the same node
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(500);

const EVENT_QUEUE_DEPTH: usize = 16;
const INBOX_DEPTH: usize = 8;

/// What the in-flight frame was, so its confirmation can be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Heartbeat,
    Regular,
}

struct GateState {
    in_flight: Option<FrameKind>,
    waker: WakerRegistration,
}

/// Bound-1 transmit slot
///
/// At most one frame is offered to the driver until the confirmation for the
/// previous one arrives. A single waiting sender is supported; the runner
/// never waits, it skips the heartbeat round instead.
struct TxGate<M: RawMutex> {
    state: Mutex<M, RefCell<GateState>>,
}

impl<M: RawMutex> TxGate<M> {
    const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                in_flight: None,
                waker: WakerRegistration::new(),
            })),
        }
    }

    fn try_acquire(&self, kind: FrameKind) -> bool {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.in_flight.is_some() {
                return false;
            }
            state.in_flight = Some(kind);
            true
        })
    }

    /// Waits for the slot. Safe to drop.
    async fn acquire(&self, kind: FrameKind) {
        poll_fn(|cx| {
            self.state.lock(|state| {
                let mut state = state.borrow_mut();
                if state.in_flight.is_some() {
                    state.waker.register(cx.waker());
                    Poll::Pending
                } else {
                    state.in_flight = Some(kind);
                    Poll::Ready(())
                }
            })
        })
        .await
    }

    fn release(&self) -> Option<FrameKind> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let kind = state.in_flight.take();
            state.waker.wake();
            kind
        })
    }
}

struct FilterState {
    heartbeats_added: bool,
    advertised: Option<NodeId>,
    target: Option<NodeId>,
    waker: WakerRegistration,
}

/// Node address negotiation context
///
/// Create one per CAN interface and call [`split`](Self::split) to obtain the
/// operating handles.
pub struct Node<M: RawMutex> {
    state: NodeState<M>,
}

struct NodeState<M: RawMutex> {
    negotiator: Mutex<M, RefCell<Negotiator>>,
    events: Channel<M, BusEvent, EVENT_QUEUE_DEPTH>,
    tx_frames: Channel<M, CanFrame, 1>,
    rx_frames: Channel<M, CanFrame, INBOX_DEPTH>,
    gate: TxGate<M>,
    filter: Mutex<M, RefCell<FilterState>>,
}

impl<M: RawMutex + Sync> Node<M> {
    pub fn new(serial: SerialNumber) -> Self {
        Self::from_negotiator(Negotiator::new(serial, Instant::now()))
    }

    /// Starts negotiation from `preferred` instead of the serial-derived
    /// candidate, e.g. to resume the address of a previous boot
    pub fn with_preferred(serial: SerialNumber, preferred: NodeId) -> Self {
        Self::from_negotiator(Negotiator::with_preferred(serial, preferred, Instant::now()))
    }

    fn from_negotiator(negotiator: Negotiator) -> Self {
        Self {
            state: NodeState {
                negotiator: Mutex::new(RefCell::new(negotiator)),
                events: Channel::new(),
                tx_frames: Channel::new(),
                rx_frames: Channel::new(),
                gate: TxGate::new(),
                filter: Mutex::new(RefCell::new(FilterState {
                    heartbeats_added: false,
                    advertised: None,
                    target: None,
                    waker: WakerRegistration::new(),
                })),
            },
        }
    }

    pub fn split(
        &mut self,
    ) -> (
        Status<'_, M>,
        Sender<'_, M>,
        Inbox<'_, M>,
        Link<'_>,
        Runner<'_, M>,
    ) {
        (
            Status { node: &self.state },
            Sender { node: &self.state },
            Inbox { node: &self.state },
            Link::new(&self.state),
            Runner { node: &self.state },
        )
    }
}

impl<M: RawMutex> NodeState<M> {
    fn assigned_id(&self, now: Instant) -> Option<NodeId> {
        self.negotiator.lock(|n| n.borrow().assigned_id(now))
    }

    fn set_filter_target(&self, target: Option<NodeId>) {
        self.filter.lock(|state| {
            let mut state = state.borrow_mut();
            if state.target != target {
                state.target = target;
                state.waker.wake();
            }
        });
    }
}

impl<M: RawMutex> DynamicRxFilter for NodeState<M> {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<FilterUpdate> {
        self.filter.lock(|state| {
            let mut state = state.borrow_mut();
            if !state.heartbeats_added {
                state.heartbeats_added = true;
                return Poll::Ready(FilterUpdate::AddHeartbeats);
            }
            if state.advertised != state.target {
                if let Some(old) = state.advertised.take() {
                    return Poll::Ready(FilterUpdate::RemoveNode(old));
                }
                if let Some(new) = state.target {
                    state.advertised = Some(new);
                    return Poll::Ready(FilterUpdate::AddNode(new));
                }
            }
            state.waker.register(cx.waker());
            Poll::Pending
        })
    }
}

impl<M: RawMutex> DynamicRx for NodeState<M> {
    fn poll_push(&self, cx: &mut Context<'_>, event: &BusEvent) -> Poll<()> {
        loop {
            if self.events.try_send(*event).is_ok() {
                return Poll::Ready(());
            }
            if self.events.poll_ready_to_send(cx).is_pending() {
                return Poll::Pending;
            }
        }
    }
}

impl<M: RawMutex> DynamicTx for NodeState<M> {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<CanFrame> {
        self.tx_frames.poll_receive(cx)
    }
}

impl<M: RawMutex> DynamicLink for NodeState<M> {}

/// Assignment queries
pub struct Status<'a, M: RawMutex> {
    node: &'a NodeState<M>,
}

impl<M: RawMutex> Status<'_, M> {
    /// The node's own address, `None` unless currently self-assigned
    pub fn node_id(&self) -> Option<NodeId> {
        self.node.assigned_id(Instant::now())
    }

    pub fn claim_state(&self) -> ClaimState {
        self.node.negotiator.lock(|n| n.borrow().state())
    }

    pub fn serial(&self) -> SerialNumber {
        self.node.negotiator.lock(|n| n.borrow().serial())
    }
}

/// Send failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The node holds no defended address
    NotAssigned,
    /// The transmit slot is occupied
    Busy,
    /// Command out of range, or the identifier would fall into the reserved
    /// heartbeat range
    InvalidFrame,
}

/// Producer of regular application frames
///
/// Frames are only accepted while the node is self-assigned; the claimed
/// address becomes the frame's source field.
pub struct Sender<'a, M: RawMutex> {
    node: &'a NodeState<M>,
}

impl<M: RawMutex> Sender<'_, M> {
    /// Queues a regular frame, waiting for the transmit slot. Safe to drop.
    pub async fn send(&mut self, command: u8, data: Data) -> Result<(), SendError> {
        let node_id = self
            .node
            .assigned_id(Instant::now())
            .ok_or(SendError::NotAssigned)?;
        let frame = CanFrame::regular(node_id, command, data).ok_or(SendError::InvalidFrame)?;

        self.node.gate.acquire(FrameKind::Regular).await;
        // The claim may have lapsed while waiting for the slot
        if self.node.assigned_id(Instant::now()) != Some(node_id) {
            self.node.gate.release();
            return Err(SendError::NotAssigned);
        }
        if self.node.tx_frames.try_send(frame).is_err() {
            self.node.gate.release();
            return Err(SendError::Busy);
        }
        Ok(())
    }

    /// Queues a regular frame if the transmit slot is free right now
    pub fn try_send(&mut self, command: u8, data: Data) -> Result<(), SendError> {
        let node_id = self
            .node
            .assigned_id(Instant::now())
            .ok_or(SendError::NotAssigned)?;
        let frame = CanFrame::regular(node_id, command, data).ok_or(SendError::InvalidFrame)?;

        if !self.node.gate.try_acquire(FrameKind::Regular) {
            return Err(SendError::Busy);
        }
        if self.node.tx_frames.try_send(frame).is_err() {
            self.node.gate.release();
            return Err(SendError::Busy);
        }
        Ok(())
    }
}

/// Consumer of received regular frames
///
/// Heartbeats never show up here, the runner absorbs them. Frames received
/// while the inbox is full are dropped.
pub struct Inbox<'a, M: RawMutex> {
    node: &'a NodeState<M>,
}

impl<M: RawMutex> Inbox<'_, M> {
    /// Waits for the next regular frame. Safe to drop.
    pub async fn pop(&mut self) -> CanFrame {
        self.node.rx_frames.receive().await
    }

    pub fn try_pop(&mut self) -> Option<CanFrame> {
        self.node.rx_frames.try_receive().ok()
    }
}

/// Node background task runner
///
/// Run for proper node operation: it schedules heartbeats, consumes bus
/// events and keeps the receiver filters in line with the claim state.
pub struct Runner<'a, M: RawMutex> {
    node: &'a NodeState<M>,
}

impl<M: RawMutex> Runner<'_, M> {
    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(HEARTBEAT_PERIOD);

        loop {
            match select(ticker.next(), self.node.events.receive()).await {
                Either::First(()) => self.on_tick(),
                Either::Second(event) => self.on_event(event),
            }
            let assigned = self.node.assigned_id(Instant::now());
            self.node.set_filter_target(assigned);
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let Some(id) = self.node.negotiator.lock(|n| n.borrow_mut().tick(now)) else {
            warn!("address space exhausted, skipping heartbeat");
            return;
        };
        if !self.node.gate.try_acquire(FrameKind::Heartbeat) {
            // Previous frame still unconfirmed, try again next period
            trace!("transmit slot busy, skipping heartbeat");
            return;
        }
        let serial = self.node.negotiator.lock(|n| n.borrow().serial());
        if self.node.tx_frames.try_send(CanFrame::heartbeat(id, serial)).is_err() {
            self.node.gate.release();
        }
    }

    fn on_event(&mut self, event: BusEvent) {
        let now = Instant::now();
        match event {
            BusEvent::Received(frame) => {
                if let Some((id, serial)) = frame.parse_heartbeat() {
                    self.node
                        .negotiator
                        .lock(|n| n.borrow_mut().on_heartbeat(id, serial, now));
                } else if self.node.rx_frames.try_send(frame).is_err() {
                    trace!("inbox full, dropping frame");
                }
            }
            BusEvent::TxComplete { success } => match self.node.gate.release() {
                Some(FrameKind::Heartbeat) => {
                    self.node
                        .negotiator
                        .lock(|n| n.borrow_mut().on_tx_result(success, now));
                }
                Some(FrameKind::Regular) => {
                    if !success {
                        trace!("regular frame transmission failed");
                    }
                }
                None => warn!("transmit confirmation with no frame in flight"),
            },
        }
    }
}
