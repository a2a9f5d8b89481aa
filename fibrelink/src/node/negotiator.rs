//! Node-address negotiation state machine
//!
//! Pure logic, no timers or channels. The surrounding [`Runner`] feeds it
//! three inputs: periodic ticks, foreign heartbeats observed on the bus, and
//! the completion result of its own heartbeat transmissions. From those it
//! maintains a candidate address and decides when the node may call itself
//! assigned.
//!
//! An address counts as taken when any heartbeat carrying it (or a failed own
//! transmission on it) was seen during the current or previous one-second
//! window. A node is assigned only while its own last heartbeat on the
//! candidate address completed successfully within the trailing window, so a
//! node that falls off the bus loses its claim within a second.
//!
//! [`Runner`]: super::Runner

use crate::core::{NodeId, SerialNumber};
use crate::frame::{NODE_BITS, RESERVED_NODE};
use crate::time::{Duration, Instant};

/// Window length for address occupancy and claim leases
pub(crate) const WINDOW: Duration = Duration::from_secs(1);

/// Progress of the address claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimState {
    /// No heartbeat sent yet, or the address space is exhausted
    Unassigned,
    /// Heartbeating on the candidate, claim not yet confirmed
    Claiming,
    /// Claim confirmed by a recent successful heartbeat
    Assigned,
    /// A foreign heartbeat carried our candidate address
    Contested,
}

/// 128-bit occupancy bitmap over the node address space
#[derive(Debug, Clone, Copy, Default)]
struct IdWindow([u32; 4]);

impl IdWindow {
    fn set(&mut self, id: NodeId) {
        let bit = usize::from(id.into_u8());
        self.0[bit / 32] |= 1 << (bit % 32);
    }

    fn contains(&self, id: NodeId) -> bool {
        let bit = usize::from(id.into_u8());
        self.0[bit / 32] & (1 << (bit % 32)) != 0
    }

    fn clear(&mut self) {
        self.0 = [0; 4];
    }
}

pub struct Negotiator {
    serial: SerialNumber,
    state: ClaimState,
    candidate: Option<NodeId>,
    last_success: Option<Instant>,
    rng_state: u8,
    // windows[0] accumulates, windows[1] is the previous second
    windows: [IdWindow; 2],
    rotated_at: Instant,
}

impl Negotiator {
    /// Creates a negotiator whose first candidate derives from `serial`
    pub fn new(serial: SerialNumber, now: Instant) -> Self {
        let mut negotiator = Self::with_state(serial, now);
        negotiator.reselect();
        negotiator
    }

    /// Creates a negotiator that claims `preferred` first
    pub fn with_preferred(serial: SerialNumber, preferred: NodeId, now: Instant) -> Self {
        let mut negotiator = Self::with_state(serial, now);
        negotiator.candidate = Some(preferred);
        negotiator
    }

    fn with_state(serial: SerialNumber, now: Instant) -> Self {
        // The xorshift state must be nonzero
        let seed = match serial.fold() & 0x7f {
            0 => 1,
            fold => fold,
        };
        Self {
            serial,
            state: ClaimState::Unassigned,
            candidate: None,
            last_success: None,
            rng_state: seed,
            windows: [IdWindow::default(); 2],
            rotated_at: now,
        }
    }

    pub fn serial(&self) -> SerialNumber {
        self.serial
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    pub fn candidate(&self) -> Option<NodeId> {
        self.candidate
    }

    /// The confirmed address, if the claim lease is still fresh
    pub fn assigned_id(&self, now: Instant) -> Option<NodeId> {
        if self.state != ClaimState::Assigned {
            return None;
        }
        let last = self.last_success?;
        if now > last + WINDOW {
            return None;
        }
        self.candidate
    }

    /// Advances time and returns the address to heartbeat on, if any
    ///
    /// Returns `None` when every address was seen taken within the trailing
    /// windows; the caller skips the heartbeat and retries next period.
    pub fn tick(&mut self, now: Instant) -> Option<NodeId> {
        self.rotate(now);

        if self.state == ClaimState::Assigned && self.assigned_id(now).is_none() {
            // Lease lapsed without a fresh successful heartbeat
            self.state = ClaimState::Claiming;
            self.last_success = None;
        }

        match self.candidate {
            Some(id) if self.usable(id) => {}
            _ => {
                self.reselect();
                if self.state == ClaimState::Assigned {
                    self.state = ClaimState::Claiming;
                    self.last_success = None;
                }
            }
        }

        let candidate = self.candidate?;
        if matches!(self.state, ClaimState::Unassigned | ClaimState::Contested) {
            self.state = ClaimState::Claiming;
        }
        Some(candidate)
    }

    /// Records a foreign heartbeat observed on the bus
    ///
    /// Heartbeats echoing our own serial number are ignored, everything else
    /// marks its address taken. A heartbeat on our candidate address forfeits
    /// the claim immediately; the established node keeps its address.
    pub fn on_heartbeat(&mut self, id: NodeId, serial: SerialNumber, now: Instant) {
        if serial == self.serial {
            return;
        }
        self.rotate(now);
        self.windows[0].set(id);

        if self.candidate == Some(id) {
            self.state = ClaimState::Contested;
            self.last_success = None;
            self.reselect();
        }
    }

    /// Records the completion of our own heartbeat transmission
    ///
    /// A failed transmission means another node won arbitration on the same
    /// identifier, so the address is treated exactly like one seen in a
    /// foreign heartbeat.
    pub fn on_tx_result(&mut self, success: bool, now: Instant) {
        self.rotate(now);
        if success {
            self.last_success = Some(now);
            if self.state != ClaimState::Contested {
                self.state = ClaimState::Assigned;
            }
            return;
        }

        if let Some(id) = self.candidate {
            self.windows[0].set(id);
        }
        self.last_success = None;
        self.state = ClaimState::Claiming;
        self.reselect();
    }

    fn taken(&self, id: NodeId) -> bool {
        self.windows[0].contains(id) || self.windows[1].contains(id)
    }

    fn usable(&self, id: NodeId) -> bool {
        id != RESERVED_NODE && !self.taken(id)
    }

    fn rotate(&mut self, now: Instant) {
        while now >= self.rotated_at + WINDOW {
            self.windows[1] = self.windows[0];
            self.windows[0].clear();
            self.rotated_at += WINDOW;
        }
    }

    fn next_draw(&mut self) -> u8 {
        let mut x = self.rng_state;
        x ^= x << 7;
        x ^= x >> 5;
        x ^= x << 3;
        self.rng_state = x;
        // Only addresses that can also source regular frames are worth claiming
        x & ((1 << NODE_BITS) - 1)
    }

    fn reselect(&mut self) {
        for _ in 0..2 * NodeId::COUNT {
            let id = NodeId::from_u8_truncating(self.next_draw());
            if self.usable(id) {
                self.candidate = Some(id);
                return;
            }
        }
        // Address space exhausted as far as the windows can tell
        self.candidate = None;
        self.state = ClaimState::Unassigned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn fresh_negotiator_claims_a_candidate() {
        let mut negotiator = Negotiator::new(SerialNumber::new(0xdead_beef), at(0));
        let id = negotiator.tick(at(0)).unwrap();
        assert_eq!(negotiator.state(), ClaimState::Claiming);
        assert_eq!(negotiator.candidate(), Some(id));
        assert_eq!(negotiator.assigned_id(at(0)), None);
    }

    #[test]
    fn successful_heartbeat_confirms_the_claim() {
        let mut negotiator = Negotiator::new(SerialNumber::new(1), at(0));
        let id = negotiator.tick(at(0)).unwrap();
        negotiator.on_tx_result(true, at(10));
        assert_eq!(negotiator.assigned_id(at(10)), Some(id));
        assert_eq!(negotiator.state(), ClaimState::Assigned);
    }

    #[test]
    fn claim_lapses_without_fresh_heartbeats() {
        let mut negotiator = Negotiator::new(SerialNumber::new(1), at(0));
        negotiator.tick(at(0));
        negotiator.on_tx_result(true, at(0));
        assert!(negotiator.assigned_id(at(900)).is_some());
        assert_eq!(negotiator.assigned_id(at(1500)), None);

        negotiator.tick(at(1500));
        assert_eq!(negotiator.state(), ClaimState::Claiming);
    }

    #[test]
    fn foreign_heartbeat_on_candidate_forces_reselection() {
        let serial = SerialNumber::new(42);
        let preferred = NodeId::new(9).unwrap();
        let mut negotiator = Negotiator::with_preferred(serial, preferred, at(0));
        negotiator.tick(at(0));
        negotiator.on_tx_result(true, at(0));

        negotiator.on_heartbeat(preferred, SerialNumber::new(7), at(100));
        assert_eq!(negotiator.state(), ClaimState::Contested);
        assert_eq!(negotiator.assigned_id(at(100)), None);
        assert_ne!(negotiator.candidate(), Some(preferred));

        let next = negotiator.tick(at(500)).unwrap();
        assert_ne!(next, preferred);
        assert_eq!(negotiator.state(), ClaimState::Claiming);
    }

    #[test]
    fn own_heartbeat_echo_is_ignored() {
        let serial = SerialNumber::new(42);
        let preferred = NodeId::new(9).unwrap();
        let mut negotiator = Negotiator::with_preferred(serial, preferred, at(0));
        negotiator.tick(at(0));
        negotiator.on_heartbeat(preferred, serial, at(100));
        assert_eq!(negotiator.candidate(), Some(preferred));
        assert_ne!(negotiator.state(), ClaimState::Contested);
    }

    #[test]
    fn failed_transmission_marks_the_address_taken() {
        let mut negotiator = Negotiator::new(SerialNumber::new(3), at(0));
        let first = negotiator.tick(at(0)).unwrap();
        negotiator.on_tx_result(false, at(10));
        assert_eq!(negotiator.assigned_id(at(10)), None);

        let second = negotiator.tick(at(500)).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn never_assigned_while_transmissions_fail() {
        let mut negotiator = Negotiator::new(SerialNumber::new(0x1234), at(0));
        for round in 0..100u64 {
            let now = at(round * 500);
            if negotiator.tick(now).is_some() {
                negotiator.on_tx_result(false, now);
            }
            assert_eq!(negotiator.assigned_id(now), None);
        }
    }

    #[test]
    fn reserved_address_is_never_claimed() {
        let mut negotiator = Negotiator::with_preferred(SerialNumber::new(8), RESERVED_NODE, at(0));
        let id = negotiator.tick(at(0)).unwrap();
        assert_ne!(id, RESERVED_NODE);

        for round in 1..50u64 {
            if let Some(id) = negotiator.tick(at(round * 500)) {
                assert_ne!(id, RESERVED_NODE);
            }
        }
    }

    #[test]
    fn saturated_bus_yields_no_candidate() {
        let mut negotiator = Negotiator::new(SerialNumber::new(5), at(0));
        for raw in 0..=NodeId::MAX.into_u8() {
            let id = NodeId::new(raw).unwrap();
            negotiator.on_heartbeat(id, SerialNumber::new(u64::from(raw) + 1000), at(0));
        }
        assert_eq!(negotiator.tick(at(100)), None);
        assert_eq!(negotiator.state(), ClaimState::Unassigned);

        // Occupancy ages out after both windows rotate past it
        assert!(negotiator.tick(at(2500)).is_some());
    }

    #[test]
    fn colliding_nodes_converge_to_distinct_addresses() {
        let preferred = NodeId::new(11).unwrap();
        let mut a = Negotiator::with_preferred(SerialNumber::new(0xaaaa), preferred, at(0));
        let mut b = Negotiator::with_preferred(SerialNumber::new(0xbbbb), preferred, at(0));

        for round in 0..20u64 {
            let now = at(round * 500);
            // Lower serial wins arbitration when both heartbeat the same id
            let id_a = a.tick(now);
            let id_b = b.tick(now);
            let clash = id_a.is_some() && id_a == id_b;
            if let Some(id) = id_a {
                a.on_tx_result(true, now);
                b.on_heartbeat(id, a.serial(), now);
            }
            if let Some(id) = id_b {
                b.on_tx_result(!clash, now);
                if !clash {
                    a.on_heartbeat(id, b.serial(), now);
                }
            }
        }

        let end = at(20 * 500);
        let id_a = a.assigned_id(end.checked_sub(Duration::from_millis(500)).unwrap());
        let id_b = b.assigned_id(end.checked_sub(Duration::from_millis(500)).unwrap());
        assert!(id_a.is_some());
        assert!(id_b.is_some());
        assert_ne!(id_a, id_b);
    }
}
