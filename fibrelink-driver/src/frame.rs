//! CAN wire frame objects

use embedded_can::StandardId;
use fibrelink_core::{NodeId, SerialNumber};

/// Base of the reserved heartbeat identifier range
///
/// Heartbeats occupy `0x700 | node_id`; one filter bank with mask
/// [`HEARTBEAT_MASK`] isolates the whole range. Regular application frames use
/// `node_id << 7 | command` and must stay below the reserved range.
pub const HEARTBEAT_BASE: u16 = 0x700;
pub const HEARTBEAT_MASK: u16 = 0x780;

/// Number of command bits in a regular frame identifier
pub const COMMAND_BITS: u32 = 7;
const COMMAND_MAX: u8 = 0x7f;

/// Number of node address bits that fit a standard identifier alongside the
/// command field
///
/// Heartbeats carry the full 7-bit address field, but only addresses below
/// `1 << NODE_BITS` can source regular frames, so address negotiation draws
/// candidates from that range.
pub const NODE_BITS: u32 = 11 - COMMAND_BITS;

/// The node address whose regular-frame identifiers all fall into the
/// reserved heartbeat range
///
/// Address negotiation never claims this address.
pub const RESERVED_NODE: NodeId = NodeId::from_u8_truncating((HEARTBEAT_BASE >> COMMAND_BITS) as u8);

/// Classic CAN frame payload, up to 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: u8,
    bytes: [u8; Data::MAX],
}

impl Data {
    pub const MAX: usize = 8;

    pub const fn new(data: &[u8]) -> Option<Self> {
        if data.len() > Self::MAX {
            return None;
        }
        let mut bytes = [0; Self::MAX];
        let mut i = 0;
        while i < data.len() {
            bytes[i] = data[i];
            i += 1;
        }
        Some(Self {
            length: data.len() as u8,
            bytes,
        })
    }

    pub const fn len(&self) -> usize {
        self.length as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..self.len()]
    }
}

/// A standard-identifier CAN frame as seen by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: StandardId,
    pub data: Data,
}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "CanFrame {{ id: {=u16:#x}, data: {} }}", self.id.as_raw(), self.data)
    }
}

impl CanFrame {
    /// A heartbeat claiming `node`: reserved identifier, 8-byte serial payload
    pub fn heartbeat(node: NodeId, serial: SerialNumber) -> Self {
        let id = unwrap!(StandardId::new(HEARTBEAT_BASE | u16::from(node.into_u8())));
        Self {
            id,
            data: unwrap!(Data::new(&serial.to_le_bytes())),
        }
    }

    /// A regular application frame: `node_id << 7 | command`
    ///
    /// Returns `None` if the identifier would fall into the reserved heartbeat
    /// range.
    pub fn regular(node: NodeId, command: u8, data: Data) -> Option<Self> {
        if command > COMMAND_MAX {
            return None;
        }
        let raw = (u16::from(node.into_u8()) << COMMAND_BITS) | u16::from(command);
        if raw & HEARTBEAT_MASK == HEARTBEAT_BASE {
            return None;
        }
        let id = StandardId::new(raw)?;
        Some(Self { id, data })
    }

    pub fn is_heartbeat(&self) -> bool {
        self.id.as_raw() & HEARTBEAT_MASK == HEARTBEAT_BASE
    }

    /// Decodes a heartbeat into the claimed id and the sender's serial number
    pub fn parse_heartbeat(&self) -> Option<(NodeId, SerialNumber)> {
        if !self.is_heartbeat() || self.data.len() != 8 {
            return None;
        }
        let node = NodeId::from_u8_truncating(self.id.as_raw() as u8);
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&self.data);
        Some((node, SerialNumber::from_le_bytes(bytes)))
    }
}
