//! Fibrelink core data types
//!
//! This crate provides basic data type definitions used by other fibrelink crates.
//! Fibrelink users should not depend on this crate directly. Use the `fibrelink::core`
//! reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// CAN bus node address
///
/// Node identifiers occupy the 7-bit address space negotiated over heartbeat
/// frames. The value 0 is a valid address; uniqueness is established at runtime,
/// not by construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    const MAX_VALUE: u8 = 0x7f;
    pub const MAX: NodeId = NodeId(Self::MAX_VALUE);

    /// The number of distinct node addresses
    pub const COUNT: usize = Self::MAX_VALUE as usize + 1;

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.into_u8()
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Index into a node's endpoint table
///
/// On the wire an endpoint reference is a 16-bit field whose bit 15 carries the
/// expect-response flag; only the low 15 bits address the table. Index 0 is
/// reserved for the JSON self-description endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointId(u16);

impl EndpointId {
    const MAX_VALUE: u16 = 0x7fff;
    pub const MAX: EndpointId = EndpointId(Self::MAX_VALUE);

    /// The reserved self-description endpoint
    pub const DESCRIPTOR: EndpointId = EndpointId(0);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u16_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u16_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<EndpointId> for u16 {
    fn from(value: EndpointId) -> Self {
        value.into_u16()
    }
}

impl From<EndpointId> for usize {
    fn from(value: EndpointId) -> Self {
        u16::from(value).into()
    }
}

impl TryFrom<u16> for EndpointId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// RPC sequence number
///
/// Associates a response with its request. Bit 15 of the wire field marks an
/// acknowledgment, so sequence numbers themselves are 15 bits wide.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SeqNo(u16);

impl SeqNo {
    const MAX_VALUE: u16 = 0x7fff;
    pub const MAX: SeqNo = SeqNo(Self::MAX_VALUE);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u16_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u16_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }

    /// The next sequence number, wrapping within the 15-bit space
    pub const fn next(self) -> Self {
        Self::from_u16_truncating(self.0.wrapping_add(1))
    }
}

impl From<SeqNo> for u16 {
    fn from(value: SeqNo) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for SeqNo {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Globally unique 64-bit node serial number
///
/// Derived from the hardware UID. Heartbeat frames carry it verbatim as their
/// 8-byte payload, little-endian.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialNumber(u64);

impl SerialNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }

    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Folds the serial into a single byte, for seeding id selection
    pub const fn fold(self) -> u8 {
        let mut value = self.0;
        let mut folded = 0u8;
        while value != 0 {
            folded ^= (value & 0xff) as u8;
            value >>= 8;
        }
        folded
    }
}

impl From<u64> for SerialNumber {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<SerialNumber> for u64 {
    fn from(value: SerialNumber) -> Self {
        value.into_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert_eq!(NodeId::new(0x7f), Some(NodeId::MAX));
        assert!(NodeId::new(0x80).is_none());
        assert_eq!(NodeId::from_u8_truncating(0x85).into_u8(), 0x05);
    }

    #[test]
    fn test_endpoint_id_range() {
        assert_eq!(EndpointId::new(0x7fff), Some(EndpointId::MAX));
        assert!(EndpointId::new(0x8000).is_none());
        assert_eq!(usize::from(EndpointId::DESCRIPTOR), 0);
    }

    #[test]
    fn test_seq_no_wraps() {
        assert_eq!(SeqNo::MAX.next(), SeqNo::from_u16_truncating(0));
        let seq = SeqNo::new(41).unwrap();
        assert_eq!(seq.next(), SeqNo::new(42).unwrap());
    }

    #[test]
    fn test_serial_round_trip() {
        let serial = SerialNumber::new(0x0123_4567_89ab_cdef);
        assert_eq!(SerialNumber::from_le_bytes(serial.to_le_bytes()), serial);
    }

    #[test]
    fn test_serial_fold() {
        assert_eq!(SerialNumber::new(0).fold(), 0);
        assert_eq!(SerialNumber::new(0xff00_00ff).fold(), 0);
        assert_eq!(SerialNumber::new(0x12).fold(), 0x12);
    }
}
