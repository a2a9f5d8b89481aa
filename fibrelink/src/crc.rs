//! Packet checksum engines
//!
//! Both polynomials and init values are fixed properties of the wire format and
//! must match bit-for-bit between host and node. Frames append the checksum
//! big-endian, so feeding a complete frame including its trailer leaves the
//! zero residue the framer checks for.

/// CRC8 over the 3-byte packet header
#[derive(Debug, Clone, Copy)]
pub struct Crc8(u8);

impl Default for Crc8 {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl Crc8 {
    const INIT_VALUE: u8 = 0x42;
    const POLYNOMIAL: u8 = 0x37;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= byte;
        for _bit in 0..8 {
            if (self.0 & 0x80) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn compute(bytes: &[u8]) -> u8 {
        let mut crc = Self::default();
        crc.add_bytes(bytes);
        crc.get()
    }
}

/// CRC16 over the packet payload
#[derive(Debug, Clone, Copy)]
pub struct Crc16(u16);

impl Default for Crc16 {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl Crc16 {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0x1337;
    const POLYNOMIAL: u16 = 0x3d65;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn compute(bytes: &[u8]) -> u16 {
        let mut crc = Self::default();
        crc.add_bytes(bytes);
        crc.get()
    }
}
