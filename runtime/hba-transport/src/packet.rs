//! Wire frame codec
//!
//! ```text
//! byte 0   [7] 1=read 0=write | [6:4] register count - 1 | [3:0] core id
//! byte 1   first register
//! byte 2.. write: data bytes then one ack slot; read: placeholders
//! ```
//!
//! A read of `n` registers is `n + 4` bytes and is answered with `n + 2`
//! bytes (the two header bytes echoed, then data). A write of `n` registers
//! is `n + 3` bytes and is answered with a single [`ACK`].

use core::fmt;

use static_assertions::const_assert;

/// Largest request or response on the wire
pub const MAX_PACKET: usize = 16;
/// Registers one request can cover (3-bit count field)
pub const MAX_REGISTERS: usize = 8;
/// Core ids are 4 bits wide
pub const NUM_CORES: usize = 16;
/// Write acknowledgement
pub const ACK: u8 = 0xAC;

const READ_BIT: u8 = 0x80; // Direction: 1 = read
const COUNT_SHIFT: u8 = 4;
const COUNT_MASK: u8 = 0x07; // Register count - 1
const CORE_MASK: u8 = 0x0F; // Core id

// Core 0 register map
/// Pending-interrupt mask, low byte
pub const REG_PENDING_LO: u8 = 0;
/// Pending-interrupt mask, high byte
pub const REG_PENDING_HI: u8 = 1;
/// Host link baud code
pub const REG_BAUD_CODE: u8 = 2;

const_assert!(MAX_REGISTERS + 4 <= MAX_PACKET);
const_assert!(NUM_CORES == CORE_MASK as usize + 1);
const_assert!(MAX_REGISTERS == COUNT_MASK as usize + 1);

/// FPGA core identifier, 0-15
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(u8);

impl CoreId {
    /// The transport's own core: interrupt mask and baud control
    pub const TRANSPORT: CoreId = CoreId(0);

    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < NUM_CORES {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Core 0 belongs to the transport and is never handed to a driver
    pub const fn is_reserved(self) -> bool {
        self.0 == 0
    }

    /// Every core a peripheral driver may own, ascending
    pub fn peripherals() -> impl Iterator<Item = CoreId> {
        (1..NUM_CORES as u8).map(CoreId)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Decoded first two bytes of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub direction: Direction,
    pub core: CoreId,
    pub register: u8,
    count: u8,
}

impl Header {
    /// # Returns
    /// `None` if `count` is outside 1..=8
    pub fn new(direction: Direction, core: CoreId, register: u8, count: usize) -> Option<Self> {
        if !(1..=MAX_REGISTERS).contains(&count) {
            return None;
        }
        Some(Self {
            direction,
            core,
            register,
            count: count as u8,
        })
    }

    pub fn count(&self) -> usize {
        usize::from(self.count)
    }

    pub fn encode(&self) -> [u8; 2] {
        let dir = match self.direction {
            Direction::Read => READ_BIT,
            Direction::Write => 0,
        };
        let b0 = dir | ((self.count - 1) & COUNT_MASK) << COUNT_SHIFT | self.core.get();
        [b0, self.register]
    }

    pub fn decode(bytes: [u8; 2]) -> Self {
        let direction = if bytes[0] & READ_BIT != 0 {
            Direction::Read
        } else {
            Direction::Write
        };
        Self {
            direction,
            core: CoreId(bytes[0] & CORE_MASK),
            register: bytes[1],
            count: ((bytes[0] >> COUNT_SHIFT) & COUNT_MASK) + 1,
        }
    }

    /// Bytes on the wire for this request
    pub fn request_len(&self) -> usize {
        match self.direction {
            Direction::Read => self.count() + 4,
            Direction::Write => self.count() + 3,
        }
    }

    /// Bytes the FPGA answers with
    pub fn response_len(&self) -> usize {
        match self.direction {
            Direction::Read => self.count() + 2,
            Direction::Write => 1,
        }
    }
}

/// Response length the engine waits for after sending `count` bytes that
/// start with header byte `b0`.
///
/// # Returns
/// `None` for reads shorter than 3 bytes, which cannot carry a response
pub fn expected_response_len(b0: u8, count: usize) -> Option<usize> {
    if b0 & READ_BIT != 0 {
        if count < 3 {
            None
        } else {
            Some(count - 2)
        }
    } else {
        Some(1)
    }
}

/// Request buffer, overwritten in place by the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    buf: [u8; MAX_PACKET],
    len: usize,
}

impl Packet {
    /// Read `count` registers starting at `register`
    pub fn read(core: CoreId, register: u8, count: usize) -> Option<Self> {
        let header = Header::new(Direction::Read, core, register, count)?;
        let mut buf = [0u8; MAX_PACKET];
        buf[..2].copy_from_slice(&header.encode());
        Some(Self {
            buf,
            len: header.request_len(),
        })
    }

    /// Write `data` to consecutive registers starting at `register`
    pub fn write(core: CoreId, register: u8, data: &[u8]) -> Option<Self> {
        let header = Header::new(Direction::Write, core, register, data.len())?;
        let mut buf = [0u8; MAX_PACKET];
        buf[..2].copy_from_slice(&header.encode());
        buf[2..2 + data.len()].copy_from_slice(data);
        Some(Self {
            buf,
            len: header.request_len(),
        })
    }

    pub fn header(&self) -> Header {
        Header::decode([self.buf[0], self.buf[1]])
    }

    /// Request length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Whole buffer, for handing to [`crate::FpgaBus::exchange`]
    pub fn buffer_mut(&mut self) -> &mut [u8; MAX_PACKET] {
        &mut self.buf
    }

    pub fn buffer(&self) -> &[u8; MAX_PACKET] {
        &self.buf
    }
}
