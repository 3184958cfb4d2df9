//! Register access helpers for peripheral drivers
//!
//! Thin wrappers that build a [`Packet`], run it through an [`FpgaBus`] and
//! check the response the way every driver has to: byte count for reads,
//! byte count plus [`ACK`] for writes.

use core::ops::Deref;

use crate::packet::{CoreId, Packet, ACK, MAX_REGISTERS};
use crate::{FpgaBus, ProtocolError};

type Result<T> = core::result::Result<T, ProtocolError>;

/// Data bytes returned by a register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    data: [u8; MAX_REGISTERS],
    len: usize,
}

impl Deref for RegisterBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Read `count` consecutive registers of `core` starting at `register`
///
/// # Errors
/// - `NotSendable` for a count outside 1..=8
/// - `NotReceivable` if the bus returns anything but `count + 2` bytes
/// - whatever the exchange itself reports
pub fn read_registers(
    bus: &dyn FpgaBus,
    core: CoreId,
    register: u8,
    count: usize,
) -> Result<RegisterBlock> {
    let mut packet = Packet::read(core, register, count).ok_or(ProtocolError::NotSendable)?;
    let len = packet.len();
    let n = bus.exchange(len, packet.buffer_mut())?;
    if n != count + 2 {
        return Err(ProtocolError::NotReceivable);
    }

    let mut data = [0u8; MAX_REGISTERS];
    data[..count].copy_from_slice(&packet.buffer()[2..2 + count]);
    Ok(RegisterBlock { data, len: count })
}

/// Write `data` to consecutive registers of `core` starting at `register`
///
/// # Errors
/// `BadAcknowledgement` when the FPGA answers with anything but `0xAC`
pub fn write_registers(bus: &dyn FpgaBus, core: CoreId, register: u8, data: &[u8]) -> Result<()> {
    let mut packet = Packet::write(core, register, data).ok_or(ProtocolError::NotSendable)?;
    let len = packet.len();
    let n = bus.exchange(len, packet.buffer_mut())?;
    check_ack(n, packet.buffer()[0])
}

pub fn read_register(bus: &dyn FpgaBus, core: CoreId, register: u8) -> Result<u8> {
    Ok(read_registers(bus, core, register, 1)?[0])
}

pub fn write_register(bus: &dyn FpgaBus, core: CoreId, register: u8, value: u8) -> Result<()> {
    write_registers(bus, core, register, &[value])
}

/// Validate a write response of `n` bytes whose first byte is `first`
pub fn check_ack(n: usize, first: u8) -> Result<()> {
    if n != 1 {
        return Err(ProtocolError::NotReceivable);
    }
    if first != ACK {
        return Err(ProtocolError::BadAcknowledgement { got: first });
    }
    Ok(())
}

/// Assemble a little-endian 16-bit register pair
pub const fn u16_le(lo: u8, hi: u8) -> u16 {
    (hi as u16) << 8 | lo as u16
}

/// Two's complement view of a little-endian register pair
pub const fn i16_le(lo: u8, hi: u8) -> i16 {
    u16_le(lo, hi) as i16
}
