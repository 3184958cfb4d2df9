//! Simulated FPGA register file and request framing

use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use log::trace;

use crate::link::{MockConnector, MockInterruptLine, MockLink};

/// Write acknowledgement byte
pub const ACK: u8 = 0xAC;

const NUM_CORES: usize = 16;
const NUM_REGISTERS: usize = 256;

/// Misbehaviour applied to every response until cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Requests are consumed but never answered
    Mute,
    /// Only the first `n` bytes of each response are sent
    Truncate(usize),
    /// Writes are answered with this byte instead of [`ACK`]
    BadAck(u8),
}

pub(crate) struct State {
    registers: [[u8; NUM_REGISTERS]; NUM_CORES],
    partial: Vec<u8>,
    pub(crate) tx: VecDeque<u8>,
    requests: Vec<Vec<u8>>,
    written: Vec<u8>,
    fault: Option<Fault>,

    pub(crate) write_limits: VecDeque<usize>,
    pub(crate) write_errors: VecDeque<io::ErrorKind>,
    pub(crate) wait_error: Option<io::ErrorKind>,
    pub(crate) read_chunk: Option<usize>,
    pub(crate) hung_up: bool,
    pub(crate) baud_changes: Vec<u32>,

    pub(crate) line_level: bool,
    pub(crate) line_reads: usize,
    pub(crate) line_error: Option<io::ErrorKind>,

    pub(crate) refuse_links: bool,
    pub(crate) refuse_lines: bool,
    pub(crate) opened_links: Vec<(PathBuf, u32)>,
    pub(crate) opened_lines: Vec<u32>,
}

/// Length of the request frame that starts with header byte `b0`
fn frame_len(b0: u8) -> usize {
    let count = usize::from((b0 >> 4) & 0x07) + 1;
    if b0 & 0x80 != 0 {
        count + 4
    } else {
        count + 3
    }
}

impl State {
    fn new() -> Self {
        Self {
            registers: [[0; NUM_REGISTERS]; NUM_CORES],
            partial: Vec::new(),
            tx: VecDeque::new(),
            requests: Vec::new(),
            written: Vec::new(),
            fault: None,
            write_limits: VecDeque::new(),
            write_errors: VecDeque::new(),
            wait_error: None,
            read_chunk: None,
            hung_up: false,
            baud_changes: Vec::new(),
            line_level: false,
            line_reads: 0,
            line_error: None,
            refuse_links: false,
            refuse_lines: false,
            opened_links: Vec::new(),
            opened_lines: Vec::new(),
        }
    }

    /// Feed bytes written by the host into the frame assembler
    pub(crate) fn receive(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
        for &byte in bytes {
            self.partial.push(byte);
            if self.partial.len() == frame_len(self.partial[0]) {
                let frame = std::mem::take(&mut self.partial);
                self.process(frame);
            }
        }
    }

    fn process(&mut self, frame: Vec<u8>) {
        let read = frame[0] & 0x80 != 0;
        let count = usize::from((frame[0] >> 4) & 0x07) + 1;
        let core = usize::from(frame[0] & 0x0F);
        let start = frame[1];

        let mut response = Vec::with_capacity(count + 2);
        if read {
            response.extend_from_slice(&frame[..2]);
            for i in 0..count {
                let reg = usize::from(start.wrapping_add(i as u8));
                response.push(self.registers[core][reg]);
            }
        } else {
            for (i, &value) in frame[2..2 + count].iter().enumerate() {
                let reg = usize::from(start.wrapping_add(i as u8));
                self.registers[core][reg] = value;
            }
            response.push(ACK);
        }
        trace!("mock fpga: {:02x?} -> {:02x?}", frame, response);
        self.requests.push(frame);

        match self.fault {
            None => {}
            Some(Fault::Mute) => response.clear(),
            Some(Fault::Truncate(n)) => response.truncate(n),
            Some(Fault::BadAck(byte)) => {
                if !read {
                    response[0] = byte;
                }
            }
        }
        self.tx.extend(response);
    }
}

/// Handle to a simulated FPGA
///
/// Cloning the handle shares the same device; links, interrupt lines and
/// connectors created from it all observe and drive the same state.
#[derive(Clone)]
pub struct MockFpga {
    state: Rc<RefCell<State>>,
}

impl Default for MockFpga {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFpga {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new())),
        }
    }

    pub(crate) fn state(&self) -> Ref<'_, State> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    /// Serial link wired to this device
    pub fn link(&self) -> MockLink {
        MockLink::new(self.clone())
    }

    /// Interrupt line driven by this device
    pub fn interrupt_line(&self) -> MockInterruptLine {
        MockInterruptLine::new(self.clone())
    }

    /// Connector handing out links and lines to this device
    pub fn connector(&self) -> MockConnector {
        MockConnector::new(self.clone())
    }

    // Register file

    pub fn register(&self, core: u8, reg: u8) -> u8 {
        self.state().registers[usize::from(core & 0x0F)][usize::from(reg)]
    }

    pub fn set_register(&self, core: u8, reg: u8, value: u8) {
        self.state_mut().registers[usize::from(core & 0x0F)][usize::from(reg)] = value;
    }

    /// Set a core's pending bit in core 0 registers 0/1 and raise the line
    pub fn raise_interrupt(&self, core: u8) {
        let mask = self.pending_mask() | (1u16 << (core & 0x0F));
        self.set_pending_mask(mask);
        self.set_line(true);
    }

    /// Write the pending mask directly without touching the line
    pub fn set_pending_mask(&self, mask: u16) {
        let [lo, hi] = mask.to_le_bytes();
        let mut state = self.state_mut();
        state.registers[0][0] = lo;
        state.registers[0][1] = hi;
    }

    pub fn pending_mask(&self) -> u16 {
        let state = self.state();
        u16::from_le_bytes([state.registers[0][0], state.registers[0][1]])
    }

    /// Clear every pending bit and drop the line
    pub fn clear_interrupts(&self) {
        self.set_pending_mask(0);
        self.set_line(false);
    }

    // Interrupt line

    pub fn set_line(&self, level: bool) {
        self.state_mut().line_level = level;
    }

    pub fn fail_line_reads(&self, kind: Option<io::ErrorKind>) {
        self.state_mut().line_error = kind;
    }

    /// Number of times the host sampled the line
    pub fn line_reads(&self) -> usize {
        self.state().line_reads
    }

    // Link behaviour

    /// Queue bytes the host did not ask for
    pub fn inject(&self, bytes: &[u8]) {
        self.state_mut().tx.extend(bytes.iter().copied());
    }

    pub fn set_fault(&self, fault: Option<Fault>) {
        self.state_mut().fault = fault;
    }

    /// Accept at most `n` bytes on the next write call
    pub fn limit_next_write(&self, n: usize) {
        self.state_mut().write_limits.push_back(n);
    }

    /// Fail the next write call with `kind`
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.state_mut().write_errors.push_back(kind);
    }

    /// Fail every readiness wait with `kind` (or stop failing with `None`)
    pub fn fail_waits(&self, kind: Option<io::ErrorKind>) {
        self.state_mut().wait_error = kind;
    }

    /// Deliver responses at most `n` bytes per read call
    pub fn set_read_chunk(&self, n: Option<usize>) {
        self.state_mut().read_chunk = n;
    }

    /// Simulate the device disappearing: reads return EOF, writes fail
    pub fn hang_up(&self) {
        self.state_mut().hung_up = true;
    }

    pub fn refuse_links(&self, refuse: bool) {
        self.state_mut().refuse_links = refuse;
    }

    pub fn refuse_lines(&self, refuse: bool) {
        self.state_mut().refuse_lines = refuse;
    }

    // Observation

    /// Complete request frames received, oldest first
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Every byte the host wrote, frames or not
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Response bytes not yet read by the host
    pub fn unread(&self) -> usize {
        self.state().tx.len()
    }

    pub fn baud_changes(&self) -> Vec<u32> {
        self.state().baud_changes.clone()
    }

    pub fn opened_links(&self) -> Vec<(PathBuf, u32)> {
        self.state().opened_links.clone()
    }

    pub fn opened_lines(&self) -> Vec<u32> {
        self.state().opened_lines.clone()
    }

    /// Forget recorded requests and written bytes
    pub fn clear_history(&self) {
        let mut state = self.state_mut();
        state.requests.clear();
        state.written.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(fpga: &MockFpga) -> Vec<u8> {
        fpga.state_mut().tx.drain(..).collect()
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(frame_len(0x81), 5);
        assert_eq!(frame_len(0xF0), 12);
        assert_eq!(frame_len(0x00), 4);
        assert_eq!(frame_len(0x70), 11);
    }

    #[test]
    fn test_read_echoes_header_and_data() {
        let fpga = MockFpga::new();
        fpga.set_register(1, 1, 0x2A);
        fpga.state_mut().receive(&[0x81, 0x01, 0, 0, 0]);
        assert_eq!(response(&fpga), vec![0x81, 0x01, 0x2A]);
    }

    #[test]
    fn test_write_stores_and_acks() {
        let fpga = MockFpga::new();
        fpga.state_mut().receive(&[0x13, 0x04, 0x55, 0x66, 0]);
        assert_eq!(response(&fpga), vec![ACK]);
        assert_eq!(fpga.register(3, 4), 0x55);
        assert_eq!(fpga.register(3, 5), 0x66);
    }

    #[test]
    fn test_frames_split_across_writes() {
        let fpga = MockFpga::new();
        fpga.state_mut().receive(&[0x00, 0x02]);
        assert_eq!(fpga.request_count(), 0);
        fpga.state_mut().receive(&[0x07, 0x00]);
        assert_eq!(fpga.request_count(), 1);
        assert_eq!(fpga.register(0, 2), 0x07);
    }

    #[test]
    fn test_faults_shape_responses() {
        let fpga = MockFpga::new();
        fpga.set_fault(Some(Fault::Truncate(1)));
        fpga.state_mut().receive(&[0x81, 0x01, 0, 0, 0]);
        assert_eq!(response(&fpga), vec![0x81]);

        fpga.set_fault(Some(Fault::BadAck(0x55)));
        fpga.state_mut().receive(&[0x01, 0x00, 0x01, 0]);
        assert_eq!(response(&fpga), vec![0x55]);

        fpga.set_fault(Some(Fault::Mute));
        fpga.state_mut().receive(&[0x01, 0x00, 0x01, 0]);
        assert!(response(&fpga).is_empty());
        assert_eq!(fpga.request_count(), 3);
    }

    #[test]
    fn test_interrupts_land_in_core_zero() {
        let fpga = MockFpga::new();
        fpga.raise_interrupt(2);
        fpga.raise_interrupt(9);
        assert_eq!(fpga.pending_mask(), 0x0204);
        assert_eq!(fpga.register(0, 0), 0x04);
        assert_eq!(fpga.register(0, 1), 0x02);

        fpga.clear_interrupts();
        assert_eq!(fpga.pending_mask(), 0);
    }
}
