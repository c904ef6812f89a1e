//! Simulated bus for tests and demos
//!
//! [`MockBus`] answers for a set of simulated devices, each a 256-byte
//! register file behind an auto-incrementing pointer. Tests script it through
//! `BusAdapter::driver_mut`: hold a payload phase pending, inject a fault,
//! refuse START, or stop acknowledging an address.

use alloc::vec;
use alloc::vec::Vec;

use crate::driver::{BusDriver, Phase, PhaseOutcome};
use crate::state::TransferFault;

/// What the mock saw on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    Start,
    Address { addr: u8, switched: bool },
    SubAddress(u8),
    Transmit(usize),
    Receive(usize),
    Stop,
}

#[derive(Debug, Clone)]
struct SimDevice {
    addr: u8,
    regs: Vec<u8>,
    pointer: u8,
    acks: bool,
}

/// Scriptable stand-in for a bus controller
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    devices: Vec<SimDevice>,
    selected: Option<usize>,
    refuse_start: bool,
    hold_payload: bool,
    holding: bool,
    fault_next: Option<TransferFault>,
    wire: Vec<WireEvent>,
    cancels: usize,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simulated device answering at `addr`
    pub fn with_device(mut self, addr: u8) -> Self {
        self.add_device(addr);
        self
    }

    pub fn add_device(&mut self, addr: u8) {
        if self.device(addr).is_none() {
            self.devices.push(SimDevice {
                addr,
                regs: vec![0; 256],
                pointer: 0,
                acks: true,
            });
        }
    }

    /// Stop (or resume) acknowledging `addr`
    pub fn set_acks(&mut self, addr: u8, acks: bool) {
        if let Some(idx) = self.device(addr) {
            self.devices[idx].acks = acks;
        }
    }

    /// Write a simulated device's registers directly
    pub fn poke(&mut self, addr: u8, reg: u8, bytes: &[u8]) {
        if let Some(idx) = self.device(addr) {
            let regs = &mut self.devices[idx].regs;
            for (i, byte) in bytes.iter().enumerate() {
                regs[(reg as usize + i) % 256] = *byte;
            }
        }
    }

    /// Read a simulated device's registers directly
    pub fn peek(&self, addr: u8, reg: u8, len: usize) -> Vec<u8> {
        self.device(addr)
            .map(|idx| {
                let regs = &self.devices[idx].regs;
                (0..len).map(|i| regs[(reg as usize + i) % 256]).collect()
            })
            .unwrap_or_default()
    }

    /// Make every START fail, as if another master held the bus
    pub fn refuse_start(&mut self, refuse: bool) {
        self.refuse_start = refuse;
    }

    /// Leave the next payload phase pending until [`release`](Self::release)
    pub fn hold_next_payload(&mut self) {
        self.hold_payload = true;
    }

    /// Let a held payload phase finish on the next poll
    pub fn release(&mut self) {
        self.holding = false;
    }

    /// A payload phase is being held
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Fail the next phase with `fault`
    pub fn fail_next(&mut self, fault: TransferFault) {
        self.fault_next = Some(fault);
    }

    /// Wire log since construction
    pub fn wire(&self) -> &[WireEvent] {
        &self.wire
    }

    /// Address phases that selected a different device than the one before
    pub fn address_switches(&self) -> usize {
        self.wire
            .iter()
            .filter(|e| matches!(e, WireEvent::Address { switched: true, .. }))
            .count()
    }

    /// Times the adapter cancelled a phase
    pub fn cancels(&self) -> usize {
        self.cancels
    }

    fn device(&self, addr: u8) -> Option<usize> {
        self.devices.iter().position(|d| d.addr == addr)
    }

    fn transfer(&mut self, phase: Phase<'_>) -> PhaseOutcome {
        let Some(idx) = self.selected else {
            return PhaseOutcome::Fault(TransferFault::IllegalState);
        };
        let device = &mut self.devices[idx];
        match phase {
            Phase::Transmit(data) => {
                for byte in data {
                    device.regs[device.pointer as usize] = *byte;
                    device.pointer = device.pointer.wrapping_add(1);
                }
            }
            Phase::Receive(buf) => {
                for byte in buf.iter_mut() {
                    *byte = device.regs[device.pointer as usize];
                    device.pointer = device.pointer.wrapping_add(1);
                }
            }
            _ => return PhaseOutcome::Fault(TransferFault::IllegalState),
        }
        PhaseOutcome::Complete
    }
}

impl BusDriver for MockBus {
    fn name(&self) -> &'static str {
        "mock-bus"
    }

    fn start_phase(&mut self, phase: Phase<'_>) -> PhaseOutcome {
        if let Some(fault) = self.fault_next.take() {
            return PhaseOutcome::Fault(fault);
        }

        match phase {
            Phase::Start => {
                if self.refuse_start {
                    return PhaseOutcome::Fault(TransferFault::NoReason);
                }
                self.wire.push(WireEvent::Start);
                PhaseOutcome::Complete
            }
            Phase::Address { addr, switched, .. } => {
                self.wire.push(WireEvent::Address { addr, switched });
                match self.device(addr).filter(|&idx| self.devices[idx].acks) {
                    Some(idx) => {
                        self.selected = Some(idx);
                        PhaseOutcome::Complete
                    }
                    None => {
                        self.selected = None;
                        PhaseOutcome::Fault(TransferFault::DevNotFound)
                    }
                }
            }
            Phase::SubAddress(bytes) => {
                let Some(idx) = self.selected else {
                    return PhaseOutcome::Fault(TransferFault::IllegalState);
                };
                // 8-bit register pointer: the last byte wins
                let pointer = bytes.last().copied().unwrap_or(0);
                self.devices[idx].pointer = pointer;
                self.wire.push(WireEvent::SubAddress(pointer));
                PhaseOutcome::Complete
            }
            Phase::Transmit(data) => {
                self.wire.push(WireEvent::Transmit(data.len()));
                if self.hold_payload {
                    self.hold_payload = false;
                    self.holding = true;
                    return PhaseOutcome::Pending;
                }
                self.transfer(Phase::Transmit(data))
            }
            Phase::Receive(buf) => {
                self.wire.push(WireEvent::Receive(buf.len()));
                if self.hold_payload {
                    self.hold_payload = false;
                    self.holding = true;
                    return PhaseOutcome::Pending;
                }
                self.transfer(Phase::Receive(buf))
            }
            Phase::Stop => {
                self.wire.push(WireEvent::Stop);
                PhaseOutcome::Complete
            }
        }
    }

    fn poll_phase(&mut self, phase: Phase<'_>) -> PhaseOutcome {
        if self.holding {
            return PhaseOutcome::Pending;
        }
        match phase {
            Phase::Transmit(_) | Phase::Receive(_) => self.transfer(phase),
            _ => PhaseOutcome::Complete,
        }
    }

    fn finish_phase(&mut self, phase: Phase<'_>) {
        self.holding = false;
        if matches!(phase, Phase::Transmit(_) | Phase::Receive(_)) {
            let _ = self.transfer(phase);
        }
    }

    fn cancel(&mut self) {
        self.holding = false;
        self.selected = None;
        self.cancels += 1;
    }
}
