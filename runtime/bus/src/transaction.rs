//! Bus transactions
//!
//! A [`BusTransaction`] is one request on one bus: opcode, 7-bit device
//! address, optional sub-address (register pointer), and an owned buffer.
//! Parameters can only be changed while the transaction is IDLE; once an
//! adapter has accepted it, the adapter is the only thing that changes its
//! state, and a COMPLETE or FAULT transaction stays as it is until
//! [`wipe`](BusTransaction::wipe)d.

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use crate::state::{BusOpcode, TransferFault, TransferState};
use crate::{BusError, Result};

/// Largest sub-address, in bytes
pub const MAX_SUBADDR_LEN: usize = 4;

/// Highest valid 7-bit device address
pub const MAX_DEVICE_ADDR: u8 = 0x7F;

/// Identifier assigned when a transaction is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub(crate) u32);

impl TxnId {
    /// Raw value, for carrying the id inside an event argument
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Handle to a device attached to an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u16);

impl DeviceId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Who receives the completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackTarget {
    /// An attached [`BusDevice`](crate::BusDevice)
    Device(DeviceId),
    /// The adapter itself (bus scan probes)
    Adapter,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TxnFlags: u8 {
        /// The sub-address phase has gone out on the wire
        const SUBADDR_SENT = 1 << 0;
        /// Bus-scan probe owned by the adapter
        const PING = 1 << 1;
    }
}

/// One request on one bus
#[derive(Clone, PartialEq, Eq)]
pub struct BusTransaction {
    id: Option<TxnId>,
    opcode: Option<BusOpcode>,
    addr: u8,
    subaddr: [u8; MAX_SUBADDR_LEN],
    subaddr_len: u8,
    buf: Vec<u8>,
    state: TransferState,
    fault: Option<TransferFault>,
    target: Option<CallbackTarget>,
    flags: TxnFlags,
}

impl Default for BusTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransaction {
    /// An IDLE transaction with no opcode
    pub const fn new() -> Self {
        Self {
            id: None,
            opcode: None,
            addr: 0,
            subaddr: [0; MAX_SUBADDR_LEN],
            subaddr_len: 0,
            buf: Vec::new(),
            state: TransferState::Idle,
            fault: None,
            target: None,
            flags: TxnFlags::empty(),
        }
    }

    /// An IDLE transaction whose buffer can hold `capacity` bytes without reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::new()
        }
    }

    /// Read `len` bytes from `addr`
    pub fn read(addr: u8, len: usize) -> Self {
        let mut job = Self::with_capacity(len);
        // A fresh transaction is IDLE
        let _ = job.set_read(addr, len);
        job
    }

    /// Write `data` to `addr`
    pub fn write(addr: u8, data: &[u8]) -> Self {
        let mut job = Self::with_capacity(data.len());
        let _ = job.set_write(addr, data);
        job
    }

    /// Address-only command to `addr`
    pub fn command(addr: u8) -> Self {
        let mut job = Self::new();
        let _ = job.set_command(addr);
        job
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != TransferState::Idle {
            return Err(BusError::NotIdle(self.state));
        }
        Ok(())
    }

    /// Turn this IDLE transaction into a read of `len` bytes
    ///
    /// # Errors
    /// Returns `BusError::NotIdle` unless the transaction is IDLE
    pub fn set_read(&mut self, addr: u8, len: usize) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.opcode = Some(BusOpcode::Read);
        self.addr = addr;
        self.buf.clear();
        self.buf.resize(len, 0);
        Ok(self)
    }

    /// Turn this IDLE transaction into a write of `data`
    pub fn set_write(&mut self, addr: u8, data: &[u8]) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.opcode = Some(BusOpcode::Write);
        self.addr = addr;
        self.buf.clear();
        self.buf.extend_from_slice(data);
        Ok(self)
    }

    /// Turn this IDLE transaction into an address-only command
    pub fn set_command(&mut self, addr: u8) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.opcode = Some(BusOpcode::WriteCommand);
        self.addr = addr;
        self.buf.clear();
        Ok(self)
    }

    /// Send `subaddr` (a register pointer) after the device address
    ///
    /// Longer sub-addresses are kept as given and rejected with BAD_PARAM
    /// when the transaction begins.
    pub fn set_sub_address(&mut self, subaddr: &[u8]) -> Result<&mut Self> {
        self.ensure_idle()?;
        let len = subaddr.len().min(MAX_SUBADDR_LEN);
        self.subaddr = [0; MAX_SUBADDR_LEN];
        self.subaddr[..len].copy_from_slice(&subaddr[..len]);
        self.subaddr_len = subaddr.len().min(u8::MAX as usize) as u8;
        Ok(self)
    }

    /// Builder form of [`set_sub_address`](Self::set_sub_address)
    pub fn with_sub_address(mut self, subaddr: &[u8]) -> Self {
        let _ = self.set_sub_address(subaddr);
        self
    }

    /// Builder form of [`set_callback_target`](Self::set_callback_target)
    pub fn with_callback_target(mut self, target: CallbackTarget) -> Self {
        let _ = self.set_callback_target(target);
        self
    }

    pub fn set_callback_target(&mut self, target: CallbackTarget) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.target = Some(target);
        Ok(self)
    }

    /// Reset to IDLE for reuse
    ///
    /// Clears opcode, addressing, fault, callback target and flags, and
    /// zeroes the buffer. The buffer's allocation is kept.
    pub fn wipe(&mut self) {
        self.buf.fill(0);
        self.buf.clear();
        self.id = None;
        self.opcode = None;
        self.addr = 0;
        self.subaddr = [0; MAX_SUBADDR_LEN];
        self.subaddr_len = 0;
        self.state = TransferState::Idle;
        self.fault = None;
        self.target = None;
        self.flags = TxnFlags::empty();
    }

    pub fn id(&self) -> Option<TxnId> {
        self.id
    }

    pub fn opcode(&self) -> Option<BusOpcode> {
        self.opcode
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    /// Sub-address bytes, if any
    pub fn sub_address(&self) -> Option<&[u8]> {
        match self.subaddr_len {
            0 => None,
            n => Some(&self.subaddr[..(n as usize).min(MAX_SUBADDR_LEN)]),
        }
    }

    /// Payload: data to write, or data read once COMPLETE
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn fault(&self) -> Option<TransferFault> {
        self.fault
    }

    pub fn is_complete(&self) -> bool {
        self.state == TransferState::Complete
    }

    pub fn callback_target(&self) -> Option<CallbackTarget> {
        self.target
    }

    pub fn flags(&self) -> TxnFlags {
        self.flags
    }

    /// Check the parameters `begin` relies on
    pub(crate) fn validate(&self) -> core::result::Result<(), TransferFault> {
        let opcode = self.opcode.ok_or(TransferFault::BadParam)?;
        if self.addr > MAX_DEVICE_ADDR || self.subaddr_len as usize > MAX_SUBADDR_LEN {
            return Err(TransferFault::BadParam);
        }
        if opcode.has_payload() && self.buf.is_empty() {
            return Err(TransferFault::BadParam);
        }
        Ok(())
    }

    pub(crate) fn set_id(&mut self, id: TxnId) {
        self.id = Some(id);
    }

    pub(crate) fn set_target_if_unset(&mut self, target: CallbackTarget) {
        if self.target.is_none() {
            self.target = Some(target);
        }
    }

    pub(crate) fn insert_flags(&mut self, flags: TxnFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn set_state(&mut self, state: TransferState) {
        self.state = state;
    }

    pub(crate) fn set_fault(&mut self, fault: TransferFault) {
        self.fault = Some(fault);
        self.state = TransferState::Fault;
    }

    /// Put a finished transaction back in line with its parameters intact
    pub(crate) fn rearm(&mut self) {
        self.state = TransferState::Idle;
        self.fault = None;
        self.flags.remove(TxnFlags::SUBADDR_SENT);
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl fmt::Debug for BusTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusTransaction")
            .field("id", &self.id)
            .field("opcode", &self.opcode)
            .field("addr", &format_args!("{:#04x}", self.addr))
            .field("subaddr", &self.sub_address())
            .field("len", &self.buf.len())
            .field("state", &self.state)
            .field("fault", &self.fault)
            .field("target", &self.target)
            .finish()
    }
}
