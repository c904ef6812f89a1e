//! Register cache for register-oriented devices
//!
//! Most I2C/SPI peripherals expose a bank of small registers behind an
//! 8-bit pointer. A [`RegisterMap`] keeps the last known value of each one,
//! remembers which have never been read and which hold writes that have not
//! reached the device, and fills transactions to move values either way.
//! Completed transactions are folded back in with [`RegisterMap::absorb`].

use alloc::vec::Vec;

use crate::state::BusOpcode;
use crate::transaction::BusTransaction;
use crate::{BusError, Result};

/// Widest register, in bytes
pub const MAX_REGISTER_WIDTH: u8 = 4;

/// Multi-byte register layout on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    addr: u8,
    width: u8,
    writable: bool,
    value: u32,
    dirty: bool,
    unread: bool,
}

impl Entry {
    fn mask(&self) -> u32 {
        match self.width {
            4 => u32::MAX,
            w => (1u32 << (8 * w as u32)) - 1,
        }
    }
}

/// Cached register bank of one device
#[derive(Debug, Clone)]
pub struct RegisterMap {
    device_addr: u8,
    order: ByteOrder,
    entries: Vec<Entry>,
}

impl RegisterMap {
    pub fn new(device_addr: u8) -> Self {
        Self {
            device_addr,
            order: ByteOrder::default(),
            entries: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn device_addr(&self) -> u8 {
        self.device_addr
    }

    /// Declare a register
    ///
    /// # Errors
    /// - `BusError::InvalidWidth` unless `width` is 1 to 4 bytes
    /// - `BusError::DuplicateRegister` if `addr` is already defined
    pub fn define(&mut self, addr: u8, width: u8, writable: bool) -> Result<()> {
        if width == 0 || width > MAX_REGISTER_WIDTH {
            return Err(BusError::InvalidWidth(width));
        }
        if self.entry(addr).is_some() {
            return Err(BusError::DuplicateRegister(addr));
        }
        self.entries.push(Entry {
            addr,
            width,
            writable,
            value: 0,
            dirty: false,
            unread: true,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, addr: u8) -> Option<&Entry> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    fn entry_mut(&mut self, addr: u8) -> Result<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.addr == addr)
            .ok_or(BusError::UnknownRegister(addr))
    }

    /// Cached value; `None` until the register has been read or set
    pub fn value(&self, addr: u8) -> Option<u32> {
        self.entry(addr)
            .filter(|e| !e.unread || e.dirty)
            .map(|e| e.value)
    }

    /// Stage a new value; it reaches the device through [`fill_write`](Self::fill_write)
    ///
    /// Bits above the register's width are dropped.
    pub fn set(&mut self, addr: u8, value: u32) -> Result<()> {
        let entry = self.entry_mut(addr)?;
        if !entry.writable {
            return Err(BusError::ReadOnlyRegister(addr));
        }
        entry.value = value & entry.mask();
        entry.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self, addr: u8) -> bool {
        self.entry(addr).is_some_and(|e| e.dirty)
    }

    pub fn is_unread(&self, addr: u8) -> bool {
        self.entry(addr).is_some_and(|e| e.unread)
    }

    /// Registers with staged writes
    pub fn dirty(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().filter(|e| e.dirty).map(|e| e.addr)
    }

    /// Registers never read from the device
    pub fn unread(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().filter(|e| e.unread).map(|e| e.addr)
    }

    /// Forget every cached value
    pub fn invalidate(&mut self) {
        for entry in &mut self.entries {
            entry.unread = true;
        }
    }

    /// Make `job` a read of register `addr`
    pub fn fill_read(&self, addr: u8, job: &mut BusTransaction) -> Result<()> {
        let entry = *self.entry(addr).ok_or(BusError::UnknownRegister(addr))?;
        job.set_read(self.device_addr, entry.width as usize)?
            .set_sub_address(&[addr])?;
        Ok(())
    }

    /// Make `job` a write of register `addr`'s cached value
    pub fn fill_write(&self, addr: u8, job: &mut BusTransaction) -> Result<()> {
        let entry = *self.entry(addr).ok_or(BusError::UnknownRegister(addr))?;
        if !entry.writable {
            return Err(BusError::ReadOnlyRegister(addr));
        }
        let (bytes, width) = self.encode(&entry);
        job.set_write(self.device_addr, &bytes[..width])?
            .set_sub_address(&[addr])?;
        Ok(())
    }

    /// Fold a completed transaction into the cache
    ///
    /// Returns `true` if the transaction was a register access of this map.
    /// A completed read replaces the cached value; a completed write clears
    /// the dirty mark unless the value was changed again in the meantime.
    pub fn absorb(&mut self, job: &BusTransaction) -> bool {
        if !job.is_complete() || job.addr() != self.device_addr {
            return false;
        }
        let Some(&[addr]) = job.sub_address() else {
            return false;
        };
        let order = self.order;
        let Ok(entry) = self.entry_mut(addr) else {
            return false;
        };
        if job.len() != entry.width as usize {
            return false;
        }

        match job.opcode() {
            Some(BusOpcode::Read) => {
                entry.value = decode(order, job.data());
                entry.unread = false;
                entry.dirty = false;
                true
            }
            Some(BusOpcode::Write) => {
                if decode(order, job.data()) == entry.value {
                    entry.dirty = false;
                }
                entry.unread = false;
                true
            }
            _ => false,
        }
    }

    fn encode(&self, entry: &Entry) -> ([u8; MAX_REGISTER_WIDTH as usize], usize) {
        let width = entry.width as usize;
        let mut out = [0u8; MAX_REGISTER_WIDTH as usize];
        for (i, byte) in out.iter_mut().take(width).enumerate() {
            let shift = match self.order {
                ByteOrder::BigEndian => 8 * (width - 1 - i),
                ByteOrder::LittleEndian => 8 * i,
            };
            *byte = (entry.value >> shift) as u8;
        }
        (out, width)
    }
}

fn decode(order: ByteOrder, bytes: &[u8]) -> u32 {
    let fold = |acc: u32, b: &u8| (acc << 8) | *b as u32;
    match order {
        ByteOrder::BigEndian => bytes.iter().fold(0, fold),
        ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TransferState;

    fn completed(mut job: BusTransaction) -> BusTransaction {
        job.set_state(TransferState::Complete);
        job
    }

    fn sensor() -> RegisterMap {
        let mut map = RegisterMap::new(0x48);
        map.define(0x00, 2, false).unwrap();
        map.define(0x01, 1, true).unwrap();
        map
    }

    #[test]
    fn test_define_rejects_bad_widths_and_duplicates() {
        let mut map = sensor();
        assert_eq!(map.define(0x02, 0, true), Err(BusError::InvalidWidth(0)));
        assert_eq!(map.define(0x02, 5, true), Err(BusError::InvalidWidth(5)));
        assert_eq!(map.define(0x01, 1, true), Err(BusError::DuplicateRegister(0x01)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_read_fills_and_absorbs() {
        let mut map = sensor();
        assert_eq!(map.value(0x00), None);

        let mut job = BusTransaction::new();
        map.fill_read(0x00, &mut job).unwrap();
        assert_eq!(job.opcode(), Some(BusOpcode::Read));
        assert_eq!(job.len(), 2);
        assert_eq!(job.sub_address(), Some(&[0x00][..]));

        job.buffer_mut().copy_from_slice(&[0x12, 0x34]);
        assert!(map.absorb(&completed(job)));
        assert_eq!(map.value(0x00), Some(0x1234));
        assert!(!map.is_unread(0x00));
    }

    #[test]
    fn test_write_clears_dirty_only_if_unchanged() {
        let mut map = sensor();
        assert_eq!(map.set(0x00, 1), Err(BusError::ReadOnlyRegister(0x00)));

        map.set(0x01, 0x1FF).unwrap();
        assert_eq!(map.value(0x01), Some(0xFF));
        assert_eq!(map.dirty().collect::<Vec<_>>(), [0x01]);

        let mut job = BusTransaction::new();
        map.fill_write(0x01, &mut job).unwrap();
        assert_eq!(job.data(), &[0xFF]);

        map.set(0x01, 0x10).unwrap();
        assert!(map.absorb(&completed(job.clone())));
        assert!(map.is_dirty(0x01));

        let mut job = BusTransaction::new();
        map.fill_write(0x01, &mut job).unwrap();
        assert!(map.absorb(&completed(job)));
        assert!(!map.is_dirty(0x01));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut map = RegisterMap::new(0x50).with_byte_order(ByteOrder::LittleEndian);
        map.define(0x10, 3, true).unwrap();
        map.set(0x10, 0x00AB_CDEF).unwrap();

        let mut job = BusTransaction::new();
        map.fill_write(0x10, &mut job).unwrap();
        assert_eq!(job.data(), &[0xEF, 0xCD, 0xAB]);
        assert_eq!(decode(ByteOrder::LittleEndian, job.data()), 0x00AB_CDEF);
    }

    #[test]
    fn test_foreign_or_failed_jobs_ignored() {
        let mut map = sensor();
        let mut other = BusTransaction::new();
        map.fill_read(0x00, &mut other).unwrap();
        assert!(!map.absorb(&other));

        let foreign = completed(BusTransaction::read(0x49, 2).with_sub_address(&[0x00]));
        assert!(!map.absorb(&foreign));
    }
}
