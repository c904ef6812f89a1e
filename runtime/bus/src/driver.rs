//! Hardware seam
//!
//! A [`BusDriver`] performs one wire phase at a time. It either finishes the
//! phase on the spot or reports it pending; pending phases finish when the
//! interrupt handler posts a [`HwNotice`] through the adapter's
//! [`BusNotifier`], or when a later [`poll_phase`](BusDriver::poll_phase)
//! reports completion (polled controllers).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam::queue::ArrayQueue;

use crate::state::TransferFault;

/// One wire phase of a transaction
#[derive(Debug, PartialEq, Eq)]
pub enum Phase<'a> {
    /// Generate a START condition
    Start,
    /// Send the device address
    Address {
        addr: u8,
        /// No sub-address follows and the payload is read
        read: bool,
        /// The addressed device differs from the previous transaction's
        switched: bool,
    },
    /// Send the register pointer
    SubAddress(&'a [u8]),
    /// Clock out the payload
    Transmit(&'a [u8]),
    /// Clock in the payload; follows a repeated START when a sub-address was sent
    Receive(&'a mut [u8]),
    /// Generate a STOP condition
    Stop,
}

/// Result of asking the driver to run a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Complete,
    Pending,
    Fault(TransferFault),
}

/// Per-platform bus-dispatch primitive
pub trait BusDriver {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Start a phase
    fn start_phase(&mut self, phase: Phase<'_>) -> PhaseOutcome;

    /// Check on a pending phase when no notice has arrived
    fn poll_phase(&mut self, _phase: Phase<'_>) -> PhaseOutcome {
        PhaseOutcome::Pending
    }

    /// A `Ready` notice arrived for the pending phase; copy out any received data
    fn finish_phase(&mut self, _phase: Phase<'_>) {}

    /// Stop whatever the hardware is doing (abort or timeout)
    fn cancel(&mut self) {}
}

/// Completion notice posted from interrupt context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwNotice {
    /// The pending phase finished
    Ready,
    /// The pending phase failed
    Fault(TransferFault),
}

/// Lock-free mailbox from the interrupt handler to the adapter
///
/// `post` never blocks or allocates; the adapter drains notices in `poll`.
#[derive(Clone)]
pub struct BusNotifier {
    ring: Arc<ArrayQueue<HwNotice>>,
    overflows: Arc<AtomicU64>,
}

impl BusNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(ArrayQueue::new(capacity.max(1))),
            overflows: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Post a notice; returns `false` (and counts an overflow) if the mailbox is full
    pub fn post(&self, notice: HwNotice) -> bool {
        match self.ring.push(notice) {
            Ok(()) => true,
            Err(_) => {
                self.overflows.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub(crate) fn take(&self) -> Option<HwNotice> {
        self.ring.pop()
    }
}
