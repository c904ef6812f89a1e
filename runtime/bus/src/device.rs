//! Devices - logical peripherals bound to one adapter
//!
//! A device is a capability: anything implementing [`BusDevice`] can be
//! attached to a [`BusAdapter`](crate::BusAdapter) and will receive exactly
//! one [`io_op_callback`](BusDevice::io_op_callback) for every transaction
//! that names it as callback target.

use crate::queue::JobQueue;
use crate::transaction::{BusTransaction, CallbackTarget, DeviceId, TxnId};
use crate::Result;

/// A device declined to let a transaction start; it ends with IO_RECALL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Veto;

/// What happens to a transaction after its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobDisposition {
    /// Wipe it and return it to the adapter's pool
    #[default]
    Release,
    /// Queue it again. A finished transaction is retried with the same
    /// parameters; a wiped and refilled one runs as a fresh request.
    Resubmit,
}

/// Participant in bus I/O
pub trait BusDevice {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Last chance to stop a transaction before it reaches the wire
    fn io_op_callahead(&mut self, _job: &BusTransaction) -> core::result::Result<(), Veto> {
        Ok(())
    }

    /// The transaction reached COMPLETE or FAULT
    ///
    /// The transaction is mutable only so it can be wiped and refilled for
    /// resubmission; a finished transaction's parameters cannot be changed.
    fn io_op_callback(&mut self, job: &mut BusTransaction, ctx: &mut IoContext<'_>)
        -> JobDisposition;
}

/// A device's view of its adapter during a callback
pub struct IoContext<'a> {
    device: DeviceId,
    jobs: &'a mut JobQueue,
    now_ms: u64,
}

impl<'a> IoContext<'a> {
    pub(crate) fn new(device: DeviceId, jobs: &'a mut JobQueue, now_ms: u64) -> Self {
        Self {
            device,
            jobs,
            now_ms,
        }
    }

    /// The device being called
    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    /// Adapter time at the start of this poll
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// A wiped transaction from the adapter's pool
    pub fn new_job(&mut self) -> BusTransaction {
        self.jobs.new_job()
    }

    /// Return an unused transaction to the pool
    pub fn release(&mut self, job: BusTransaction) {
        self.jobs.release(job);
    }

    /// Queue a follow-up transaction; this device is the callback target if none is set
    ///
    /// # Errors
    /// Returns `BusError::QueueFull` if the FIFO is full; the transaction goes
    /// back to the pool.
    pub fn queue_io_job(&mut self, mut job: BusTransaction) -> Result<TxnId> {
        job.set_target_if_unset(CallbackTarget::Device(self.device));
        self.jobs.enqueue(job).map_err(|(err, job)| {
            self.jobs.release(job);
            err
        })
    }

    /// Transactions waiting in the FIFO
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }
}
