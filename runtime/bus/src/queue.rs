//! Per-adapter job FIFO and transaction pool

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::state::TransferState;
use crate::transaction::{BusTransaction, TxnId};
use crate::BusError;

pub(crate) struct JobQueue {
    fifo: VecDeque<BusTransaction>,
    depth: usize,
    pool: Vec<BusTransaction>,
    pool_size: usize,
    buffer_capacity: usize,
    next_id: u32,
    pub(crate) submitted: u64,
}

impl JobQueue {
    pub(crate) fn new(depth: usize, pool_size: usize, buffer_capacity: usize) -> Self {
        let mut pool = Vec::with_capacity(pool_size);
        pool.resize_with(pool_size, || BusTransaction::with_capacity(buffer_capacity));
        Self {
            fifo: VecDeque::with_capacity(depth),
            depth,
            pool,
            pool_size,
            buffer_capacity,
            next_id: 0,
            submitted: 0,
        }
    }

    /// A wiped transaction, from the pool when one is available
    pub(crate) fn new_job(&mut self) -> BusTransaction {
        self.pool
            .pop()
            .unwrap_or_else(|| BusTransaction::with_capacity(self.buffer_capacity))
    }

    /// Wipe a finished transaction and keep it if the pool has room
    pub(crate) fn release(&mut self, mut job: BusTransaction) {
        if self.pool.len() < self.pool_size {
            job.wipe();
            self.pool.push(job);
        }
    }

    /// Append to the FIFO
    ///
    /// A transaction keeps its id across resubmission. On a full FIFO the
    /// transaction is handed back untouched.
    pub(crate) fn enqueue(
        &mut self,
        mut job: BusTransaction,
    ) -> Result<TxnId, (BusError, BusTransaction)> {
        if self.fifo.len() >= self.depth {
            return Err((BusError::QueueFull { depth: self.depth }, job));
        }

        let id = match job.id() {
            Some(id) => id,
            None => {
                let id = TxnId(self.next_id);
                self.next_id = self.next_id.wrapping_add(1);
                job.set_id(id);
                id
            }
        };
        job.set_state(TransferState::Queued);
        self.fifo.push_back(job);
        self.submitted += 1;
        Ok(id)
    }

    pub(crate) fn pop_front(&mut self) -> Option<BusTransaction> {
        self.fifo.pop_front()
    }

    /// Pull one queued transaction out of line
    pub(crate) fn remove(&mut self, id: TxnId) -> Option<BusTransaction> {
        let pos = self.fifo.iter().position(|job| job.id() == Some(id))?;
        self.fifo.remove(pos)
    }

    /// Pull the first queued transaction matching `pred` out of line
    pub(crate) fn remove_first(
        &mut self,
        pred: impl Fn(&BusTransaction) -> bool,
    ) -> Option<BusTransaction> {
        let pos = self.fifo.iter().position(pred)?;
        self.fifo.remove(pos)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: TxnId) -> bool {
        self.fifo.iter().any(|job| job.id() == Some(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.fifo.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub(crate) fn pool_available(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_ids() {
        let mut jobs = JobQueue::new(4, 2, 8);
        let a = jobs.enqueue(BusTransaction::command(0x10)).unwrap();
        let b = jobs.enqueue(BusTransaction::command(0x11)).unwrap();
        assert_ne!(a, b);

        assert_eq!(jobs.pop_front().unwrap().id(), Some(a));
        assert_eq!(jobs.pop_front().unwrap().id(), Some(b));
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_full_fifo_hands_job_back() {
        let mut jobs = JobQueue::new(1, 0, 8);
        jobs.enqueue(BusTransaction::command(0x10)).unwrap();
        let (err, job) = jobs.enqueue(BusTransaction::command(0x11)).unwrap_err();
        assert_eq!(err, BusError::QueueFull { depth: 1 });
        assert_eq!(job.state(), TransferState::Idle);
        assert_eq!(job.addr(), 0x11);
    }

    #[test]
    fn test_pool_is_bounded() {
        let mut jobs = JobQueue::new(4, 1, 8);
        assert_eq!(jobs.pool_available(), 1);

        let first = jobs.new_job();
        let extra = jobs.new_job();
        assert_eq!(jobs.pool_available(), 0);

        jobs.release(first);
        jobs.release(extra);
        assert_eq!(jobs.pool_available(), 1);
    }

    #[test]
    fn test_remove_from_middle() {
        let mut jobs = JobQueue::new(4, 0, 8);
        let a = jobs.enqueue(BusTransaction::command(0x10)).unwrap();
        let b = jobs.enqueue(BusTransaction::command(0x11)).unwrap();
        let c = jobs.enqueue(BusTransaction::command(0x12)).unwrap();

        assert_eq!(jobs.remove(b).unwrap().addr(), 0x11);
        assert!(!jobs.contains(b));
        assert_eq!(jobs.pop_front().unwrap().id(), Some(a));
        assert_eq!(jobs.pop_front().unwrap().id(), Some(c));
    }
}
