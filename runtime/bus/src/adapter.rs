//! Bus adapter - one physical bus, one transaction on the wire at a time
//!
//! # Dispatch
//!
//! Transactions wait in a strict FIFO. When the bus is free the adapter
//! begins the head of the line:
//! 1. the target device's `io_op_callahead` (a veto ends it with IO_RECALL)
//! 2. parameter validation (BAD_PARAM)
//! 3. online check (BUS_BUSY)
//! 4. START, address, optional sub-address, payload, optional STOP
//!
//! Each phase either completes inside the driver call or stays pending until
//! an interrupt notice arrives or `poll` finds it done. Every transaction
//! that was accepted by `queue_io_job` ends in exactly one callback, whether
//! it completed, faulted, timed out or was recalled.
//!
//! Callbacks run after the bus has been freed, so a callback may queue
//! follow-up work without re-entering the adapter.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::ops::RangeInclusive;
use log::Level;

use crate::config::AdapterConfig;
use crate::device::{BusDevice, IoContext, JobDisposition};
use crate::driver::{BusDriver, BusNotifier, HwNotice, Phase, PhaseOutcome};
use crate::queue::JobQueue;
use crate::state::{BusOpcode, TransferFault, TransferState};
use crate::transaction::{
    BusTransaction, CallbackTarget, DeviceId, TxnFlags, TxnId, MAX_DEVICE_ADDR,
};
use crate::{BusError, Result};

const ADDR_SPACE: usize = MAX_DEVICE_ADDR as usize + 1;

/// Bus-scan result for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingStatus {
    /// Never probed, or the probe failed for a reason other than NAK
    #[default]
    Unknown,
    /// The address was acknowledged
    Present,
    /// The address was not acknowledged
    Absent,
}

/// Adapter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// Transactions accepted into the FIFO, resubmissions included
    pub submitted: u64,
    pub completed: u64,
    pub faulted: u64,
    /// Faulted with IO_RECALL (recall, purge, veto, detach)
    pub recalled: u64,
    /// Notices that arrived with no phase pending
    pub stale_notices: u64,
    /// Notices lost to a full mailbox
    pub notice_overflows: u64,
    faults: [u64; TransferFault::ALL.len()],
}

impl AdapterStats {
    /// Transactions that ended with `fault`
    pub fn fault_count(&self, fault: TransferFault) -> u64 {
        self.faults[fault.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    Address,
    SubAddress,
    Payload,
    Stop,
}

/// Where a transaction goes after `step` completes; `None` means COMPLETE
fn next_step(
    step: Step,
    job: &BusTransaction,
    explicit_stop: bool,
) -> Option<(Step, TransferState)> {
    let stop = explicit_stop.then_some((Step::Stop, TransferState::Stop));
    let payload = || match job.opcode() {
        Some(BusOpcode::Read) => Some((Step::Payload, TransferState::RxWait)),
        Some(BusOpcode::Write) => Some((Step::Payload, TransferState::TxWait)),
        _ => stop,
    };

    match step {
        Step::Start => Some((Step::Address, TransferState::Addr)),
        Step::Address if job.sub_address().is_some() => {
            Some((Step::SubAddress, TransferState::Addr))
        }
        Step::Address | Step::SubAddress => payload(),
        Step::Payload => stop,
        Step::Stop => None,
    }
}

struct InFlight {
    job: BusTransaction,
    step: Step,
    pending: bool,
    since_ms: u64,
}

impl InFlight {
    fn phase(&mut self, last_addr: Option<u8>) -> Phase<'_> {
        match self.step {
            Step::Start => Phase::Start,
            Step::Address => {
                let addr = self.job.addr();
                Phase::Address {
                    addr,
                    read: self.job.opcode() == Some(BusOpcode::Read)
                        && self.job.sub_address().is_none(),
                    switched: last_addr != Some(addr),
                }
            }
            Step::SubAddress => Phase::SubAddress(self.job.sub_address().unwrap_or(&[])),
            Step::Payload => match self.job.opcode() {
                Some(BusOpcode::Read) => Phase::Receive(self.job.buffer_mut()),
                _ => Phase::Transmit(self.job.data()),
            },
            Step::Stop => Phase::Stop,
        }
    }
}

/// Transaction engine for one physical bus
pub struct BusAdapter<D: BusDriver> {
    bus_id: u8,
    config: AdapterConfig,
    driver: D,
    notifier: BusNotifier,
    online: bool,
    last_addr: Option<u8>,
    jobs: JobQueue,
    current: Option<InFlight>,
    finished: VecDeque<BusTransaction>,
    devices: Vec<Option<Box<dyn BusDevice>>>,
    device_names: Vec<Option<&'static str>>,
    ping_map: [PingStatus; ADDR_SPACE],
    now_ms: u64,
    stats: AdapterStats,
}

impl<D: BusDriver> BusAdapter<D> {
    /// Create an online adapter driving `driver`
    pub fn new(bus_id: u8, driver: D, config: AdapterConfig) -> Self {
        let config = config.normalized();

        let mut devices = Vec::with_capacity(config.max_devices);
        devices.resize_with(config.max_devices, || None);

        Self {
            bus_id,
            driver,
            notifier: BusNotifier::new(config.notice_capacity),
            online: true,
            last_addr: None,
            jobs: JobQueue::new(config.queue_depth, config.pool_size, config.buffer_capacity),
            current: None,
            finished: VecDeque::with_capacity(config.queue_depth + 1),
            devices,
            device_names: alloc::vec![None; config.max_devices],
            ping_map: [PingStatus::Unknown; ADDR_SPACE],
            now_ms: 0,
            stats: AdapterStats::default(),
            config,
        }
    }

    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Mailbox handle for the bus interrupt handler
    pub fn notifier(&self) -> BusNotifier {
        self.notifier.clone()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Take the bus offline or back online
    ///
    /// Transactions begun while offline fault with BUS_BUSY; one already on
    /// the wire is left to finish.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
        trace_at!(
            self.config.verbosity,
            Level::Info,
            "bus{} {}",
            self.bus_id,
            if online { "online" } else { "offline" }
        );
        self.pump();
    }

    /// No transaction on the wire
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Transactions waiting in the FIFO
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    /// The transaction on the wire, if any
    pub fn in_flight(&self) -> Option<&BusTransaction> {
        self.current.as_ref().map(|active| &active.job)
    }

    /// Adapter time as of the last `poll`
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Bind a device to this bus
    ///
    /// # Errors
    /// Returns `BusError::DeviceTableFull` if every slot is taken
    pub fn attach_device(&mut self, device: Box<dyn BusDevice>) -> Result<DeviceId> {
        let idx = self
            .device_names
            .iter()
            .position(Option::is_none)
            .ok_or(BusError::DeviceTableFull {
                max: self.device_names.len(),
            })?;
        let id = DeviceId(idx as u16);

        trace_at!(
            self.config.verbosity,
            Level::Debug,
            "bus{}: attached {} as {}",
            self.bus_id,
            device.name(),
            id
        );
        self.device_names[idx] = Some(device.name());
        self.devices[idx] = Some(device);
        Ok(id)
    }

    /// Unbind a device
    ///
    /// Its queued transactions are recalled and an in-flight one is aborted,
    /// each with a final IO_RECALL callback, before the device is handed back.
    pub fn detach_device(&mut self, id: DeviceId) -> Result<Box<dyn BusDevice>> {
        self.ensure_device(id)?;
        let target = Some(CallbackTarget::Device(id));

        self.purge_device(id);
        let owns_current = self
            .current
            .as_ref()
            .is_some_and(|active| active.job.callback_target() == target);
        if owns_current {
            self.abort_current(TransferFault::IoRecall);
        }

        // Final callbacks are not subject to the per-poll budget
        for job in self.take_finished(target) {
            self.deliver(job);
        }

        let device = self
            .devices
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(BusError::UnknownDevice(id))?;
        self.device_names[id.index()] = None;

        // Anything its final callbacks queued has nobody left to call back
        while let Some(job) = self
            .jobs
            .remove_first(|job| job.callback_target() == Some(CallbackTarget::Device(id)))
        {
            trace_at!(
                self.config.verbosity,
                Level::Debug,
                "bus{}: dropping {:?} queued by detached {}",
                self.bus_id,
                job.id(),
                id
            );
            self.jobs.release(job);
        }
        for job in self.take_finished(target) {
            self.jobs.release(job);
        }
        Ok(device)
    }

    /// Pull finished transactions bound for `target` out of the delivery line
    fn take_finished(&mut self, target: Option<CallbackTarget>) -> Vec<BusTransaction> {
        let mut taken = Vec::new();
        let mut idx = 0;
        while idx < self.finished.len() {
            if self.finished[idx].callback_target() == target {
                taken.extend(self.finished.remove(idx));
            } else {
                idx += 1;
            }
        }
        taken
    }

    /// Name a device was attached under
    pub fn device_name(&self, id: DeviceId) -> Option<&'static str> {
        self.device_names.get(id.index()).copied().flatten()
    }

    fn ensure_device(&self, id: DeviceId) -> Result<()> {
        match self.device_names.get(id.index()) {
            Some(Some(_)) => Ok(()),
            _ => Err(BusError::UnknownDevice(id)),
        }
    }

    /// A wiped transaction from the pool (allocates only if the pool is empty)
    pub fn new_job(&mut self) -> BusTransaction {
        self.jobs.new_job()
    }

    /// Return an unused transaction to the pool
    pub fn release(&mut self, job: BusTransaction) {
        self.jobs.release(job);
    }

    /// Wiped transactions ready for reuse
    pub fn pool_available(&self) -> usize {
        self.jobs.pool_available()
    }

    /// Submit a transaction; begins at once if the bus is idle
    ///
    /// With a driver that completes phases synchronously the callback may
    /// already have run when this returns.
    ///
    /// # Errors
    /// - `BusError::NoCallbackTarget` if the transaction names no target
    /// - `BusError::UnknownDevice` if its target device is not attached
    /// - `BusError::NotIdle` if it is not IDLE
    /// - `BusError::QueueFull` if the FIFO is full
    ///
    /// A rejected transaction gets no callback and goes back to the pool;
    /// use [`try_queue_io_job`](Self::try_queue_io_job) to keep it instead.
    pub fn queue_io_job(&mut self, job: BusTransaction) -> Result<TxnId> {
        self.try_queue_io_job(job).map_err(|(err, job)| {
            self.jobs.release(job);
            err
        })
    }

    /// Like [`queue_io_job`](Self::queue_io_job), but a rejected transaction
    /// is handed back untouched so the caller can retry it later
    pub fn try_queue_io_job(
        &mut self,
        job: BusTransaction,
    ) -> core::result::Result<TxnId, (BusError, BusTransaction)> {
        let checked = match job.callback_target() {
            None => Err(BusError::NoCallbackTarget),
            Some(CallbackTarget::Device(dev)) => self.ensure_device(dev),
            Some(CallbackTarget::Adapter) => Ok(()),
        }
        .and_then(|()| match job.state() {
            TransferState::Idle => Ok(()),
            state => Err(BusError::NotIdle(state)),
        });
        if let Err(err) = checked {
            return Err((err, job));
        }

        let id = self.jobs.enqueue(job)?;

        trace_at!(
            self.config.verbosity,
            Level::Trace,
            "bus{}: queued {} ({} waiting)",
            self.bus_id,
            id,
            self.jobs.len()
        );
        self.pump();
        Ok(id)
    }

    /// Submit on behalf of `device`, which becomes the callback target if none is set
    pub fn queue_device_job(
        &mut self,
        device: DeviceId,
        mut job: BusTransaction,
    ) -> Result<TxnId> {
        if job.state() == TransferState::Idle {
            job.set_target_if_unset(CallbackTarget::Device(device));
        }
        self.queue_io_job(job)
    }

    /// Take a queued transaction out of line; its callback fires with IO_RECALL
    ///
    /// # Errors
    /// - `BusError::JobInFlight` once it has begun (use [`abort_current`](Self::abort_current))
    /// - `BusError::UnknownJob` if it is not queued
    pub fn recall(&mut self, id: TxnId) -> Result<()> {
        if self.in_flight().is_some_and(|job| job.id() == Some(id)) {
            return Err(BusError::JobInFlight(id));
        }
        let job = self.jobs.remove(id).ok_or(BusError::UnknownJob(id))?;
        self.fail(job, TransferFault::IoRecall);
        self.pump();
        Ok(())
    }

    /// Recall every queued transaction targeting `device`
    pub fn purge_device(&mut self, device: DeviceId) -> usize {
        let target = Some(CallbackTarget::Device(device));
        let mut purged = 0;
        while let Some(job) = self.jobs.remove_first(|job| job.callback_target() == target) {
            self.fail(job, TransferFault::IoRecall);
            purged += 1;
        }
        if purged > 0 {
            trace_at!(
                self.config.verbosity,
                Level::Debug,
                "bus{}: purged {} jobs of {}",
                self.bus_id,
                purged,
                device
            );
            self.pump();
        }
        purged
    }

    /// End the transaction on the wire with `fault`
    ///
    /// Returns `false` if the bus was idle.
    pub fn abort_current(&mut self, fault: TransferFault) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.driver.cancel();
        self.abort_active(fault);
        self.pump();
        true
    }

    /// Probe one address with an address-only command
    ///
    /// # Errors
    /// Returns `BusError::InvalidAddress` above 0x7F, or `BusError::QueueFull`
    pub fn ping(&mut self, addr: u8) -> Result<TxnId> {
        if addr > MAX_DEVICE_ADDR {
            return Err(BusError::InvalidAddress(addr));
        }
        let mut job = self.jobs.new_job();
        // Pool jobs are wiped, hence IDLE
        let _ = job.set_command(addr);
        let _ = job.set_callback_target(CallbackTarget::Adapter);
        job.insert_flags(TxnFlags::PING);
        self.queue_io_job(job)
    }

    /// Probe every address in `addrs`; returns how many probes were queued
    pub fn scan(&mut self, addrs: RangeInclusive<u8>) -> usize {
        let mut queued = 0;
        for addr in addrs {
            if self.ping(addr).is_err() {
                break;
            }
            queued += 1;
        }
        queued
    }

    pub fn ping_status(&self, addr: u8) -> PingStatus {
        self.ping_map
            .get(addr as usize)
            .copied()
            .unwrap_or(PingStatus::Unknown)
    }

    /// Addresses that answered a probe
    pub fn present(&self) -> impl Iterator<Item = u8> + '_ {
        self.ping_map
            .iter()
            .enumerate()
            .filter(|(_, status)| **status == PingStatus::Present)
            .map(|(addr, _)| addr as u8)
    }

    /// Drive the bus
    ///
    /// Drains interrupt notices, checks a pending phase with the driver,
    /// enforces the phase timeout, then begins queued transactions while the
    /// bus is free. Returns the number of callbacks delivered.
    pub fn poll(&mut self, now_ms: u64) -> usize {
        self.now_ms = self.now_ms.max(now_ms);

        while let Some(notice) = self.notifier.take() {
            self.on_notice(notice);
            self.advance();
        }

        if let Some(active) = self.current.as_mut().filter(|active| active.pending) {
            let outcome = self.driver.poll_phase(active.phase(self.last_addr));
            if outcome != PhaseOutcome::Pending {
                self.on_outcome(outcome);
            }
        }

        let timeout = self.config.phase_timeout_ms as u64;
        let expired = self.current.as_ref().is_some_and(|active| {
            active.pending && timeout > 0 && self.now_ms.saturating_sub(active.since_ms) > timeout
        });
        if expired {
            trace_at!(
                self.config.verbosity,
                Level::Warn,
                "bus{}: phase timed out after {} ms",
                self.bus_id,
                timeout
            );
            self.driver.cancel();
            self.abort_active(TransferFault::Timeout);
        }

        self.pump()
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            submitted: self.jobs.submitted,
            notice_overflows: self.notifier.overflows(),
            ..self.stats
        }
    }

    /// Run phases, deliver callbacks, begin the next transaction; repeat
    /// until the bus is waiting on hardware or out of work
    fn pump(&mut self) -> usize {
        let budget = self.config.max_jobs_per_poll;
        let mut delivered = 0;
        loop {
            self.advance();

            while delivered < budget {
                let Some(job) = self.finished.pop_front() else {
                    break;
                };
                self.deliver(job);
                delivered += 1;
            }

            if delivered >= budget || self.current.is_some() || self.jobs.is_empty() {
                return delivered;
            }
            self.begin_next();
        }
    }

    fn begin_next(&mut self) {
        let Some(job) = self.jobs.pop_front() else {
            return;
        };

        if let Some(CallbackTarget::Device(dev)) = job.callback_target() {
            let vetoed = match self.devices.get_mut(dev.index()).and_then(Option::as_mut) {
                Some(device) => device.io_op_callahead(&job).is_err(),
                None => true,
            };
            if vetoed {
                self.fail(job, TransferFault::IoRecall);
                return;
            }
        }

        if let Err(fault) = job.validate() {
            self.fail(job, fault);
            return;
        }

        if !self.online {
            self.fail(job, TransferFault::BusBusy);
            return;
        }

        let mut job = job;
        job.set_state(TransferState::Initiate);
        self.current = Some(InFlight {
            job,
            step: Step::Start,
            pending: false,
            since_ms: self.now_ms,
        });
    }

    /// Issue phases until one is pending or the transaction ends
    fn advance(&mut self) {
        while let Some(active) = self.current.as_mut() {
            if active.pending {
                return;
            }
            let outcome = self.driver.start_phase(active.phase(self.last_addr));
            self.on_outcome(outcome);
        }
    }

    fn on_outcome(&mut self, outcome: PhaseOutcome) {
        match outcome {
            PhaseOutcome::Complete => self.step_done(),
            PhaseOutcome::Pending => {
                if let Some(active) = self.current.as_mut() {
                    active.pending = true;
                    active.since_ms = self.now_ms;
                }
            }
            PhaseOutcome::Fault(fault) => {
                let at_start = self
                    .current
                    .as_ref()
                    .is_some_and(|active| active.step == Step::Start);
                // A START that cannot be generated means someone else holds the bus
                let fault = if at_start { TransferFault::BusBusy } else { fault };
                self.abort_active(fault);
            }
        }
    }

    fn on_notice(&mut self, notice: HwNotice) {
        let Some(active) = self.current.as_mut().filter(|active| active.pending) else {
            self.stats.stale_notices += 1;
            return;
        };
        match notice {
            HwNotice::Ready => {
                self.driver.finish_phase(active.phase(self.last_addr));
                self.step_done();
            }
            HwNotice::Fault(fault) => self.abort_active(fault),
        }
    }

    fn step_done(&mut self) {
        let explicit_stop = self.config.explicit_stop;
        let Some(active) = self.current.as_mut() else {
            return;
        };
        active.pending = false;

        match active.step {
            Step::Address => self.last_addr = Some(active.job.addr()),
            Step::SubAddress => active.job.insert_flags(TxnFlags::SUBADDR_SENT),
            _ => {}
        }

        match next_step(active.step, &active.job, explicit_stop) {
            Some((step, state)) => {
                active.step = step;
                active.job.set_state(state);
            }
            None => {
                if let Some(done) = self.current.take() {
                    let mut job = done.job;
                    job.set_state(TransferState::Complete);
                    self.finished.push_back(job);
                }
            }
        }
    }

    fn abort_active(&mut self, fault: TransferFault) {
        if let Some(active) = self.current.take() {
            self.fail(active.job, fault);
        }
    }

    fn fail(&mut self, mut job: BusTransaction, fault: TransferFault) {
        job.set_fault(fault);
        self.finished.push_back(job);
    }

    fn deliver(&mut self, mut job: BusTransaction) {
        match job.fault() {
            None => self.stats.completed += 1,
            Some(fault) => {
                self.stats.faulted += 1;
                self.stats.faults[fault.index()] += 1;
                if fault == TransferFault::IoRecall {
                    self.stats.recalled += 1;
                }
                trace_at!(
                    self.config.verbosity,
                    Level::Debug,
                    "bus{}: {:?} to {:#04x} faulted: {}",
                    self.bus_id,
                    job.id(),
                    job.addr(),
                    fault
                );
            }
        }

        let dev = match job.callback_target() {
            Some(CallbackTarget::Device(dev)) => dev,
            Some(CallbackTarget::Adapter) => {
                self.record_ping(&job);
                self.jobs.release(job);
                return;
            }
            None => {
                self.jobs.release(job);
                return;
            }
        };

        let Some(mut device) = self.devices.get_mut(dev.index()).and_then(Option::take) else {
            trace_at!(
                self.config.verbosity,
                Level::Warn,
                "bus{}: {:?} finished for detached {}",
                self.bus_id,
                job.id(),
                dev
            );
            self.jobs.release(job);
            return;
        };

        let disposition =
            device.io_op_callback(&mut job, &mut IoContext::new(dev, &mut self.jobs, self.now_ms));
        self.devices[dev.index()] = Some(device);

        match disposition {
            JobDisposition::Release => self.jobs.release(job),
            JobDisposition::Resubmit => self.resubmit(dev, job),
        }
    }

    fn resubmit(&mut self, dev: DeviceId, mut job: BusTransaction) {
        job.rearm();
        job.set_target_if_unset(CallbackTarget::Device(dev));
        if let Err((_, job)) = self.jobs.enqueue(job) {
            // No caller to hand an error to; the device hears about it instead
            self.fail(job, TransferFault::BusBusy);
        }
    }

    fn record_ping(&mut self, job: &BusTransaction) {
        if !job.flags().contains(TxnFlags::PING) {
            return;
        }
        let status = match job.fault() {
            None => PingStatus::Present,
            Some(TransferFault::DevNotFound) => PingStatus::Absent,
            Some(_) => PingStatus::Unknown,
        };
        if let Some(slot) = self.ping_map.get_mut(job.addr() as usize) {
            *slot = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BusOpcode;

    #[test]
    fn test_write_with_sub_address_steps() {
        let job = BusTransaction::write(0x20, &[1]).with_sub_address(&[0x10]);
        assert_eq!(
            next_step(Step::Start, &job, true),
            Some((Step::Address, TransferState::Addr))
        );
        assert_eq!(
            next_step(Step::Address, &job, true),
            Some((Step::SubAddress, TransferState::Addr))
        );
        assert_eq!(
            next_step(Step::SubAddress, &job, true),
            Some((Step::Payload, TransferState::TxWait))
        );
        assert_eq!(
            next_step(Step::Payload, &job, true),
            Some((Step::Stop, TransferState::Stop))
        );
        assert_eq!(next_step(Step::Stop, &job, true), None);
    }

    #[test]
    fn test_command_without_stop_completes_after_address() {
        let job = BusTransaction::command(0x20);
        assert_eq!(job.opcode(), Some(BusOpcode::WriteCommand));
        assert_eq!(next_step(Step::Address, &job, false), None);
    }

    #[test]
    fn test_read_goes_to_rx_wait() {
        let job = BusTransaction::read(0x20, 4);
        assert_eq!(
            next_step(Step::Address, &job, false),
            Some((Step::Payload, TransferState::RxWait))
        );
        assert_eq!(next_step(Step::Payload, &job, false), None);
    }
}
