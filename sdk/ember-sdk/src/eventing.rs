//! Bus completions as kernel events
//!
//! [`EventingDevice`] wraps any [`BusDevice`]. After the wrapped device's
//! callback runs, it raises a `BUS_JOB_DONE` event through an
//! [`EventInjector`], so receivers learn about finished I/O the same way
//! they learn about everything else.
//!
//! Event arguments, in order:
//!
//! | # | Argument | Meaning                                         |
//! |---|----------|-------------------------------------------------|
//! | 0 | `U32`    | transaction id                                  |
//! | 1 | `Bool`   | completed without fault                         |
//! | 2 | `U8`     | fault index (`TransferFault::index`), or `0xFF` |
//! | 3 | `U8`     | device address                                  |
//! | 4 | `U16`    | bytes in the transaction buffer                 |

use ember_bus::{BusDevice, BusTransaction, IoContext, JobDisposition, TransferFault, Veto};
use ember_kernel::{codes, Argument, Event, EventInjector, ReceiverId};
use log::{Level, LevelFilter};

const NO_FAULT: u8 = 0xFF;

/// Decoded `BUS_JOB_DONE` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDone {
    pub txn: u32,
    pub fault: Option<TransferFault>,
    pub addr: u8,
    pub len: u16,
}

impl JobDone {
    fn capture(job: &BusTransaction) -> Self {
        Self {
            txn: job.id().map_or(0, |id| id.value()),
            fault: job.fault(),
            addr: job.addr(),
            len: job.len().min(u16::MAX as usize) as u16,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }

    pub fn to_event(&self) -> Event {
        let fault = self.fault.map_or(NO_FAULT, |f| f.index() as u8);
        Event::new(codes::BUS_JOB_DONE)
            .with_arg(Argument::U32(self.txn))
            .with_arg(Argument::Bool(self.is_ok()))
            .with_arg(Argument::U8(fault))
            .with_arg(Argument::U8(self.addr))
            .with_arg(Argument::U16(self.len))
    }

    /// Read back an event built by [`to_event`](Self::to_event)
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.code() != codes::BUS_JOB_DONE {
            return None;
        }
        let txn = match event.arg(0)? {
            Argument::U32(v) => *v,
            _ => return None,
        };
        let fault = match event.arg(2)? {
            Argument::U8(NO_FAULT) => None,
            Argument::U8(idx) => Some(*TransferFault::ALL.get(*idx as usize)?),
            _ => return None,
        };
        let addr = match event.arg(3)? {
            Argument::U8(v) => *v,
            _ => return None,
        };
        let len = match event.arg(4)? {
            Argument::U16(v) => *v,
            _ => return None,
        };
        Some(Self {
            txn,
            fault,
            addr,
            len,
        })
    }
}

/// A bus device that reports each completion to the kernel
pub struct EventingDevice<T: BusDevice> {
    inner: T,
    injector: EventInjector,
    target: Option<ReceiverId>,
    raised: u64,
    lost: u64,
    verbosity: LevelFilter,
}

impl<T: BusDevice> EventingDevice<T> {
    /// Broadcast completions of `inner` through `injector`
    pub fn new(inner: T, injector: EventInjector) -> Self {
        Self {
            inner,
            injector,
            target: None,
            raised: 0,
            lost: 0,
            verbosity: LevelFilter::Off,
        }
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Deliver completions to one receiver instead of broadcasting them
    pub fn with_target(mut self, target: ReceiverId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Completion events posted
    pub fn raised(&self) -> u64 {
        self.raised
    }

    /// Completion events the injector had no room for
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

impl<T: BusDevice> BusDevice for EventingDevice<T> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn io_op_callahead(&mut self, job: &BusTransaction) -> core::result::Result<(), Veto> {
        self.inner.io_op_callahead(job)
    }

    fn io_op_callback(
        &mut self,
        job: &mut BusTransaction,
        ctx: &mut IoContext<'_>,
    ) -> JobDisposition {
        // The wrapped device may wipe the job for reuse
        let done = JobDone::capture(job);
        let disposition = self.inner.io_op_callback(job, ctx);

        let mut event = done.to_event();
        if let Some(target) = self.target {
            event = event.with_target(target);
        }
        match self.injector.raise(event) {
            Ok(()) => self.raised += 1,
            Err(err) => {
                self.lost += 1;
                trace_at!(
                    self.verbosity,
                    Level::Warn,
                    "{}: completion of txn#{} not reported: {}",
                    self.name(),
                    done.txn,
                    err
                );
            }
        }
        disposition
    }
}
