//! Driving a bus adapter from the kernel
//!
//! [`BusService`] is a receiver that owns a [`BusAdapter`] and polls it on a
//! recurring schedule, and whenever a `BUS_POLL` event reaches it. The
//! application keeps a [`BusHandle`] to submit work between dispatches.

use alloc::rc::Rc;
use core::cell::{Ref, RefCell, RefMut};

use ember_bus::{BusAdapter, BusDriver};
use ember_kernel::{
    codes, Consumption, Context, Event, HandlerFault, Receiver, Schedule, ScheduleId,
};
use log::{Level, LevelFilter};

/// Shared access to an adapter owned by a [`BusService`]
///
/// Borrows must not be held across `Kernel::proc_idle_flags`; a service that
/// finds its adapter borrowed skips that poll with `HandlerFault::NotReady`.
pub struct BusHandle<D: BusDriver> {
    adapter: Rc<RefCell<BusAdapter<D>>>,
}

impl<D: BusDriver> Clone for BusHandle<D> {
    fn clone(&self) -> Self {
        Self {
            adapter: Rc::clone(&self.adapter),
        }
    }
}

impl<D: BusDriver> BusHandle<D> {
    pub fn borrow(&self) -> Ref<'_, BusAdapter<D>> {
        self.adapter.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, BusAdapter<D>> {
        self.adapter.borrow_mut()
    }

    /// Run `f` with the adapter borrowed mutably
    pub fn with<R>(&self, f: impl FnOnce(&mut BusAdapter<D>) -> R) -> R {
        f(&mut self.adapter.borrow_mut())
    }
}

/// Receiver that keeps a bus adapter moving
pub struct BusService<D: BusDriver> {
    adapter: Rc<RefCell<BusAdapter<D>>>,
    period_ms: u32,
    schedule: Option<ScheduleId>,
    polls: u64,
    verbosity: LevelFilter,
}

impl<D: BusDriver> BusService<D> {
    /// Wrap `adapter`, polling it every `period_ms` once attached
    ///
    /// A zero period disables the schedule; the adapter is then polled only
    /// by `BUS_POLL` events.
    pub fn new(adapter: BusAdapter<D>, period_ms: u32) -> (Self, BusHandle<D>) {
        let adapter = Rc::new(RefCell::new(adapter));
        let handle = BusHandle {
            adapter: Rc::clone(&adapter),
        };
        let service = Self {
            adapter,
            period_ms,
            schedule: None,
            polls: 0,
            verbosity: LevelFilter::Off,
        };
        (service, handle)
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn handle(&self) -> BusHandle<D> {
        BusHandle {
            adapter: Rc::clone(&self.adapter),
        }
    }

    /// The polling schedule, once attached
    pub fn schedule(&self) -> Option<ScheduleId> {
        self.schedule
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }
}

impl<D: BusDriver + 'static> Receiver for BusService<D> {
    fn name(&self) -> &'static str {
        "bus-service"
    }

    fn attached(&mut self, ctx: &mut Context<'_>) {
        if self.period_ms == 0 {
            return;
        }
        let Some(me) = ctx.receiver_id() else {
            return;
        };

        let tick = Event::new(codes::BUS_POLL).with_target(me);
        match ctx.add_schedule(Schedule::forever(tick, self.period_ms)) {
            Ok(id) => {
                trace_at!(
                    self.verbosity,
                    Level::Debug,
                    "bus-service: polling every {} ms ({})",
                    self.period_ms,
                    id
                );
                self.schedule = Some(id);
            }
            Err(err) => trace_at!(
                self.verbosity,
                Level::Warn,
                "bus-service: no polling schedule: {}",
                err
            ),
        }
    }

    fn notify(
        &mut self,
        event: &mut Event,
        ctx: &mut Context<'_>,
    ) -> Result<Consumption, HandlerFault> {
        if event.code() != codes::BUS_POLL {
            return Ok(Consumption::Passed);
        }

        let mut adapter = self
            .adapter
            .try_borrow_mut()
            .map_err(|_| HandlerFault::NotReady)?;
        adapter.poll(ctx.now_ms());
        self.polls += 1;
        Ok(Consumption::Consumed)
    }
}
