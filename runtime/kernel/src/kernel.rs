//! The kernel - event queue, schedule list and receiver registry
//!
//! # Dispatch cycle
//!
//! The host loop calls [`Kernel::proc_idle_flags`] repeatedly. Each call:
//! 1. reads the time source and moves injected events into the queue
//! 2. frees schedules removed since the last call, then converts elapsed
//!    time into schedule firings
//! 3. dispatches up to `max_events_per_call` queued events
//! 4. returns how many events it dispatched (0 means the host may sleep)
//!
//! While a receiver runs it is taken out of the registry, so the
//! [`Context`] it receives can hand out `&mut` access to the queue and the
//! schedules without aliasing the receiver itself.

use alloc::boxed::Box;
use alloc::vec::Vec;
use ember_platform::TimeSource;
use log::Level;

use crate::config::KernelConfig;
use crate::event::{codes, Event};
use crate::queue::{EventInjector, EventQueue};
use crate::receiver::{Consumption, Disposition, Receiver, ReceiverId};
use crate::schedule::{Recurrence, Schedule, ScheduleId, ScheduleTable};
use crate::{KernelError, Result};

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Events taken off the queue and dispatched
    pub events_processed: u64,
    /// Events discarded: unsubscribed target, or no room to queue them
    pub events_dropped: u64,
    /// `notify` calls that returned a fault
    pub handler_faults: u64,
    /// Schedule firings (including ones whose event was dropped)
    pub schedule_firings: u64,
    /// Missed periods discarded by the catch-up cap
    pub coalesced_firings: u64,
    /// Events refused by a full injector
    pub injector_overflows: u64,
    /// Deepest the dispatch queue has been
    pub queue_high_water: usize,
}

struct Registration {
    id: ReceiverId,
    name: &'static str,
    subscribed: bool,
}

/// Everything a running receiver may touch through its [`Context`]
pub(crate) struct KernelCore {
    config: KernelConfig,
    queue: EventQueue,
    injector: EventInjector,
    schedules: ScheduleTable,
    registry: Vec<Option<Registration>>,
    generations: Vec<u16>,
    attach_order: Vec<ReceiverId>,
    pending_detach: Vec<ReceiverId>,
    now_ms: u64,
    stats: KernelStats,
}

impl KernelCore {
    fn registration(&self, id: ReceiverId) -> Result<&Registration> {
        self.registry
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|r| r.id == id)
            .ok_or(KernelError::UnknownReceiver(id))
    }

    fn set_subscribed(&mut self, id: ReceiverId, subscribed: bool) -> Result<()> {
        let registration = self
            .registry
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|r| r.id == id)
            .ok_or(KernelError::UnknownReceiver(id))?;
        registration.subscribed = subscribed;
        Ok(())
    }

    fn is_subscribed(&self, id: ReceiverId) -> bool {
        self.registration(id).is_ok_and(|r| r.subscribed)
    }

    fn raise(&mut self, event: Event) -> Result<()> {
        self.queue.push(event).inspect_err(|_| {
            self.stats.events_dropped += 1;
        })
    }
}

/// A receiver's view of the kernel while it runs
pub struct Context<'k> {
    core: &'k mut KernelCore,
    current: Option<ReceiverId>,
}

impl<'k> Context<'k> {
    fn new(core: &'k mut KernelCore, current: Option<ReceiverId>) -> Self {
        Self { core, current }
    }

    /// Kernel time at the start of this `proc_idle_flags` call
    pub fn now_ms(&self) -> u64 {
        self.core.now_ms
    }

    /// The receiver currently being called
    pub fn receiver_id(&self) -> Option<ReceiverId> {
        self.current
    }

    /// Queue an event; the calling receiver becomes its originator if none is set
    ///
    /// # Errors
    /// Returns `KernelError::QueueFull` if the dispatch queue is full
    pub fn raise_event(&mut self, mut event: Event) -> Result<()> {
        event.set_originator_if_unset(self.current);
        self.core.raise(event)
    }

    /// Register a schedule owned by the calling receiver
    pub fn add_schedule(&mut self, schedule: Schedule) -> Result<ScheduleId> {
        let now = self.core.now_ms;
        self.core.schedules.insert(schedule, self.current, now)
    }

    /// Remove a schedule; takes effect at the next tick boundary
    pub fn remove_schedule(&mut self, id: ScheduleId) -> Result<()> {
        self.core.schedules.mark_removed(id)
    }

    pub fn enable_schedule(&mut self, id: ScheduleId) -> Result<()> {
        let now = self.core.now_ms;
        self.core.schedules.enable(id, now)
    }

    pub fn disable_schedule(&mut self, id: ScheduleId) -> Result<()> {
        self.core.schedules.disable(id)
    }

    pub fn fire_schedule_now(&mut self, id: ScheduleId) -> Result<()> {
        let core = &mut *self.core;
        core.schedules.fire_now(id, &mut core.queue, &mut core.stats)
    }

    pub fn alter_period(&mut self, id: ScheduleId, period_ms: u32) -> Result<()> {
        self.core.schedules.alter_period(id, period_ms)
    }

    pub fn alter_recurrence(&mut self, id: ScheduleId, recurrence: Recurrence) -> Result<()> {
        self.core.schedules.alter_recurrence(id, recurrence)
    }

    pub fn schedule(&self, id: ScheduleId) -> Option<&Schedule> {
        self.core.schedules.get(id).ok()
    }

    /// Add a receiver to broadcast delivery (idempotent)
    pub fn subscribe(&mut self, id: ReceiverId) -> Result<()> {
        self.core.set_subscribed(id, true)
    }

    /// Remove a receiver from broadcast delivery (idempotent)
    pub fn unsubscribe(&mut self, id: ReceiverId) -> Result<()> {
        self.core.set_subscribed(id, false)
    }

    /// Detach a receiver once the current event has been dispatched
    ///
    /// Its schedules stop immediately and are freed at the next tick boundary.
    pub fn detach(&mut self, id: ReceiverId) -> Result<()> {
        self.core.registration(id)?;
        self.core.set_subscribed(id, false)?;
        self.core.schedules.mark_removed_by_owner(id);
        if !self.core.pending_detach.contains(&id) {
            self.core.pending_detach.push(id);
        }
        Ok(())
    }

    /// Handle for raising events from other threads or interrupt context
    pub fn injector(&self) -> EventInjector {
        self.core.injector.clone()
    }
}

/// The event-dispatch kernel
///
/// Explicitly constructed and explicitly passed; several kernels may coexist
/// (one per core, one per test).
pub struct Kernel<T: TimeSource> {
    clock: T,
    core: KernelCore,
    receivers: Vec<Option<Box<dyn Receiver>>>,
}

impl<T: TimeSource> Kernel<T> {
    /// Create a kernel reading time from `clock`
    pub fn new(clock: T, config: KernelConfig) -> Self {
        let config = config.normalized();
        let now_ms = clock.now_ms();

        let mut registry = Vec::with_capacity(config.max_receivers);
        registry.resize_with(config.max_receivers, || None);
        let mut receivers = Vec::with_capacity(config.max_receivers);
        receivers.resize_with(config.max_receivers, || None);

        Self {
            clock,
            core: KernelCore {
                queue: EventQueue::new(config.queue_capacity),
                injector: EventInjector::new(config.injector_capacity),
                schedules: ScheduleTable::new(config.max_schedules),
                registry,
                generations: alloc::vec![0; config.max_receivers],
                attach_order: Vec::with_capacity(config.max_receivers),
                pending_detach: Vec::with_capacity(config.max_receivers),
                now_ms,
                stats: KernelStats::default(),
                config,
            },
            receivers,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.core.config
    }

    /// Kernel time as of the last `proc_idle_flags` call
    pub fn now_ms(&self) -> u64 {
        self.core.now_ms
    }

    /// Register a receiver and run its `attached` hook
    ///
    /// The receiver is not subscribed to broadcasts until [`subscribe`](Self::subscribe)
    /// is called; targeted events still need a subscription to be delivered.
    ///
    /// # Errors
    /// Returns `KernelError::ReceiverTableFull` if every slot is taken
    pub fn attach(&mut self, mut receiver: Box<dyn Receiver>) -> Result<ReceiverId> {
        let idx = self
            .core
            .registry
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ReceiverTableFull {
                max: self.core.registry.len(),
            })?;
        let id = ReceiverId::new(idx, self.core.generations[idx]);

        self.core.registry[idx] = Some(Registration {
            id,
            name: receiver.name(),
            subscribed: false,
        });
        self.core.attach_order.push(id);

        trace_at!(
            self.core.config.verbosity,
            Level::Debug,
            "attached {} as {}",
            receiver.name(),
            id
        );

        receiver.attached(&mut Context::new(&mut self.core, Some(id)));
        self.receivers[idx] = Some(receiver);
        Ok(id)
    }

    /// Attach and subscribe in one step
    pub fn attach_subscribed(&mut self, receiver: Box<dyn Receiver>) -> Result<ReceiverId> {
        let id = self.attach(receiver)?;
        self.subscribe(id)?;
        Ok(id)
    }

    /// Tear down a receiver: unsubscribe it, remove its schedules, hand it back
    pub fn detach(&mut self, id: ReceiverId) -> Result<Box<dyn Receiver>> {
        self.core.registration(id)?;
        let receiver = self
            .receivers
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(KernelError::UnknownReceiver(id))?;

        self.core.registry[id.index()] = None;
        self.core.generations[id.index()] = id.generation().wrapping_add(1);
        self.core.attach_order.retain(|r| *r != id);
        self.core.pending_detach.retain(|r| *r != id);
        let schedules = self.core.schedules.mark_removed_by_owner(id);

        trace_at!(
            self.core.config.verbosity,
            Level::Debug,
            "detached {} ({}), {} schedules released",
            receiver.name(),
            id,
            schedules
        );
        Ok(receiver)
    }

    /// Add a receiver to broadcast delivery (idempotent)
    pub fn subscribe(&mut self, id: ReceiverId) -> Result<()> {
        self.core.set_subscribed(id, true)
    }

    /// Remove a receiver from broadcast delivery (idempotent)
    pub fn unsubscribe(&mut self, id: ReceiverId) -> Result<()> {
        self.core.set_subscribed(id, false)
    }

    pub fn is_subscribed(&self, id: ReceiverId) -> bool {
        self.core.is_subscribed(id)
    }

    /// Name a receiver was attached under
    pub fn receiver_name(&self, id: ReceiverId) -> Option<&'static str> {
        self.core.registration(id).ok().map(|r| r.name)
    }

    /// Number of attached receivers
    pub fn receiver_count(&self) -> usize {
        self.core.attach_order.len()
    }

    /// Queue an event for a later `proc_idle_flags` call
    ///
    /// Never dispatches from the caller's stack frame.
    ///
    /// # Errors
    /// Returns `KernelError::QueueFull` if the dispatch queue is full
    pub fn raise_event(&mut self, event: Event) -> Result<()> {
        self.core.raise(event)
    }

    /// Handle for raising events from other threads or interrupt context
    pub fn injector(&self) -> EventInjector {
        self.core.injector.clone()
    }

    /// Broadcast `BOOT_COMPLETED`
    pub fn boot(&mut self) -> Result<()> {
        self.raise_event(Event::new(codes::BOOT_COMPLETED))
    }

    /// Register a schedule not owned by any receiver
    pub fn add_schedule(&mut self, schedule: Schedule) -> Result<ScheduleId> {
        let now = self.core.now_ms;
        self.core.schedules.insert(schedule, None, now)
    }

    /// Remove a schedule; takes effect at the next tick boundary
    pub fn remove_schedule(&mut self, id: ScheduleId) -> Result<()> {
        self.core.schedules.mark_removed(id)
    }

    pub fn enable_schedule(&mut self, id: ScheduleId) -> Result<()> {
        let now = self.core.now_ms;
        self.core.schedules.enable(id, now)
    }

    pub fn disable_schedule(&mut self, id: ScheduleId) -> Result<()> {
        self.core.schedules.disable(id)
    }

    pub fn fire_schedule_now(&mut self, id: ScheduleId) -> Result<()> {
        Context::new(&mut self.core, None).fire_schedule_now(id)
    }

    pub fn alter_period(&mut self, id: ScheduleId, period_ms: u32) -> Result<()> {
        self.core.schedules.alter_period(id, period_ms)
    }

    pub fn alter_recurrence(&mut self, id: ScheduleId, recurrence: Recurrence) -> Result<()> {
        self.core.schedules.alter_recurrence(id, recurrence)
    }

    pub fn schedule(&self, id: ScheduleId) -> Option<&Schedule> {
        self.core.schedules.get(id).ok()
    }

    /// Events queued or waiting in the injector
    pub fn pending_events(&self) -> usize {
        self.core.queue.len() + self.core.injector.pending()
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            injector_overflows: self.core.injector.overflows(),
            queue_high_water: self.core.queue.high_water(),
            ..self.core.stats
        }
    }

    /// Run one idle-processing pass
    ///
    /// Returns the number of events dispatched; 0 means there was nothing to
    /// do and the host may sleep until the next tick or interrupt.
    pub fn proc_idle_flags(&mut self) -> usize {
        let now = self.clock.now_ms().max(self.core.now_ms);
        self.core.now_ms = now;

        let room = self.core.queue.free();
        self.core.injector.drain_into(&mut self.core.queue, room);

        self.core.schedules.reap_removed();
        {
            let core = &mut self.core;
            core.schedules.tick(
                now,
                core.config.max_sequential_skips,
                &mut core.queue,
                &mut core.stats,
                core.config.verbosity,
            );
        }

        let mut processed = 0;
        while processed < self.core.config.max_events_per_call {
            let Some(event) = self.core.queue.pop() else {
                break;
            };
            self.dispatch(event);
            self.apply_pending_detach();
            processed += 1;
        }

        self.core.stats.events_processed += processed as u64;
        processed
    }

    fn dispatch(&mut self, mut event: Event) {
        match event.target() {
            Some(target) => {
                if !self.core.is_subscribed(target) {
                    self.core.stats.events_dropped += 1;
                    trace_at!(
                        self.core.config.verbosity,
                        Level::Warn,
                        "dropping event {:#06x}: target {} is not subscribed",
                        event.code(),
                        target
                    );
                    if event.is_managed() {
                        self.core.schedules.write_back(&event);
                    }
                    return;
                }
                self.deliver(target, &mut event);
            }
            None => {
                let mut idx = 0;
                while idx < self.core.attach_order.len() {
                    let id = self.core.attach_order[idx];
                    idx += 1;
                    if !self.core.is_subscribed(id) {
                        continue;
                    }
                    if self.deliver(id, &mut event) == Some(Consumption::Consumed) {
                        break;
                    }
                }
            }
        }

        let disposition = match event.originator() {
            Some(origin) => self.complete(origin, &event),
            None => Disposition::Drop,
        };

        if event.is_managed() {
            self.core.schedules.write_back(&event);
        }

        if disposition == Disposition::Recycle && self.core.raise(event).is_err() {
            trace_at!(
                self.core.config.verbosity,
                Level::Warn,
                "recycled event {:#06x} dropped: queue full",
                event.code()
            );
        }
    }

    /// Run one receiver's `notify`; faults are logged and counted, never propagated
    fn deliver(&mut self, id: ReceiverId, event: &mut Event) -> Option<Consumption> {
        self.core.registration(id).ok()?;
        let mut receiver = self.receivers.get_mut(id.index()).and_then(Option::take)?;

        let result = receiver.notify(event, &mut Context::new(&mut self.core, Some(id)));
        let name = receiver.name();
        self.receivers[id.index()] = Some(receiver);

        match result {
            Ok(consumption) => Some(consumption),
            Err(fault) => {
                self.core.stats.handler_faults += 1;
                trace_at!(
                    self.core.config.verbosity,
                    Level::Warn,
                    "{} ({}) faulted on event {:#06x}: {}",
                    name,
                    id,
                    event.code(),
                    fault
                );
                None
            }
        }
    }

    fn complete(&mut self, origin: ReceiverId, event: &Event) -> Disposition {
        // An originator detached since raising gets no callback
        if self.core.registration(origin).is_err() {
            return Disposition::Drop;
        }
        let Some(mut receiver) = self.receivers.get_mut(origin.index()).and_then(Option::take)
        else {
            return Disposition::Drop;
        };

        let mut ctx = Context::new(&mut self.core, Some(origin));
        let disposition = receiver.callback_proc(event, &mut ctx);
        self.receivers[origin.index()] = Some(receiver);
        disposition
    }

    fn apply_pending_detach(&mut self) {
        while let Some(id) = self.core.pending_detach.pop() {
            // Dropping the returned receiver is the teardown
            let _ = self.detach(id);
        }
    }
}
