//! Integration tests for event dispatch and schedule ticking
//!
//! These drive the kernel only through its public API, with a ManualClock
//! standing in for the platform tick.

use std::cell::RefCell;
use std::rc::Rc;

use ember_kernel::{
    codes, Argument, Consumption, Context, Disposition, Event, EventCode, HandlerFault, Kernel,
    KernelConfig, KernelError, Receiver, Recurrence, Schedule, ScheduleId,
};
use ember_platform::ManualClock;

type Journal = Rc<RefCell<Vec<(&'static str, EventCode)>>>;

/// Records every event it sees; optionally consumes or faults
struct Listener {
    name: &'static str,
    journal: Journal,
    consume: bool,
    fault_on: Option<EventCode>,
}

impl Listener {
    fn boxed(name: &'static str, journal: &Journal) -> Box<Self> {
        Box::new(Self {
            name,
            journal: journal.clone(),
            consume: false,
            fault_on: None,
        })
    }

    fn consuming(mut self: Box<Self>) -> Box<Self> {
        self.consume = true;
        self
    }

    fn faulting_on(mut self: Box<Self>, code: EventCode) -> Box<Self> {
        self.fault_on = Some(code);
        self
    }
}

impl Receiver for Listener {
    fn name(&self) -> &'static str {
        self.name
    }

    fn notify(
        &mut self,
        event: &mut Event,
        _ctx: &mut Context<'_>,
    ) -> Result<Consumption, HandlerFault> {
        self.journal.borrow_mut().push((self.name, event.code()));
        if self.fault_on == Some(event.code()) {
            return Err(HandlerFault::Code(event.code()));
        }
        Ok(if self.consume {
            Consumption::Consumed
        } else {
            Consumption::Passed
        })
    }
}

fn kernel() -> (Kernel<ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    (Kernel::new(clock.clone(), KernelConfig::default()), clock)
}

const PING: EventCode = codes::USER_BASE;
const PONG: EventCode = codes::USER_BASE + 1;

#[test]
fn test_targeted_event_reaches_only_its_target_once() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    let a = kernel.attach_subscribed(Listener::boxed("a", &journal)).unwrap();
    let b = kernel.attach_subscribed(Listener::boxed("b", &journal)).unwrap();
    let _c = kernel.attach_subscribed(Listener::boxed("c", &journal)).unwrap();

    kernel.raise_event(Event::new(PING).with_target(b)).unwrap();
    assert_eq!(kernel.proc_idle_flags(), 1);

    assert_eq!(*journal.borrow(), vec![("b", PING)]);
    assert_ne!(a, b);
}

#[test]
fn test_broadcast_in_registration_order_until_consumed() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("first", &journal)).unwrap();
    kernel
        .attach_subscribed(Listener::boxed("second", &journal).consuming())
        .unwrap();
    kernel.attach_subscribed(Listener::boxed("third", &journal)).unwrap();

    kernel.raise_event(Event::new(PING)).unwrap();
    kernel.proc_idle_flags();

    assert_eq!(*journal.borrow(), vec![("first", PING), ("second", PING)]);
}

#[test]
fn test_unsubscribed_receivers_are_skipped() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    let quiet = kernel.attach(Listener::boxed("quiet", &journal)).unwrap();
    kernel.attach_subscribed(Listener::boxed("loud", &journal)).unwrap();

    // Subscribing twice, then unsubscribing once, leaves it unsubscribed
    kernel.subscribe(quiet).unwrap();
    kernel.subscribe(quiet).unwrap();
    kernel.unsubscribe(quiet).unwrap();
    kernel.unsubscribe(quiet).unwrap();

    kernel.raise_event(Event::new(PING)).unwrap();
    kernel.raise_event(Event::new(PONG).with_target(quiet)).unwrap();
    assert_eq!(kernel.proc_idle_flags(), 2);

    assert_eq!(*journal.borrow(), vec![("loud", PING)]);
    assert_eq!(kernel.stats().events_dropped, 1);
}

#[test]
fn test_raise_event_never_dispatches_synchronously() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    kernel.raise_event(Event::new(PING)).unwrap();
    assert!(journal.borrow().is_empty());
    assert_eq!(kernel.pending_events(), 1);

    kernel.proc_idle_flags();
    assert_eq!(journal.borrow().len(), 1);
    assert_eq!(kernel.proc_idle_flags(), 0);
}

#[test]
fn test_faulting_receiver_does_not_stop_dispatch() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel
        .attach_subscribed(Listener::boxed("flaky", &journal).faulting_on(PING))
        .unwrap();
    kernel.attach_subscribed(Listener::boxed("steady", &journal)).unwrap();

    kernel.raise_event(Event::new(PING)).unwrap();
    kernel.raise_event(Event::new(PONG)).unwrap();
    assert_eq!(kernel.proc_idle_flags(), 2);

    assert_eq!(
        *journal.borrow(),
        vec![
            ("flaky", PING),
            ("steady", PING),
            ("flaky", PONG),
            ("steady", PONG)
        ]
    );
    assert_eq!(kernel.stats().handler_faults, 1);
}

#[test]
fn test_three_firings_from_one_late_tick_then_disabled() {
    let (mut kernel, clock) = kernel();
    let journal = Journal::default();
    let rx = kernel.attach_subscribed(Listener::boxed("timer", &journal)).unwrap();

    let id = kernel
        .add_schedule(Schedule::repeating(Event::new(PING).with_target(rx), 100, 3))
        .unwrap();

    clock.advance(350);
    assert_eq!(kernel.proc_idle_flags(), 3);
    assert_eq!(journal.borrow().len(), 3);

    let schedule = kernel.schedule(id).unwrap();
    assert!(!schedule.is_enabled());
    assert_eq!(schedule.fire_count(), 3);
    assert_eq!(schedule.remaining(), Some(0));

    clock.advance(1_000);
    assert_eq!(kernel.proc_idle_flags(), 0);
}

#[test]
fn test_recurrence_counts() {
    let (mut kernel, clock) = kernel();
    let journal = Journal::default();
    let rx = kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    let once = kernel
        .add_schedule(Schedule::new(Event::new(PING).with_target(rx), 10, Recurrence::Times(0)))
        .unwrap();
    let forever = kernel
        .add_schedule(Schedule::forever(Event::new(PONG).with_target(rx), 10))
        .unwrap();

    for _ in 0..20 {
        clock.advance(10);
        kernel.proc_idle_flags();
    }

    let pings = journal.borrow().iter().filter(|(_, c)| *c == PING).count();
    let pongs = journal.borrow().iter().filter(|(_, c)| *c == PONG).count();
    assert_eq!(pings, 1);
    assert_eq!(pongs, 20);
    assert!(!kernel.schedule(once).unwrap().is_enabled());
    assert!(kernel.schedule(forever).unwrap().is_enabled());
}

#[test]
fn test_missed_periods_are_coalesced() {
    let clock = ManualClock::new();
    let config = KernelConfig::default().with_max_sequential_skips(2);
    let mut kernel = Kernel::new(clock.clone(), config);
    let journal = Journal::default();
    let rx = kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();
    kernel
        .add_schedule(Schedule::forever(Event::new(PING).with_target(rx), 10))
        .unwrap();

    // Host loop stalled for ten periods
    clock.advance(100);
    assert_eq!(kernel.proc_idle_flags(), 2);
    assert_eq!(kernel.stats().coalesced_firings, 8);

    // Back on schedule: one firing per period again
    clock.advance(10);
    assert_eq!(kernel.proc_idle_flags(), 1);
}

/// Removes its own schedule from inside the schedule's callback
struct SelfCancelling {
    schedule: Option<ScheduleId>,
    fired: Rc<RefCell<u32>>,
}

impl Receiver for SelfCancelling {
    fn name(&self) -> &'static str {
        "self-cancelling"
    }

    fn attached(&mut self, ctx: &mut Context<'_>) {
        let me = ctx.receiver_id().unwrap();
        let event = Event::new(PING).with_target(me);
        self.schedule = Some(ctx.add_schedule(Schedule::forever(event, 10)).unwrap());
    }

    fn notify(
        &mut self,
        event: &mut Event,
        ctx: &mut Context<'_>,
    ) -> Result<Consumption, HandlerFault> {
        *self.fired.borrow_mut() += 1;
        let id = event.schedule().ok_or(HandlerFault::Malformed)?;
        assert_eq!(Some(id), self.schedule);
        if ctx.schedule(id).is_some() {
            ctx.remove_schedule(id).map_err(|_| HandlerFault::NotReady)?;
        }
        Ok(Consumption::Consumed)
    }
}

#[test]
fn test_schedule_removed_from_its_own_callback() {
    let (mut kernel, clock) = kernel();
    let fired = Rc::new(RefCell::new(0));
    let rx = kernel
        .attach_subscribed(Box::new(SelfCancelling {
            schedule: None,
            fired: fired.clone(),
        }))
        .unwrap();

    // Two firings fall due in the same tick; both were queued before removal
    clock.advance(20);
    assert_eq!(kernel.proc_idle_flags(), 2);
    assert_eq!(*fired.borrow(), 2);
    assert_eq!(kernel.stats().handler_faults, 0);

    clock.advance(100);
    assert_eq!(kernel.proc_idle_flags(), 0);
    assert!(kernel.detach(rx).is_ok());
}

/// Counts firings in the event's first argument
struct Counter {
    seen: Rc<RefCell<Vec<u64>>>,
}

impl Receiver for Counter {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn notify(
        &mut self,
        event: &mut Event,
        _ctx: &mut Context<'_>,
    ) -> Result<Consumption, HandlerFault> {
        let n = event
            .arg(0)
            .and_then(Argument::as_u64)
            .ok_or(HandlerFault::Malformed)?;
        self.seen.borrow_mut().push(n);
        event
            .set_arg(0, Argument::U64(n + 1))
            .map_err(|_| HandlerFault::Malformed)?;
        Ok(Consumption::Consumed)
    }
}

#[test]
fn test_managed_event_carries_arguments_unless_auto_clear() {
    let (mut kernel, clock) = kernel();
    let carried = Rc::new(RefCell::new(Vec::new()));
    let cleared = Rc::new(RefCell::new(Vec::new()));
    let a = kernel
        .attach_subscribed(Box::new(Counter {
            seen: carried.clone(),
        }))
        .unwrap();
    let b = kernel
        .attach_subscribed(Box::new(Counter {
            seen: cleared.clone(),
        }))
        .unwrap();

    let event = Event::new(PING).with_arg(Argument::U64(0));
    kernel
        .add_schedule(Schedule::forever(event.with_target(a), 10))
        .unwrap();
    kernel
        .add_schedule(Schedule::forever(event.with_target(b), 10).with_auto_clear(true))
        .unwrap();

    for _ in 0..3 {
        clock.advance(10);
        kernel.proc_idle_flags();
    }

    assert_eq!(*carried.borrow(), vec![0, 1, 2]);
    assert_eq!(*cleared.borrow(), vec![0, 0, 0]);
}

/// Originator that asks for its event to be recycled a fixed number of times
struct Recycler {
    left: u32,
}

impl Receiver for Recycler {
    fn name(&self) -> &'static str {
        "recycler"
    }

    fn notify(&mut self, _: &mut Event, _: &mut Context<'_>) -> Result<Consumption, HandlerFault> {
        Ok(Consumption::Passed)
    }

    fn callback_proc(&mut self, _event: &Event, _ctx: &mut Context<'_>) -> Disposition {
        if self.left == 0 {
            return Disposition::Drop;
        }
        self.left -= 1;
        Disposition::Recycle
    }
}

#[test]
fn test_originator_callback_can_recycle() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    let origin = kernel.attach(Box::new(Recycler { left: 2 })).unwrap();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    kernel
        .raise_event(Event::new(PING).with_originator(origin))
        .unwrap();

    let mut total = 0;
    while kernel.pending_events() > 0 {
        total += kernel.proc_idle_flags();
    }
    assert_eq!(total, 3);
    assert_eq!(journal.borrow().len(), 3);
}

#[test]
fn test_detach_releases_owned_schedules() {
    let (mut kernel, clock) = kernel();
    let fired = Rc::new(RefCell::new(0));
    let rx = kernel
        .attach_subscribed(Box::new(SelfCancelling {
            schedule: None,
            fired: fired.clone(),
        }))
        .unwrap();

    kernel.detach(rx).unwrap();
    clock.advance(50);
    assert_eq!(kernel.proc_idle_flags(), 0);
    assert_eq!(*fired.borrow(), 0);
    assert!(matches!(
        kernel.detach(rx),
        Err(KernelError::UnknownReceiver(_))
    ));
}

#[test]
fn test_batch_size_bounds_one_call() {
    let clock = ManualClock::new();
    let config = KernelConfig::default().with_max_events_per_call(4);
    let mut kernel = Kernel::new(clock, config);
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    for _ in 0..10 {
        kernel.raise_event(Event::new(PING)).unwrap();
    }

    assert_eq!(kernel.proc_idle_flags(), 4);
    assert_eq!(kernel.proc_idle_flags(), 4);
    assert_eq!(kernel.proc_idle_flags(), 2);
    assert_eq!(kernel.proc_idle_flags(), 0);
    assert_eq!(kernel.stats().events_processed, 10);
}

#[test]
fn test_injected_events_from_another_thread() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    let injector = kernel.injector();
    std::thread::spawn(move || {
        injector.raise(Event::new(PONG)).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(kernel.proc_idle_flags(), 1);
    assert_eq!(*journal.borrow(), vec![("rx", PONG)]);
}

#[test]
fn test_boot_broadcast_and_priority() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    kernel.raise_event(Event::new(PING)).unwrap();
    kernel.boot().unwrap();
    kernel
        .raise_event(Event::new(PONG).with_priority(9))
        .unwrap();
    kernel.proc_idle_flags();

    let codes_seen: Vec<_> = journal.borrow().iter().map(|(_, c)| *c).collect();
    assert_eq!(codes_seen, vec![PONG, PING, codes::BOOT_COMPLETED]);
}

#[test]
fn test_receiver_table_full() {
    let clock = ManualClock::new();
    let mut kernel = Kernel::new(clock, KernelConfig::default().with_max_receivers(1));
    let journal = Journal::default();
    kernel.attach(Listener::boxed("one", &journal)).unwrap();
    assert!(matches!(
        kernel.attach(Listener::boxed("two", &journal)),
        Err(KernelError::ReceiverTableFull { max: 1 })
    ));
}

#[test]
fn test_event_for_detached_receiver_skips_slot_successor() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    let a = kernel.attach_subscribed(Listener::boxed("a", &journal)).unwrap();
    kernel.raise_event(Event::new(PING).with_target(a)).unwrap();

    kernel.detach(a).unwrap();
    let b = kernel.attach_subscribed(Listener::boxed("b", &journal)).unwrap();
    assert_eq!(b.index(), a.index());
    assert_ne!(b, a);
    assert!(!kernel.is_subscribed(a));
    assert_eq!(kernel.receiver_name(a), None);

    assert_eq!(kernel.proc_idle_flags(), 1);
    assert!(journal.borrow().is_empty());
    assert_eq!(kernel.stats().events_dropped, 1);
}

#[test]
fn test_detached_originator_gets_no_callback() {
    let (mut kernel, _clock) = kernel();
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();
    let origin = kernel.attach(Box::new(Recycler { left: 5 })).unwrap();
    kernel
        .raise_event(Event::new(PING).with_originator(origin))
        .unwrap();

    kernel.detach(origin).unwrap();
    let successor = kernel.attach(Box::new(Recycler { left: 5 })).unwrap();
    assert_eq!(successor.index(), origin.index());

    // A recycle would keep the event coming back
    let mut total = 0;
    for _ in 0..4 {
        total += kernel.proc_idle_flags();
    }
    assert_eq!(total, 1);
    assert_eq!(*journal.borrow(), vec![("rx", PING)]);
}

#[test]
fn test_queued_firing_of_removed_schedule_leaves_slot_successor_alone() {
    let clock = ManualClock::new();
    let config = KernelConfig::default().with_max_events_per_call(1);
    let mut kernel = Kernel::new(clock.clone(), config);
    let journal = Journal::default();
    kernel.attach_subscribed(Listener::boxed("rx", &journal)).unwrap();

    const FILLER: EventCode = codes::USER_BASE + 2;
    for _ in 0..3 {
        kernel.raise_event(Event::new(FILLER)).unwrap();
    }
    let first = kernel
        .add_schedule(Schedule::forever(Event::new(PING), 10))
        .unwrap();

    // The firing queues behind the fillers
    clock.advance(10);
    assert_eq!(kernel.proc_idle_flags(), 1);
    kernel.remove_schedule(first).unwrap();
    assert_eq!(kernel.proc_idle_flags(), 1);

    let second = kernel
        .add_schedule(Schedule::forever(Event::new(PONG), 1_000))
        .unwrap();
    assert_eq!(second.index(), first.index());
    assert_ne!(second, first);

    while kernel.pending_events() > 0 {
        kernel.proc_idle_flags();
    }

    assert!(kernel.schedule(first).is_none());
    assert_eq!(kernel.schedule(second).unwrap().event().code(), PONG);
    assert_eq!(journal.borrow().last(), Some(&("rx", PING)));
}
