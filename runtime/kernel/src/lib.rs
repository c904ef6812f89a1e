//! Ember Kernel - cooperative event dispatch and millisecond schedules
//!
//! # Purpose
//! Owns the event queue, the schedule list and the registry of receivers.
//! The host loop drives everything through one entry point,
//! [`Kernel::proc_idle_flags`]; handlers never preempt each other.
//!
//! # Integration Points
//! - Depends on: `ember-platform` (time source, verbosity gate)
//! - Provides to: drivers, bus services, protocol handlers
//! - Cross-thread entry: [`EventInjector`] only
//!
//! # Architecture
//! - Events are fixed-size values ([`Event`]) with inline arguments
//! - Receivers are trait objects held in a fixed-size registry ([`Receiver`])
//! - Schedules own a template event that is copied on every firing ([`Schedule`])
//!
//! # Example
//! ```
//! use ember_kernel::{codes, Consumption, Context, Event, HandlerFault, Kernel, KernelConfig,
//!                    Receiver, Schedule};
//! use ember_platform::ManualClock;
//!
//! struct Blinker;
//!
//! impl Receiver for Blinker {
//!     fn name(&self) -> &'static str { "blinker" }
//!
//!     fn attached(&mut self, ctx: &mut Context<'_>) {
//!         let me = ctx.receiver_id().unwrap();
//!         let tick = Event::new(codes::USER_BASE).with_target(me);
//!         ctx.add_schedule(Schedule::forever(tick, 500)).unwrap();
//!     }
//!
//!     fn notify(&mut self, _event: &mut Event, _ctx: &mut Context<'_>)
//!         -> Result<Consumption, HandlerFault> {
//!         Ok(Consumption::Consumed)
//!     }
//! }
//!
//! let clock = ManualClock::new();
//! let mut kernel = Kernel::new(clock.clone(), KernelConfig::default());
//! kernel.attach_subscribed(Box::new(Blinker)).unwrap();
//!
//! clock.advance(500);
//! assert_eq!(kernel.proc_idle_flags(), 1);
//! ```
//!
//! # Testing Strategy
//! - Unit tests: queue ordering, schedule arithmetic, argument storage
//! - Integration tests (`tests/`): dispatch semantics, recurrence, faults

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

/// Log through `log` only if this instance's verbosity allows it
macro_rules! trace_at {
    ($verbosity:expr, $level:expr, $($arg:tt)+) => {
        if ::ember_platform::verbosity_allows($verbosity, $level) {
            ::log::log!($level, $($arg)+);
        }
    };
}

mod config;
mod event;
mod kernel;
mod queue;
mod receiver;
mod schedule;

pub use config::{
    KernelConfig, DEFAULT_INJECTOR_CAPACITY, DEFAULT_MAX_EVENTS_PER_CALL,
    DEFAULT_MAX_RECEIVERS, DEFAULT_MAX_SCHEDULES, DEFAULT_MAX_SEQUENTIAL_SKIPS,
    DEFAULT_QUEUE_CAPACITY,
};
pub use event::{
    codes, Argument, Event, EventCode, EventFlags, Priority, DEFAULT_PRIORITY, MAX_EVENT_ARGS,
};
pub use kernel::{Context, Kernel, KernelStats};
pub use queue::EventInjector;
pub use receiver::{Consumption, Disposition, HandlerFault, Receiver, ReceiverId};
pub use schedule::{Recurrence, Schedule, ScheduleFlags, ScheduleId};

use thiserror::Error;

/// Kernel registration and queueing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("Event queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Event injector full (capacity: {capacity})")]
    InjectorFull { capacity: usize },

    #[error("Receiver table full ({max} slots)")]
    ReceiverTableFull { max: usize },

    #[error("Schedule table full ({max} slots)")]
    ScheduleTableFull { max: usize },

    #[error("Unknown receiver: {0}")]
    UnknownReceiver(ReceiverId),

    #[error("Unknown schedule: {0}")]
    UnknownSchedule(ScheduleId),

    #[error("Schedule period must be non-zero")]
    InvalidPeriod,

    #[error("Event argument list full ({max} arguments)")]
    ArgumentsFull { max: usize },
}

pub type Result<T> = core::result::Result<T, KernelError>;
