//! Receivers - anything the kernel can deliver events to
//!
//! A receiver is a capability, not a base class: drivers, protocol handlers
//! and bus services implement [`Receiver`] and are handed to the kernel with
//! `Kernel::attach`. Everything a receiver may do back to the kernel while it
//! runs goes through the [`Context`](crate::Context) it is given.

use core::fmt;
use thiserror::Error;

use crate::event::Event;
use crate::kernel::Context;

/// Handle to an attached receiver
///
/// Slots are reused after a detach; the generation tells a stale handle
/// apart from the receiver that took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId {
    index: u16,
    generation: u16,
}

impl ReceiverId {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u16,
            generation,
        }
    }

    /// Slot index inside the kernel's registry
    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rx#{}.{}", self.index, self.generation)
    }
}

/// Outcome of a successful `notify`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// The receiver handled the event; broadcasts stop here
    Consumed,
    /// The receiver looked at it and passed; broadcasts continue
    Passed,
}

/// A receiver failed while handling an event
///
/// The kernel logs the fault, counts it and carries on with the next
/// receiver and the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandlerFault {
    #[error("event arguments malformed")]
    Malformed,

    #[error("receiver not ready")]
    NotReady,

    #[error("receiver fault code {0}")]
    Code(u16),
}

/// What the kernel does with an event after its originator's completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Discard the kernel's copy
    #[default]
    Drop,
    /// Queue the same event again
    Recycle,
}

/// A component that handles events
pub trait Receiver {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Called once from `Kernel::attach`; the place to register schedules
    fn attached(&mut self, _ctx: &mut Context<'_>) {}

    /// Handle one event
    ///
    /// The event is mutable so a schedule's handler can carry state between
    /// firings in its arguments (unless the schedule auto-clears them).
    fn notify(
        &mut self,
        event: &mut Event,
        ctx: &mut Context<'_>,
    ) -> Result<Consumption, HandlerFault>;

    /// Completion callback, run on the event's originator after delivery
    fn callback_proc(&mut self, _event: &Event, _ctx: &mut Context<'_>) -> Disposition {
        Disposition::Drop
    }
}
