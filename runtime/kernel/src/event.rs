//! Events - typed messages routed through the kernel
//!
//! An [`Event`] is a fixed-size value: its arguments live inline, so raising,
//! queueing and recycling events never touches the heap. Schedules keep one
//! template event each and the kernel copies it on every firing.

use bitflags::bitflags;
use core::fmt;
use static_assertions::const_assert;

use crate::receiver::ReceiverId;
use crate::schedule::ScheduleId;
use crate::{KernelError, Result};

/// Numeric event type
pub type EventCode = u16;

/// Maximum number of arguments carried by one event
pub const MAX_EVENT_ARGS: usize = 6;

const_assert!(MAX_EVENT_ARGS <= u8::MAX as usize);

/// Reserved event codes
///
/// Codes below [`USER_BASE`](codes::USER_BASE) belong to the runtime.
pub mod codes {
    use super::EventCode;

    /// No-op / unset
    pub const NONE: EventCode = 0x0000;
    /// Broadcast once by `Kernel::boot` after all receivers are attached
    pub const BOOT_COMPLETED: EventCode = 0x0001;
    /// Request for receivers to quiesce
    pub const SYS_SHUTDOWN: EventCode = 0x0002;
    /// A bus transaction finished (args: adapter, device, txn id, fault code)
    pub const BUS_JOB_DONE: EventCode = 0x0010;
    /// Ask a bus service to run its dispatch loop
    pub const BUS_POLL: EventCode = 0x0011;
    /// Data arrived from a pipe transport (args: segment, byte count)
    pub const PIPE_DATA: EventCode = 0x0020;
    /// First code available to applications
    pub const USER_BASE: EventCode = 0x0100;
}

/// Dispatch priority; higher values are dequeued first
pub type Priority = u8;

/// Default priority for events that do not ask for one
pub const DEFAULT_PRIORITY: Priority = 0;

bitflags! {
    /// Event attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u8 {
        /// The event belongs to a schedule; the kernel returns it there after dispatch
        const MANAGED = 1 << 0;
    }
}

/// One typed event argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    F32(f32),
    Str(&'static str),
    Receiver(ReceiverId),
}

impl Argument {
    /// Widen any unsigned integer argument
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Argument::U8(v) => Some(v as u64),
            Argument::U16(v) => Some(v as u64),
            Argument::U32(v) => Some(v as u64),
            Argument::U64(v) => Some(v),
            Argument::Bool(v) => Some(v as u64),
            _ => None,
        }
    }

    /// Widen any signed integer argument
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Argument::I32(v) => Some(v as i64),
            Argument::I64(v) => Some(v),
            _ => self.as_u64().and_then(|v| i64::try_from(v).ok()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Argument::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match *self {
            Argument::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A typed message with arguments, an originator and an optional target
#[derive(Clone, Copy, PartialEq)]
pub struct Event {
    code: EventCode,
    args: [Option<Argument>; MAX_EVENT_ARGS],
    arg_count: u8,
    originator: Option<ReceiverId>,
    target: Option<ReceiverId>,
    priority: Priority,
    flags: EventFlags,
    schedule: Option<ScheduleId>,
}

impl Event {
    /// Create a broadcast event with no arguments
    pub const fn new(code: EventCode) -> Self {
        Self {
            code,
            args: [None; MAX_EVENT_ARGS],
            arg_count: 0,
            originator: None,
            target: None,
            priority: DEFAULT_PRIORITY,
            flags: EventFlags::empty(),
            schedule: None,
        }
    }

    /// Append an argument (builder form)
    ///
    /// Arguments past [`MAX_EVENT_ARGS`] are dropped; use [`push_arg`](Self::push_arg)
    /// where overflow must be detected.
    pub fn with_arg(mut self, arg: Argument) -> Self {
        let _ = self.push_arg(arg);
        self
    }

    /// Address the event to one receiver only
    pub fn with_target(mut self, target: ReceiverId) -> Self {
        self.target = Some(target);
        self
    }

    /// Record which receiver owns the event (its completion callback runs after dispatch)
    pub fn with_originator(mut self, originator: ReceiverId) -> Self {
        self.originator = Some(originator);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Append an argument
    ///
    /// # Errors
    /// Returns `KernelError::ArgumentsFull` when all slots are in use
    pub fn push_arg(&mut self, arg: Argument) -> Result<()> {
        let idx = self.arg_count as usize;
        if idx >= MAX_EVENT_ARGS {
            return Err(KernelError::ArgumentsFull {
                max: MAX_EVENT_ARGS,
            });
        }
        self.args[idx] = Some(arg);
        self.arg_count += 1;
        Ok(())
    }

    /// Replace an existing argument in place
    ///
    /// # Errors
    /// Returns `KernelError::ArgumentsFull` if `idx` is not an existing slot
    pub fn set_arg(&mut self, idx: usize, arg: Argument) -> Result<()> {
        if idx >= self.arg_count as usize {
            return Err(KernelError::ArgumentsFull {
                max: self.arg_count as usize,
            });
        }
        self.args[idx] = Some(arg);
        Ok(())
    }

    /// Wipe all arguments
    pub fn clear_args(&mut self) {
        self.args = [None; MAX_EVENT_ARGS];
        self.arg_count = 0;
    }

    pub fn code(&self) -> EventCode {
        self.code
    }

    pub fn arg(&self, idx: usize) -> Option<&Argument> {
        self.args.get(idx).and_then(|a| a.as_ref())
    }

    pub fn args(&self) -> impl Iterator<Item = &Argument> + '_ {
        self.args[..self.arg_count as usize].iter().flatten()
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count as usize
    }

    pub fn originator(&self) -> Option<ReceiverId> {
        self.originator
    }

    pub fn target(&self) -> Option<ReceiverId> {
        self.target
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// True if this is a schedule's event and must go back to it after dispatch
    pub fn is_managed(&self) -> bool {
        self.flags.contains(EventFlags::MANAGED)
    }

    /// The schedule that fired this event, if any
    pub fn schedule(&self) -> Option<ScheduleId> {
        self.schedule
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    pub(crate) fn set_originator_if_unset(&mut self, originator: Option<ReceiverId>) {
        if self.originator.is_none() {
            self.originator = originator;
        }
    }

    pub(crate) fn mark_managed(&mut self, schedule: ScheduleId) {
        self.flags.insert(EventFlags::MANAGED);
        self.schedule = Some(schedule);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("code", &format_args!("{:#06x}", self.code))
            .field("args", &DebugArgs(self))
            .field("originator", &self.originator)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .finish()
    }
}

struct DebugArgs<'a>(&'a Event);

impl fmt::Debug for DebugArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.args()).finish()
    }
}
