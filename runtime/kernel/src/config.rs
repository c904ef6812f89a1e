//! Kernel configuration
//!
//! All capacities are fixed when the kernel is constructed; nothing in the
//! dispatch path grows a collection afterwards.

use log::LevelFilter;
use static_assertions::const_assert;

/// Default depth of the dispatch queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default depth of the cross-thread injection ring
pub const DEFAULT_INJECTOR_CAPACITY: usize = 32;

/// Default number of events dispatched per `proc_idle_flags` call
pub const DEFAULT_MAX_EVENTS_PER_CALL: usize = 32;

/// Default cap on catch-up firings per schedule per tick
pub const DEFAULT_MAX_SEQUENTIAL_SKIPS: u32 = 4;

/// Default receiver registry size
pub const DEFAULT_MAX_RECEIVERS: usize = 32;

/// Default schedule registry size
pub const DEFAULT_MAX_SCHEDULES: usize = 32;

const_assert!(DEFAULT_MAX_SEQUENTIAL_SKIPS >= 1);
const_assert!(DEFAULT_MAX_RECEIVERS <= u16::MAX as usize);
const_assert!(DEFAULT_MAX_SCHEDULES <= u16::MAX as usize);
const_assert!(DEFAULT_INJECTOR_CAPACITY <= DEFAULT_QUEUE_CAPACITY);

/// Kernel tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Events the dispatch queue can hold
    pub queue_capacity: usize,
    /// Events the cross-thread injector can hold
    pub injector_capacity: usize,
    /// Upper bound on events dispatched in one `proc_idle_flags` call
    pub max_events_per_call: usize,
    /// Upper bound on firings of one schedule in one tick when the host loop
    /// ran late; further missed periods are dropped
    pub max_sequential_skips: u32,
    /// Receiver registry size
    pub max_receivers: usize,
    /// Schedule registry size
    pub max_schedules: usize,
    /// Diagnostic verbosity of this kernel instance (off by default)
    pub verbosity: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            injector_capacity: DEFAULT_INJECTOR_CAPACITY,
            max_events_per_call: DEFAULT_MAX_EVENTS_PER_CALL,
            max_sequential_skips: DEFAULT_MAX_SEQUENTIAL_SKIPS,
            max_receivers: DEFAULT_MAX_RECEIVERS,
            max_schedules: DEFAULT_MAX_SCHEDULES,
            verbosity: LevelFilter::Off,
        }
    }
}

impl KernelConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_injector_capacity(mut self, capacity: usize) -> Self {
        self.injector_capacity = capacity;
        self
    }

    pub fn with_max_events_per_call(mut self, max: usize) -> Self {
        self.max_events_per_call = max;
        self
    }

    pub fn with_max_sequential_skips(mut self, max: u32) -> Self {
        self.max_sequential_skips = max;
        self
    }

    pub fn with_max_receivers(mut self, max: usize) -> Self {
        self.max_receivers = max;
        self
    }

    pub fn with_max_schedules(mut self, max: usize) -> Self {
        self.max_schedules = max;
        self
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Clamp every value into its legal range
    pub(crate) fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.injector_capacity = self.injector_capacity.max(1);
        self.max_events_per_call = self.max_events_per_call.max(1);
        self.max_sequential_skips = self.max_sequential_skips.max(1);
        self.max_receivers = self.max_receivers.clamp(1, u16::MAX as usize);
        self.max_schedules = self.max_schedules.clamp(1, u16::MAX as usize);
        self
    }
}
