//! Adapter configuration

use log::LevelFilter;
use static_assertions::const_assert;

/// Default FIFO depth per adapter
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Default number of pooled transactions
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default buffer capacity of pooled transactions
pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

/// Default time a phase may stay pending before it faults with TIMEOUT
pub const DEFAULT_PHASE_TIMEOUT_MS: u32 = 50;

/// Default device table size
pub const DEFAULT_MAX_DEVICES: usize = 8;

/// Default bound on completions delivered per `poll`
pub const DEFAULT_MAX_JOBS_PER_POLL: usize = 32;

/// Default depth of the interrupt notice mailbox
pub const DEFAULT_NOTICE_CAPACITY: usize = 8;

const_assert!(DEFAULT_QUEUE_DEPTH >= 1);
const_assert!(DEFAULT_POOL_SIZE <= DEFAULT_QUEUE_DEPTH);
const_assert!(DEFAULT_MAX_DEVICES <= u16::MAX as usize);
const_assert!(DEFAULT_MAX_JOBS_PER_POLL >= DEFAULT_QUEUE_DEPTH);

/// Adapter tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Transactions the FIFO can hold (the in-flight one not included)
    pub queue_depth: usize,
    /// Wiped transactions kept for reuse
    pub pool_size: usize,
    /// Buffer capacity of each pooled transaction
    pub buffer_capacity: usize,
    /// Longest a phase may stay pending; 0 disables the timeout
    pub phase_timeout_ms: u32,
    /// Generate an explicit STOP phase after the payload
    pub explicit_stop: bool,
    /// Device table size
    pub max_devices: usize,
    /// Upper bound on transactions finished in one `poll`
    pub max_jobs_per_poll: usize,
    /// Interrupt notice mailbox depth
    pub notice_capacity: usize,
    /// Diagnostic verbosity of this adapter (off by default)
    pub verbosity: LevelFilter,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            pool_size: DEFAULT_POOL_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            phase_timeout_ms: DEFAULT_PHASE_TIMEOUT_MS,
            explicit_stop: true,
            max_devices: DEFAULT_MAX_DEVICES,
            max_jobs_per_poll: DEFAULT_MAX_JOBS_PER_POLL,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            verbosity: LevelFilter::Off,
        }
    }
}

impl AdapterConfig {
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_phase_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.phase_timeout_ms = timeout_ms;
        self
    }

    pub fn with_explicit_stop(mut self, explicit_stop: bool) -> Self {
        self.explicit_stop = explicit_stop;
        self
    }

    pub fn with_max_devices(mut self, max: usize) -> Self {
        self.max_devices = max;
        self
    }

    pub fn with_max_jobs_per_poll(mut self, max: usize) -> Self {
        self.max_jobs_per_poll = max;
        self
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.queue_depth = self.queue_depth.max(1);
        self.max_devices = self.max_devices.clamp(1, u16::MAX as usize);
        self.max_jobs_per_poll = self.max_jobs_per_poll.max(1);
        self.notice_capacity = self.notice_capacity.max(1);
        self
    }
}
