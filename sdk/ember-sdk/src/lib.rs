//! Ember SDK
//!
//! One dependency for applications: re-exports the runtime crates and adds
//! the pieces that connect them.
//!
//! # Modules
//! - [`kernel`]: event dispatch and schedules (re-export of `ember-kernel`)
//! - [`bus`]: bus transaction engine (re-export of `ember-bus`)
//! - [`pipe`]: buffer chains (re-export of `ember-pipe`)
//! - [`platform`]: time and log sink (re-export of `ember-platform`)
//! - [`BusService`]: a receiver that drives a bus adapter from the kernel
//! - [`EventingDevice`]: turns bus completions into `BUS_JOB_DONE` events
//! - [`PipeEventSink`]: turns transport data into `PIPE_DATA` events
//!
//! # Example
//! ```
//! use ember_sdk::prelude::*;
//! use ember_sdk::bus::mock::MockBus;
//!
//! let clock = ManualClock::new();
//! let mut kernel = Kernel::new(clock.clone(), KernelConfig::default());
//!
//! let adapter = BusAdapter::new(0, MockBus::new().with_device(0x48), AdapterConfig::default());
//! let (service, bus) = BusService::new(adapter, 5);
//! kernel.attach_subscribed(Box::new(service)).unwrap();
//!
//! bus.borrow_mut().ping(0x48).unwrap();
//!
//! clock.advance(5);
//! kernel.proc_idle_flags();
//! assert_eq!(bus.borrow().ping_status(0x48), PingStatus::Present);
//! ```

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

/// Log through `log` only if the component's verbosity allows it
macro_rules! trace_at {
    ($verbosity:expr, $level:expr, $($arg:tt)+) => {
        if ::ember_platform::verbosity_allows($verbosity, $level) {
            ::log::log!($level, $($arg)+);
        }
    };
}

mod bus_service;
mod eventing;
mod pipe_sink;

pub use ember_bus as bus;
pub use ember_kernel as kernel;
pub use ember_pipe as pipe;
pub use ember_platform as platform;

pub use bus_service::{BusHandle, BusService};
pub use eventing::{EventingDevice, JobDone};
pub use pipe_sink::{PipeEventSink, PipeInbox};

use thiserror::Error;

/// SDK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Any runtime error, for applications that handle them in one place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("kernel: {0}")]
    Kernel(#[from] ember_kernel::KernelError),

    #[error("bus: {0}")]
    Bus(#[from] ember_bus::BusError),

    #[error("pipe: {0}")]
    Pipe(#[from] ember_pipe::PipeError),
}

/// Result type for SDK operations
pub type Result<T> = core::result::Result<T, Error>;

/// Everything a typical application imports
pub mod prelude {
    pub use crate::{BusHandle, BusService, EventingDevice, JobDone, PipeEventSink, PipeInbox};

    pub use ember_kernel::{
        codes, Argument, Consumption, Context, Disposition, Event, EventCode, EventInjector,
        HandlerFault, Kernel, KernelConfig, Receiver, ReceiverId, Recurrence, Schedule,
        ScheduleId,
    };

    pub use ember_bus::{
        AdapterConfig, BusAdapter, BusDevice, BusDriver, BusNotifier, BusTransaction,
        CallbackTarget, DeviceId, IoContext, JobDisposition, PingStatus, RegisterMap,
        TransferFault, TransferState, TxnId,
    };

    pub use ember_pipe::segments::{Accumulator, BufferSink, ProtocolDetect, Relay, Signature};
    pub use ember_pipe::{Buffer, MemoryResponsibility, PipeSegment, Pipeline, SegmentId, Transfer};

    pub use ember_platform::{ManualClock, TimeSource};
}
