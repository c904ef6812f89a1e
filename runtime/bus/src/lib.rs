//! Ember Bus - asynchronous transaction engine for I2C/SPI-class buses
//!
//! # Purpose
//! Serializes access to one physical bus per [`BusAdapter`]: devices queue
//! [`BusTransaction`]s, the adapter runs them one at a time through a
//! platform [`BusDriver`], and each transaction ends in exactly one
//! completion callback on its [`BusDevice`].
//!
//! # Integration Points
//! - Depends on: `ember-platform` (verbosity gate)
//! - Provides to: peripheral drivers, `ember-sdk::BusService`
//! - Cross-thread entry: [`BusNotifier`] only (interrupt completion notices)
//!
//! # Architecture
//! - `state`: transfer states, fault taxonomy, opcodes
//! - `transaction`: the request value and its identifiers
//! - `driver`: hardware seam and the interrupt mailbox
//! - `device`: device capability trait and callback context
//! - `adapter`: FIFO, dispatch loop, pool, bus scan, timeouts
//! - `register`: register cache for register-oriented devices
//! - `mock`: simulated bus (feature `mock`)
//!
//! # Testing Strategy
//! - Unit tests: state progression, validation, pool and FIFO, register cache
//! - Integration tests (`tests/`): ordering, faults, recall, scan, timeouts
//!   against [`mock::MockBus`]

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

/// Log through `log` only if this adapter's verbosity allows it
macro_rules! trace_at {
    ($verbosity:expr, $level:expr, $($arg:tt)+) => {
        if ::ember_platform::verbosity_allows($verbosity, $level) {
            ::log::log!($level, $($arg)+);
        }
    };
}

mod adapter;
mod config;
mod device;
mod driver;
mod queue;
mod register;
mod state;
mod transaction;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adapter::{AdapterStats, BusAdapter, PingStatus};
pub use config::{
    AdapterConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_DEVICES, DEFAULT_MAX_JOBS_PER_POLL,
    DEFAULT_NOTICE_CAPACITY, DEFAULT_PHASE_TIMEOUT_MS, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_DEPTH,
};
pub use device::{BusDevice, IoContext, JobDisposition, Veto};
pub use driver::{BusDriver, BusNotifier, HwNotice, Phase, PhaseOutcome};
pub use register::{ByteOrder, RegisterMap, MAX_REGISTER_WIDTH};
pub use state::{BusOpcode, TransferFault, TransferState};
pub use transaction::{
    BusTransaction, CallbackTarget, DeviceId, TxnFlags, TxnId, MAX_DEVICE_ADDR, MAX_SUBADDR_LEN,
};

use thiserror::Error;

/// Submission and registration errors
///
/// Problems on the wire are not errors; they end the transaction with a
/// [`TransferFault`] delivered through its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Job queue full (depth: {depth})")]
    QueueFull { depth: usize },

    #[error("Device table full ({max} slots)")]
    DeviceTableFull { max: usize },

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Unknown job: {0}")]
    UnknownJob(TxnId),

    #[error("Job already on the wire: {0}")]
    JobInFlight(TxnId),

    #[error("Transaction has no callback target")]
    NoCallbackTarget,

    #[error("Transaction not idle (state: {0:?})")]
    NotIdle(TransferState),

    #[error("Invalid device address: {0:#04x}")]
    InvalidAddress(u8),

    #[error("Invalid register width: {0}")]
    InvalidWidth(u8),

    #[error("Unknown register: {0:#04x}")]
    UnknownRegister(u8),

    #[error("Register already defined: {0:#04x}")]
    DuplicateRegister(u8),

    #[error("Register is read-only: {0:#04x}")]
    ReadOnlyRegister(u8),
}

pub type Result<T> = core::result::Result<T, BusError>;
