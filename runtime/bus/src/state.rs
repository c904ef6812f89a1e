//! Transfer state machine
//!
//! ```text
//!  IDLE ──queue──► QUEUED ──begin──► INITIATE ──start──► ADDR ──┬──► TX_WAIT ──┐
//!    ▲                │                  │                │    └──► RX_WAIT ──┤
//!    │              recall             START             NAK                  ▼
//!    │                ▼                 fails             ▼                 STOP
//!    └──── wipe ──── FAULT ◄────────────┴─────────────────┘                   │
//!    └──── wipe ─────────────────────────────────────────────── COMPLETE ◄────┘
//! ```
//!
//! Only the adapter's dispatch loop moves a transaction between states.

use thiserror::Error;

/// Lifecycle of one bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferState {
    /// Fresh or wiped; parameters may be changed
    #[default]
    Idle,
    /// Waiting in an adapter FIFO
    Queued,
    /// START condition being generated
    Initiate,
    /// Device address (and sub-address) phase
    Addr,
    /// Payload going out
    TxWait,
    /// Payload coming in
    RxWait,
    /// STOP condition being generated
    Stop,
    /// Finished successfully
    Complete,
    /// Finished abnormally; see the transaction's fault
    Fault,
}

impl TransferState {
    /// COMPLETE or FAULT
    pub const fn is_terminal(self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Fault)
    }

    /// Between `begin` and completion
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            TransferState::Initiate
                | TransferState::Addr
                | TransferState::TxWait
                | TransferState::RxWait
                | TransferState::Stop
        )
    }
}

/// Why a transaction ended in FAULT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TransferFault {
    #[error("device not found (address NAK)")]
    DevNotFound,

    #[error("bus busy")]
    BusBusy,

    #[error("phase timed out")]
    Timeout,

    #[error("bad transaction parameters")]
    BadParam,

    #[error("transaction recalled")]
    IoRecall,

    #[error("illegal state transition")]
    IllegalState,

    #[error("unspecified fault")]
    NoReason,
}

impl TransferFault {
    pub const ALL: [TransferFault; 7] = [
        TransferFault::DevNotFound,
        TransferFault::BusBusy,
        TransferFault::Timeout,
        TransferFault::BadParam,
        TransferFault::IoRecall,
        TransferFault::IllegalState,
        TransferFault::NoReason,
    ];

    /// Dense index, used for per-fault counters
    pub const fn index(self) -> usize {
        match self {
            TransferFault::DevNotFound => 0,
            TransferFault::BusBusy => 1,
            TransferFault::Timeout => 2,
            TransferFault::BadParam => 3,
            TransferFault::IoRecall => 4,
            TransferFault::IllegalState => 5,
            TransferFault::NoReason => 6,
        }
    }
}

/// What a transaction does on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusOpcode {
    /// Address, optional sub-address, then read `len` bytes
    Read,
    /// Address, optional sub-address, then write `len` bytes
    Write,
    /// Address and optional sub-address only; no payload
    WriteCommand,
}

impl BusOpcode {
    /// Read and Write move a payload and need a non-empty buffer
    pub const fn has_payload(self) -> bool {
        !matches!(self, BusOpcode::WriteCommand)
    }
}
