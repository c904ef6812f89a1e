//! The segment capability
//!
//! A segment sees a buffer in one of two directions and answers with a
//! [`Flow`]: pass it on, finish the transfer here, or splice a new segment
//! into the chain and hand the buffer to it.
//!
//! "Near" is the transport side, "far" the application side:
//!
//! ```text
//!   application                                   transport
//!   [far] ──► to_counterparty ──► ... ──► [near]
//!   [far] ◄── from_counterparty ◄── ... ◄── [near]
//! ```

use alloc::boxed::Box;
use core::any::Any;
use core::fmt;

use crate::buffer::{Buffer, Transfer};

/// Which way a buffer is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Application toward transport
    ToCounterparty,
    /// Transport toward application
    FromCounterparty,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::ToCounterparty => Direction::FromCounterparty,
            Direction::FromCounterparty => Direction::ToCounterparty,
        }
    }
}

/// A segment's answer for one buffer
pub enum Flow<'a> {
    /// Relay to the next neighbour in the direction of travel
    Forward(Buffer<'a>),
    /// Stop here with this answer
    Done(Transfer<'a>),
    /// Insert `segment` next to this one, on the side the buffer is travelling
    /// toward, and deliver `buffer` to it
    Splice {
        segment: Box<dyn PipeSegment>,
        buffer: Buffer<'a>,
    },
}

impl fmt::Debug for Flow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Forward(buffer) => f.debug_tuple("Forward").field(buffer).finish(),
            Flow::Done(transfer) => f.debug_tuple("Done").field(transfer).finish(),
            Flow::Splice { segment, buffer } => f
                .debug_struct("Splice")
                .field("segment", &segment.name())
                .field("buffer", buffer)
                .finish(),
        }
    }
}

/// One stage of a pipe
///
/// A segment that answers [`Transfer::Bearer`] has taken the buffer and frees
/// it. A segment that answers [`Transfer::Retained`] or [`Transfer::Error`]
/// hands the buffer back and must not keep any reference to it; the borrow
/// checker enforces this for `Buffer::Caller` data.
pub trait PipeSegment: Any {
    fn name(&self) -> &'static str;

    /// Application data heading for the transport
    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a>;

    /// Transport data heading for the application
    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a>;

    /// The pipeline could not insert the segment this one asked to splice
    ///
    /// The transfer has already been answered with `Transfer::Error`; a
    /// segment that recorded the splice as done should forget it here.
    fn splice_failed(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn PipeSegment {
    /// Route to the handler for `direction`
    pub fn transfer<'a>(&mut self, direction: Direction, buffer: Buffer<'a>) -> Flow<'a> {
        match direction {
            Direction::ToCounterparty => self.to_counterparty(buffer),
            Direction::FromCounterparty => self.from_counterparty(buffer),
        }
    }
}
