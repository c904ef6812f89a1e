//! Log capture
//!
//! An [`Accumulator`] swallows application data instead of passing it to the
//! transport, up to a fixed capacity. Data from the transport passes through.

use alloc::vec::Vec;
use core::any::Any;

use crate::buffer::{Buffer, Transfer};
use crate::segment::{Flow, PipeSegment};

#[derive(Debug, Clone)]
pub struct Accumulator {
    captured: Vec<u8>,
    capacity: usize,
    refused: u64,
}

impl Accumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            captured: Vec::with_capacity(capacity),
            capacity,
            refused: 0,
        }
    }

    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    /// Bytes that still fit
    pub fn room(&self) -> usize {
        self.capacity - self.captured.len()
    }

    /// Buffers handed back because they did not fit
    pub fn refused(&self) -> u64 {
        self.refused
    }

    /// Drain everything captured so far
    pub fn take(&mut self) -> Vec<u8> {
        core::mem::replace(&mut self.captured, Vec::with_capacity(self.capacity))
    }
}

impl PipeSegment for Accumulator {
    fn name(&self) -> &'static str {
        "accumulator"
    }

    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        if buffer.len() > self.room() {
            self.refused += 1;
            return Flow::Done(Transfer::Retained(buffer));
        }

        self.captured.extend_from_slice(buffer.as_slice());
        match buffer {
            // Owned data was consumed; dropping it here frees it
            Buffer::Bearer(_) => Flow::Done(Transfer::Bearer),
            // Borrowed data was copied; the caller keeps its memory
            borrowed => Flow::Done(Transfer::Retained(borrowed)),
        }
    }

    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        Flow::Forward(buffer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
