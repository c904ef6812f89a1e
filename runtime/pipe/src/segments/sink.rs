//! Terminal endpoint

use alloc::vec::Vec;
use core::any::Any;

use crate::buffer::{Buffer, Transfer};
use crate::segment::{Flow, PipeSegment};

/// End of a chain that keeps whatever reaches it
///
/// Owned buffers are stored as they arrive, without copying. Borrowed data
/// is copied and handed back to its owner. With a limit set, deliveries past
/// it are refused with the buffer returned.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    deliveries: Vec<Vec<u8>>,
    limit: Option<usize>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse deliveries once `limit` are being held
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn deliveries(&self) -> &[Vec<u8>] {
        &self.deliveries
    }

    pub fn take(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.deliveries)
    }

    fn keep<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        if self.limit.is_some_and(|limit| self.deliveries.len() >= limit) {
            return Flow::Done(Transfer::Retained(buffer));
        }
        match buffer {
            Buffer::Bearer(data) => {
                self.deliveries.push(data);
                Flow::Done(Transfer::Bearer)
            }
            borrowed => {
                self.deliveries.push(borrowed.as_slice().to_vec());
                Flow::Done(Transfer::Retained(borrowed))
            }
        }
    }
}

impl PipeSegment for BufferSink {
    fn name(&self) -> &'static str {
        "buffer-sink"
    }

    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        self.keep(buffer)
    }

    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        self.keep(buffer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
