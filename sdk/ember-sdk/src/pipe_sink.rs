//! Transport data as kernel events
//!
//! [`PipeEventSink`] is the application end of a pipe. Data coming up from
//! the transport is parked in a [`PipeInbox`] and announced with a
//! `PIPE_DATA` event carrying its length (`U32`). The receiver that handles
//! the event pops the data from its inbox handle.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use crossbeam::queue::ArrayQueue;
use ember_kernel::{codes, Argument, Event, EventInjector, ReceiverId};
use ember_pipe::{Buffer, Flow, PipeSegment, Transfer};
use log::{Level, LevelFilter};

/// Consumer side of a [`PipeEventSink`]; cheap to clone and `Send`
#[derive(Clone)]
pub struct PipeInbox {
    queue: Arc<ArrayQueue<Vec<u8>>>,
}

impl PipeInbox {
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Terminal segment that turns transport data into `PIPE_DATA` events
pub struct PipeEventSink {
    queue: Arc<ArrayQueue<Vec<u8>>>,
    injector: EventInjector,
    target: Option<ReceiverId>,
    delivered: u64,
    unannounced: u64,
    verbosity: LevelFilter,
}

impl PipeEventSink {
    /// A sink holding at most `capacity` undelivered buffers
    pub fn new(injector: EventInjector, capacity: usize) -> (Self, PipeInbox) {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let inbox = PipeInbox {
            queue: Arc::clone(&queue),
        };
        let sink = Self {
            queue,
            injector,
            target: None,
            delivered: 0,
            unannounced: 0,
            verbosity: LevelFilter::Off,
        };
        (sink, inbox)
    }

    /// Announce data to one receiver instead of broadcasting
    pub fn with_target(mut self, target: ReceiverId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Buffers handed to the inbox
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Buffers parked without an event because the injector was full
    pub fn unannounced(&self) -> u64 {
        self.unannounced
    }

    fn announce(&mut self, len: usize) {
        let mut event =
            Event::new(codes::PIPE_DATA).with_arg(Argument::U32(len.min(u32::MAX as usize) as u32));
        if let Some(target) = self.target {
            event = event.with_target(target);
        }
        if let Err(err) = self.injector.raise(event) {
            self.unannounced += 1;
            trace_at!(
                self.verbosity,
                Level::Warn,
                "pipe-event-sink: {} bytes parked unannounced: {}",
                len,
                err
            );
        }
    }
}

impl PipeSegment for PipeEventSink {
    fn name(&self) -> &'static str {
        "pipe-event-sink"
    }

    /// Application data passes toward the transport untouched
    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        Flow::Forward(buffer)
    }

    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        if self.queue.is_full() {
            return Flow::Done(Transfer::Retained(buffer));
        }

        let len = buffer.len();
        let answer = match buffer {
            Buffer::Bearer(data) => match self.queue.push(data) {
                Ok(()) => Transfer::Bearer,
                Err(data) => return Flow::Done(Transfer::Retained(Buffer::Bearer(data))),
            },
            // Borrowed data is copied; the caller keeps its memory
            borrowed => {
                if self.queue.push(borrowed.as_slice().to_vec()).is_err() {
                    return Flow::Done(Transfer::Retained(borrowed));
                }
                Transfer::Retained(borrowed)
            }
        };

        self.delivered += 1;
        self.announce(len);
        Flow::Done(answer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
