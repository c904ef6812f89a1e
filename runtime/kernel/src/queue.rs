//! Event queues
//!
//! Two queues feed the dispatcher:
//! - [`EventQueue`]: the kernel-private, priority-ordered FIFO that
//!   `proc_idle_flags` drains. Only touched from the kernel's thread.
//! - [`EventInjector`]: a cloneable, lock-free handle for raising events from
//!   interrupt handlers or worker threads. Its contents are moved into the
//!   `EventQueue` at the start of every `proc_idle_flags` call.
//!
//! Both are bounded; capacity is fixed at construction and never grows.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam::queue::ArrayQueue;

use crate::event::Event;
use crate::{KernelError, Result};

/// Bounded priority FIFO
///
/// Higher-priority events are dequeued first; events of equal priority keep
/// insertion order.
pub(crate) struct EventQueue {
    events: VecDeque<Event>,
    capacity: usize,
    high_water: usize,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            high_water: 0,
        }
    }

    pub(crate) fn push(&mut self, event: Event) -> Result<()> {
        if self.events.len() >= self.capacity {
            return Err(KernelError::QueueFull {
                capacity: self.capacity,
            });
        }

        // Insert after the last event of equal or higher priority
        let pos = self
            .events
            .iter()
            .rposition(|queued| queued.priority() >= event.priority())
            .map_or(0, |i| i + 1);
        self.events.insert(pos, event);

        self.high_water = self.high_water.max(self.events.len());
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity - self.events.len()
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }
}

/// Cross-thread entry point for raising events
///
/// Safe to use from interrupt context: `raise` is a single lock-free push
/// and never blocks, allocates or dispatches.
#[derive(Clone)]
pub struct EventInjector {
    ring: Arc<ArrayQueue<Event>>,
    overflows: Arc<AtomicU64>,
}

impl EventInjector {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(ArrayQueue::new(capacity.max(1))),
            overflows: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Post an event for the next `proc_idle_flags` call
    ///
    /// # Errors
    /// Returns `KernelError::InjectorFull` when the ring is full; the event is
    /// dropped and the overflow counter incremented.
    pub fn raise(&self, event: Event) -> Result<()> {
        self.ring.push(event).map_err(|_| {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            KernelError::InjectorFull {
                capacity: self.ring.capacity(),
            }
        })
    }

    /// Events waiting to be moved into the kernel queue
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    /// Events dropped because the ring was full
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Move up to `limit` injected events into `queue`
    pub(crate) fn drain_into(&self, queue: &mut EventQueue, limit: usize) -> usize {
        let mut moved = 0;
        while moved < limit {
            let Some(event) = self.ring.pop() else {
                break;
            };
            // `limit` never exceeds the queue's free space
            if queue.push(event).is_err() {
                break;
            }
            moved += 1;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::codes;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = EventQueue::new(8);
        queue.push(Event::new(1)).unwrap();
        queue.push(Event::new(2).with_priority(5)).unwrap();
        queue.push(Event::new(3)).unwrap();
        queue.push(Event::new(4).with_priority(5)).unwrap();

        let order: Vec<_> = core::iter::from_fn(|| queue.pop()).map(|e| e.code()).collect();
        assert_eq!(order, [2, 4, 1, 3]);
    }

    #[test]
    fn test_queue_capacity_is_hard() {
        let mut queue = EventQueue::new(2);
        queue.push(Event::new(1)).unwrap();
        queue.push(Event::new(2)).unwrap();
        assert!(matches!(
            queue.push(Event::new(3)),
            Err(KernelError::QueueFull { capacity: 2 })
        ));
        assert_eq!(queue.high_water(), 2);
        assert_eq!(queue.free(), 0);
    }

    #[test]
    fn test_injector_from_other_threads() {
        let injector = EventInjector::new(64);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let injector = injector.clone();
                thread::spawn(move || {
                    for i in 0..8 {
                        injector.raise(Event::new(codes::USER_BASE + t * 8 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut queue = EventQueue::new(64);
        let room = queue.free();
        assert_eq!(injector.drain_into(&mut queue, room), 32);
        assert_eq!(queue.len(), 32);
    }

    #[test]
    fn test_injector_overflow_counted() {
        let injector = EventInjector::new(1);
        injector.raise(Event::new(1)).unwrap();
        assert!(injector.raise(Event::new(2)).is_err());
        assert_eq!(injector.overflows(), 1);
        assert_eq!(injector.pending(), 1);
    }
}
