//! Schedules - millisecond timers that re-raise an owned event
//!
//! Each schedule owns one event. On every firing the kernel queues a copy of
//! it (marked `MANAGED`) and, once dispatched, the copy comes back to the
//! schedule so that argument changes made by the handler carry over to the
//! next firing. Auto-clearing schedules instead restart from their original
//! arguments each time.
//!
//! ## Catch-up policy
//!
//! If the host loop stalls past several periods, a schedule fires at most
//! `max_sequential_skips` times in one tick; the rest of the lag is
//! discarded (counted in `KernelStats::coalesced_firings`) and the schedule
//! keeps its original phase.

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use log::{Level, LevelFilter};

use crate::event::Event;
use crate::kernel::KernelStats;
use crate::queue::EventQueue;
use crate::receiver::ReceiverId;
use crate::{KernelError, Result};

/// Handle to a registered schedule
///
/// Carries the slot's generation, so firings still queued for a removed
/// schedule never reach a schedule registered later in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId {
    index: u16,
    generation: u16,
}

impl ScheduleId {
    const fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u16,
            generation,
        }
    }

    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sched#{}.{}", self.index, self.generation)
    }
}

/// How many times a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Never self-disables
    Forever,
    /// Fires this many times, then disables. `Times(0)` is a one-shot.
    Times(u32),
}

impl Recurrence {
    fn firings(self) -> Option<u32> {
        match self {
            Recurrence::Forever => None,
            Recurrence::Times(n) => Some(n.max(1)),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScheduleFlags: u8 {
        const ENABLED = 1 << 0;
        /// Each firing starts from the original arguments
        const AUTO_CLEAR = 1 << 1;
    }
}

/// A timer registration
#[derive(Debug, Clone)]
pub struct Schedule {
    template: Event,
    current: Event,
    period_ms: u32,
    recurrence: Recurrence,
    remaining: Option<u32>,
    flags: ScheduleFlags,
    owner: Option<ReceiverId>,
    last_fired_ms: u64,
    next_due_ms: u64,
    fire_count: u32,
    seq: u32,
    pending_fires: u32,
    skipped: u32,
    removal_pending: bool,
}

impl Schedule {
    /// Create an enabled schedule
    pub fn new(event: Event, period_ms: u32, recurrence: Recurrence) -> Self {
        Self {
            template: event,
            current: event,
            period_ms,
            recurrence,
            remaining: recurrence.firings(),
            flags: ScheduleFlags::ENABLED,
            owner: None,
            last_fired_ms: 0,
            next_due_ms: 0,
            fire_count: 0,
            seq: 0,
            pending_fires: 0,
            skipped: 0,
            removal_pending: false,
        }
    }

    /// Fire `times` times, every `period_ms`
    pub fn repeating(event: Event, period_ms: u32, times: u32) -> Self {
        Self::new(event, period_ms, Recurrence::Times(times))
    }

    /// Fire every `period_ms` until disabled
    pub fn forever(event: Event, period_ms: u32) -> Self {
        Self::new(event, period_ms, Recurrence::Forever)
    }

    /// Fire once, `delay_ms` from registration
    pub fn oneshot(event: Event, delay_ms: u32) -> Self {
        Self::new(event, delay_ms, Recurrence::Times(1))
    }

    pub fn with_auto_clear(mut self, auto_clear: bool) -> Self {
        self.flags.set(ScheduleFlags::AUTO_CLEAR, auto_clear);
        self
    }

    /// Register without arming; call `enable_schedule` later
    pub fn disabled(mut self) -> Self {
        self.flags.remove(ScheduleFlags::ENABLED);
        self
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn recurrence(&self) -> Recurrence {
        self.recurrence
    }

    /// Firings left before self-disabling (`None` = forever)
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(ScheduleFlags::ENABLED)
    }

    pub fn auto_clears(&self) -> bool {
        self.flags.contains(ScheduleFlags::AUTO_CLEAR)
    }

    pub fn owner(&self) -> Option<ReceiverId> {
        self.owner
    }

    pub fn last_fired_ms(&self) -> u64 {
        self.last_fired_ms
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms
    }

    /// Total firings so far
    pub fn fire_count(&self) -> u32 {
        self.fire_count
    }

    /// The event the next firing will carry
    pub fn event(&self) -> &Event {
        &self.current
    }

    fn arm(&mut self, now_ms: u64) {
        self.last_fired_ms = now_ms;
        self.next_due_ms = now_ms + self.period_ms as u64;
        self.remaining = self.recurrence.firings();
        self.flags.insert(ScheduleFlags::ENABLED);
    }

    /// Number of firings that fell due by `now_ms`
    fn due_count(&self, now_ms: u64) -> u64 {
        if !self.is_enabled() || self.removal_pending || now_ms < self.next_due_ms {
            return 0;
        }
        1 + (now_ms - self.next_due_ms) / self.period_ms as u64
    }
}

/// Fixed-capacity schedule registry
pub(crate) struct ScheduleTable {
    slots: Vec<Option<Schedule>>,
    generations: Vec<u16>,
    next_seq: u32,
}

impl ScheduleTable {
    pub(crate) fn new(max: usize) -> Self {
        let mut slots = Vec::with_capacity(max);
        slots.resize_with(max, || None);
        Self {
            slots,
            generations: alloc::vec![0; max],
            next_seq: 0,
        }
    }

    fn id_at(&self, idx: usize) -> ScheduleId {
        ScheduleId::new(idx, self.generations[idx])
    }

    fn is_current(&self, id: ScheduleId) -> bool {
        self.generations.get(id.index()) == Some(&id.generation)
    }

    pub(crate) fn insert(
        &mut self,
        mut schedule: Schedule,
        owner: Option<ReceiverId>,
        now_ms: u64,
    ) -> Result<ScheduleId> {
        if schedule.period_ms == 0 {
            return Err(KernelError::InvalidPeriod);
        }

        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ScheduleTableFull {
                max: self.slots.len(),
            })?;
        let id = self.id_at(idx);

        let enabled = schedule.is_enabled();
        schedule.owner = owner;
        schedule.seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        schedule.template.set_originator_if_unset(owner);
        schedule.template.mark_managed(id);
        schedule.current = schedule.template;
        schedule.arm(now_ms);
        schedule.flags.set(ScheduleFlags::ENABLED, enabled);

        self.slots[idx] = Some(schedule);
        Ok(id)
    }

    pub(crate) fn get(&self, id: ScheduleId) -> Result<&Schedule> {
        let current = self.is_current(id);
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|s| current && !s.removal_pending)
            .ok_or(KernelError::UnknownSchedule(id))
    }

    fn get_mut(&mut self, id: ScheduleId) -> Result<&mut Schedule> {
        let current = self.is_current(id);
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|s| current && !s.removal_pending)
            .ok_or(KernelError::UnknownSchedule(id))
    }

    /// Stop the schedule now, free its slot at the next tick boundary
    pub(crate) fn mark_removed(&mut self, id: ScheduleId) -> Result<()> {
        let schedule = self.get_mut(id)?;
        schedule.flags.remove(ScheduleFlags::ENABLED);
        schedule.removal_pending = true;
        Ok(())
    }

    pub(crate) fn mark_removed_by_owner(&mut self, owner: ReceiverId) -> usize {
        let mut count = 0;
        for schedule in self.slots.iter_mut().flatten() {
            if schedule.owner == Some(owner) && !schedule.removal_pending {
                schedule.flags.remove(ScheduleFlags::ENABLED);
                schedule.removal_pending = true;
                count += 1;
            }
        }
        count
    }

    pub(crate) fn reap_removed(&mut self) {
        for (slot, generation) in self.slots.iter_mut().zip(self.generations.iter_mut()) {
            if slot.as_ref().is_some_and(|s| s.removal_pending) {
                *slot = None;
                *generation = generation.wrapping_add(1);
            }
        }
    }

    /// Re-arm: the next firing is one full period from `now_ms`
    pub(crate) fn enable(&mut self, id: ScheduleId, now_ms: u64) -> Result<()> {
        let schedule = self.get_mut(id)?;
        if schedule.period_ms == 0 {
            return Err(KernelError::InvalidPeriod);
        }
        schedule.arm(now_ms);
        Ok(())
    }

    pub(crate) fn disable(&mut self, id: ScheduleId) -> Result<()> {
        self.get_mut(id)?.flags.remove(ScheduleFlags::ENABLED);
        Ok(())
    }

    pub(crate) fn alter_period(&mut self, id: ScheduleId, period_ms: u32) -> Result<()> {
        if period_ms == 0 {
            return Err(KernelError::InvalidPeriod);
        }
        let schedule = self.get_mut(id)?;
        schedule.period_ms = period_ms;
        schedule.next_due_ms = schedule.last_fired_ms + period_ms as u64;
        Ok(())
    }

    pub(crate) fn alter_recurrence(
        &mut self,
        id: ScheduleId,
        recurrence: Recurrence,
    ) -> Result<()> {
        let schedule = self.get_mut(id)?;
        schedule.recurrence = recurrence;
        schedule.remaining = recurrence.firings();
        Ok(())
    }

    /// Queue one firing out of band; period and recurrence are untouched
    pub(crate) fn fire_now(
        &mut self,
        id: ScheduleId,
        queue: &mut EventQueue,
        stats: &mut KernelStats,
    ) -> Result<()> {
        let schedule = self.get_mut(id)?;
        queue.push(schedule.current)?;
        schedule.fire_count += 1;
        stats.schedule_firings += 1;
        Ok(())
    }

    /// Take a dispatched managed event back into its schedule
    pub(crate) fn write_back(&mut self, event: &Event) {
        let Some(id) = event.schedule() else {
            return;
        };
        if let Ok(schedule) = self.get_mut(id) {
            if schedule.auto_clears() {
                schedule.current = schedule.template;
            } else {
                schedule.current = *event;
            }
        }
    }

    /// Convert elapsed time into queued firings
    ///
    /// Firings from different schedules are interleaved by due time; equal
    /// due times go in registration order. Returns the number of events queued.
    pub(crate) fn tick(
        &mut self,
        now_ms: u64,
        max_sequential_skips: u32,
        queue: &mut EventQueue,
        stats: &mut KernelStats,
        verbosity: LevelFilter,
    ) -> usize {
        let cap = max_sequential_skips.max(1) as u64;

        for schedule in self.slots.iter_mut().flatten() {
            let due = schedule.due_count(now_ms);
            let allowed = match schedule.remaining {
                Some(left) => due.min(cap).min(left as u64),
                None => due.min(cap),
            };
            schedule.pending_fires = allowed as u32;
            // Lag past the cap is dropped; firings past the recurrence never existed
            schedule.skipped = if due > cap && allowed == cap {
                (due - cap) as u32
            } else {
                0
            };
        }

        let mut queued = 0;
        while let Some(idx) = self.next_pending() {
            let id = self.id_at(idx);
            let Some(schedule) = self.slots[idx].as_mut() else {
                break;
            };

            schedule.pending_fires -= 1;
            schedule.last_fired_ms = schedule.next_due_ms;
            schedule.next_due_ms += schedule.period_ms as u64;
            schedule.fire_count += 1;
            stats.schedule_firings += 1;

            match queue.push(schedule.current) {
                Ok(()) => queued += 1,
                Err(_) => {
                    stats.events_dropped += 1;
                    trace_at!(
                        verbosity,
                        Level::Warn,
                        "schedule {} firing dropped: event queue full",
                        id
                    );
                }
            }

            if let Some(left) = schedule.remaining.as_mut() {
                *left -= 1;
                if *left == 0 {
                    schedule.flags.remove(ScheduleFlags::ENABLED);
                    schedule.pending_fires = 0;
                    trace_at!(
                        verbosity,
                        Level::Debug,
                        "schedule {} exhausted after {} firings",
                        id,
                        schedule.fire_count
                    );
                }
            }
        }

        for schedule in self.slots.iter_mut().flatten() {
            if schedule.skipped > 0 {
                stats.coalesced_firings += schedule.skipped as u64;
                schedule.next_due_ms += schedule.skipped as u64 * schedule.period_ms as u64;
                schedule.skipped = 0;
            }
        }

        queued
    }

    /// Earliest due schedule with firings left this tick
    ///
    /// Ties go by registration order.
    fn next_pending(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
            .filter(|(_, s)| s.pending_fires > 0)
            .min_by_key(|(_, s)| (s.next_due_ms, s.seq))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::codes;

    fn table_with(schedule: Schedule) -> (ScheduleTable, ScheduleId) {
        let mut table = ScheduleTable::new(4);
        let id = table.insert(schedule, None, 0).unwrap();
        (table, id)
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut table = ScheduleTable::new(2);
        let result = table.insert(Schedule::forever(Event::new(codes::USER_BASE), 0), None, 0);
        assert!(matches!(result, Err(KernelError::InvalidPeriod)));
    }

    #[test]
    fn test_table_full() {
        let mut table = ScheduleTable::new(1);
        let event = Event::new(codes::USER_BASE);
        table.insert(Schedule::forever(event, 10), None, 0).unwrap();
        assert!(matches!(
            table.insert(Schedule::forever(event, 10), None, 0),
            Err(KernelError::ScheduleTableFull { max: 1 })
        ));
    }

    #[test]
    fn test_catch_up_is_capped() {
        let (mut table, id) = table_with(Schedule::forever(Event::new(codes::USER_BASE), 10));
        let mut queue = EventQueue::new(64);
        let mut stats = KernelStats::default();

        // 10 periods late, cap of 4
        let queued = table.tick(100, 4, &mut queue, &mut stats, LevelFilter::Off);
        assert_eq!(queued, 4);
        assert_eq!(stats.coalesced_firings, 6);

        // Phase is kept: next due is 110, not 140
        assert_eq!(table.get(id).unwrap().next_due_ms(), 110);
    }

    #[test]
    fn test_equal_due_times_fire_in_registration_order() {
        let mut table = ScheduleTable::new(4);
        let a = table
            .insert(Schedule::repeating(Event::new(codes::USER_BASE), 50, 2), None, 0)
            .unwrap();
        let b = table
            .insert(Schedule::repeating(Event::new(codes::USER_BASE + 1), 50, 2), None, 0)
            .unwrap();
        let mut queue = EventQueue::new(8);
        let mut stats = KernelStats::default();

        table.tick(100, 4, &mut queue, &mut stats, LevelFilter::Off);

        let order: Vec<_> = core::iter::from_fn(|| queue.pop())
            .map(|e| e.schedule().unwrap())
            .collect();
        assert_eq!(order, [a, b, a, b]);
    }

    #[test]
    fn test_removed_schedule_freed_on_reap() {
        let (mut table, id) = table_with(Schedule::forever(Event::new(codes::USER_BASE), 10));
        table.mark_removed(id).unwrap();
        assert!(table.get(id).is_err());

        let mut queue = EventQueue::new(4);
        let mut stats = KernelStats::default();
        assert_eq!(table.tick(50, 4, &mut queue, &mut stats, LevelFilter::Off), 0);

        table.reap_removed();
        let again = table
            .insert(Schedule::forever(Event::new(codes::USER_BASE), 10), None, 50)
            .unwrap();
        assert_eq!(again.index(), id.index());
        assert_ne!(again, id);
        assert!(table.get(id).is_err());
    }

    #[test]
    fn test_stale_firing_does_not_write_back_into_reused_slot() {
        let (mut table, old) = table_with(Schedule::forever(Event::new(codes::USER_BASE), 10));
        let mut queue = EventQueue::new(4);
        let mut stats = KernelStats::default();
        table.tick(10, 4, &mut queue, &mut stats, LevelFilter::Off);
        let stale = queue.pop().unwrap();
        assert_eq!(stale.schedule(), Some(old));

        table.mark_removed(old).unwrap();
        table.reap_removed();
        let new = table
            .insert(Schedule::forever(Event::new(codes::USER_BASE + 1), 10), None, 10)
            .unwrap();
        assert_eq!(new.index(), old.index());

        table.write_back(&stale);
        assert_eq!(table.get(new).unwrap().event().code(), codes::USER_BASE + 1);
    }
}
