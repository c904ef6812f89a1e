//! Segment arena and transfer walk
//!
//! Segments live in fixed slots and point at each other by [`SegmentId`].
//! A transfer enters at one segment and walks neighbour links until some
//! segment answers, the chain ends, or the hop bound is hit.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use log::Level;

use crate::buffer::{Buffer, Transfer};
use crate::config::PipelineConfig;
use crate::segment::{Direction, Flow, PipeSegment};
use crate::{PipeError, Result};

/// Handle to a segment in a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u16);

impl SegmentId {
    const fn from_index(index: usize) -> Self {
        Self(index as u16)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// Transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    /// Transfers entered through the pipeline
    pub transfers: u64,
    /// Transfers answered BEARER
    pub taken: u64,
    /// Transfers answered CALLER or CREATOR
    pub returned: u64,
    /// Transfers answered ERROR
    pub rejected: u64,
    /// Segments spliced in by other segments
    pub splices: u64,
    /// Transfers cut off by the hop bound
    pub hop_limit_hits: u64,
}

struct Node {
    segment: Box<dyn PipeSegment>,
    near: Option<SegmentId>,
    far: Option<SegmentId>,
}

impl Node {
    fn link(&self, direction: Direction) -> Option<SegmentId> {
        match direction {
            Direction::ToCounterparty => self.near,
            Direction::FromCounterparty => self.far,
        }
    }

    fn link_mut(&mut self, direction: Direction) -> &mut Option<SegmentId> {
        match direction {
            Direction::ToCounterparty => &mut self.near,
            Direction::FromCounterparty => &mut self.far,
        }
    }
}

/// Arena of linked pipe segments
pub struct Pipeline {
    config: PipelineConfig,
    nodes: Vec<Option<Node>>,
    stats: PipeStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let config = config.normalized();
        let nodes = (0..config.max_segments).map(|_| None).collect();
        Self {
            config,
            nodes,
            stats: PipeStats::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipeStats {
        self.stats
    }

    /// Segments currently in the arena
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put an unlinked segment into the arena
    pub fn add(&mut self, segment: Box<dyn PipeSegment>) -> Result<SegmentId> {
        let idx = self
            .nodes
            .iter()
            .position(Option::is_none)
            .ok_or(PipeError::PipelineFull {
                max: self.nodes.len(),
            })?;
        let id = SegmentId::from_index(idx);

        trace_at!(
            self.config.verbosity,
            Level::Debug,
            "added {} as {}",
            segment.name(),
            id
        );

        self.nodes[idx] = Some(Node {
            segment,
            near: None,
            far: None,
        });
        Ok(id)
    }

    /// Unlink a segment from both neighbours and hand it back
    pub fn remove(&mut self, id: SegmentId) -> Result<Box<dyn PipeSegment>> {
        let node = self
            .nodes
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(PipeError::UnknownSegment(id))?;

        if let Some(near) = node.near {
            if let Some(n) = self.node_mut(near) {
                n.far = None;
            }
        }
        if let Some(far) = node.far {
            if let Some(n) = self.node_mut(far) {
                n.near = None;
            }
        }

        trace_at!(
            self.config.verbosity,
            Level::Debug,
            "removed {} ({})",
            node.segment.name(),
            id
        );
        Ok(node.segment)
    }

    /// Link `far` (application side) to `near` (transport side)
    pub fn attach(&mut self, far: SegmentId, near: SegmentId) -> Result<()> {
        if far == near {
            return Err(PipeError::SelfLink(far));
        }
        let far_node = self.node(far).ok_or(PipeError::UnknownSegment(far))?;
        let near_node = self.node(near).ok_or(PipeError::UnknownSegment(near))?;
        if far_node.near.is_some() {
            return Err(PipeError::AlreadyLinked(far));
        }
        if near_node.far.is_some() {
            return Err(PipeError::AlreadyLinked(near));
        }

        if let Some(n) = self.node_mut(far) {
            n.near = Some(near);
        }
        if let Some(n) = self.node_mut(near) {
            n.far = Some(far);
        }

        trace_at!(
            self.config.verbosity,
            Level::Debug,
            "attached {} -> {}",
            far,
            near
        );
        Ok(())
    }

    /// Undo [`attach`](Self::attach)
    pub fn detach(&mut self, far: SegmentId, near: SegmentId) -> Result<()> {
        let far_node = self.node(far).ok_or(PipeError::UnknownSegment(far))?;
        let near_node = self.node(near).ok_or(PipeError::UnknownSegment(near))?;
        if far_node.near != Some(near) || near_node.far != Some(far) {
            return Err(PipeError::NotLinked { far, near });
        }

        if let Some(n) = self.node_mut(far) {
            n.near = None;
        }
        if let Some(n) = self.node_mut(near) {
            n.far = None;
        }
        Ok(())
    }

    /// Transport-side neighbour
    pub fn near_of(&self, id: SegmentId) -> Option<SegmentId> {
        self.node(id).and_then(|n| n.near)
    }

    /// Application-side neighbour
    pub fn far_of(&self, id: SegmentId) -> Option<SegmentId> {
        self.node(id).and_then(|n| n.far)
    }

    pub fn segment_name(&self, id: SegmentId) -> Option<&'static str> {
        self.node(id).map(|n| n.segment.name())
    }

    /// Typed view of a segment
    pub fn segment<T: PipeSegment>(&self, id: SegmentId) -> Option<&T> {
        self.node(id)?.segment.as_any().downcast_ref::<T>()
    }

    pub fn segment_mut<T: PipeSegment>(&mut self, id: SegmentId) -> Option<&mut T> {
        self.node_mut(id)?.segment.as_any_mut().downcast_mut::<T>()
    }

    /// First segment of type `T`, in slot order
    pub fn find<T: PipeSegment>(&self) -> Option<SegmentId> {
        self.nodes.iter().enumerate().find_map(|(idx, node)| {
            node.as_ref()
                .filter(|n| n.segment.as_any().is::<T>())
                .map(|_| SegmentId::from_index(idx))
        })
    }

    /// Hand application data to `entry`, heading for the transport
    pub fn to_counterparty<'a>(&mut self, entry: SegmentId, buffer: Buffer<'a>) -> Transfer<'a> {
        self.run(entry, Direction::ToCounterparty, buffer)
    }

    /// Hand transport data to `entry`, heading for the application
    pub fn from_counterparty<'a>(
        &mut self,
        entry: SegmentId,
        buffer: Buffer<'a>,
    ) -> Transfer<'a> {
        self.run(entry, Direction::FromCounterparty, buffer)
    }

    fn run<'a>(
        &mut self,
        entry: SegmentId,
        direction: Direction,
        buffer: Buffer<'a>,
    ) -> Transfer<'a> {
        self.stats.transfers += 1;

        let mut current = entry;
        let mut buffer = buffer;
        let mut hops = 0;

        let answer = loop {
            if hops == self.config.max_hops {
                self.stats.hop_limit_hits += 1;
                trace_at!(
                    self.config.verbosity,
                    Level::Warn,
                    "transfer from {} exceeded {} hops",
                    entry,
                    self.config.max_hops
                );
                break Transfer::Error(buffer);
            }
            hops += 1;

            let Some(node) = self.node_mut(current) else {
                break Transfer::Error(buffer);
            };

            match node.segment.transfer(direction, buffer) {
                Flow::Forward(next_buffer) => match node.link(direction) {
                    Some(next) => {
                        current = next;
                        buffer = next_buffer;
                    }
                    // End of the chain: nobody takes implicit ownership
                    None => break Transfer::Unclaimed(next_buffer),
                },
                Flow::Done(transfer) => break transfer,
                Flow::Splice {
                    segment,
                    buffer: next_buffer,
                } => match self.splice(current, direction, segment) {
                    Ok(id) => {
                        current = id;
                        buffer = next_buffer;
                    }
                    Err(err) => {
                        trace_at!(
                            self.config.verbosity,
                            Level::Warn,
                            "splice at {} failed: {}",
                            current,
                            err
                        );
                        if let Some(node) = self.node_mut(current) {
                            node.segment.splice_failed();
                        }
                        break Transfer::Error(next_buffer);
                    }
                },
            }
        };

        match &answer {
            Transfer::Bearer => self.stats.taken += 1,
            Transfer::Retained(_) | Transfer::Unclaimed(_) => self.stats.returned += 1,
            Transfer::Error(_) => self.stats.rejected += 1,
        }
        trace_at!(
            self.config.verbosity,
            Level::Trace,
            "{:?} via {}: {}",
            direction,
            entry,
            answer.responsibility()
        );
        answer
    }

    /// Insert `segment` after `at` in the direction of travel
    fn splice(
        &mut self,
        at: SegmentId,
        direction: Direction,
        segment: Box<dyn PipeSegment>,
    ) -> Result<SegmentId> {
        let beyond = self.node(at).and_then(|n| n.link(direction));
        let id = self.add(segment)?;

        if let Some(n) = self.node_mut(at) {
            *n.link_mut(direction) = Some(id);
        }
        if let Some(n) = self.node_mut(id) {
            *n.link_mut(direction.reverse()) = Some(at);
            *n.link_mut(direction) = beyond;
        }
        if let Some(beyond) = beyond {
            if let Some(n) = self.node_mut(beyond) {
                *n.link_mut(direction.reverse()) = Some(id);
            }
        }

        self.stats.splices += 1;
        trace_at!(
            self.config.verbosity,
            Level::Debug,
            "spliced {} next to {}",
            id,
            at
        );
        Ok(id)
    }

    fn node(&self, id: SegmentId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: SegmentId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::{Relay, RelayPolicy};

    #[test]
    fn test_attach_rules() {
        let mut pipe = Pipeline::default();
        let a = pipe.add(Box::new(Relay::new())).unwrap();
        let b = pipe.add(Box::new(Relay::new())).unwrap();
        let c = pipe.add(Box::new(Relay::new())).unwrap();

        assert_eq!(pipe.attach(a, a), Err(PipeError::SelfLink(a)));
        pipe.attach(a, b).unwrap();
        assert_eq!(pipe.attach(a, c), Err(PipeError::AlreadyLinked(a)));
        assert_eq!(pipe.attach(c, b), Err(PipeError::AlreadyLinked(b)));
        assert_eq!(pipe.near_of(a), Some(b));
        assert_eq!(pipe.far_of(b), Some(a));

        assert_eq!(pipe.detach(b, a), Err(PipeError::NotLinked { far: b, near: a }));
        pipe.detach(a, b).unwrap();
        assert_eq!(pipe.near_of(a), None);
    }

    #[test]
    fn test_remove_unlinks_neighbours() {
        let mut pipe = Pipeline::default();
        let a = pipe.add(Box::new(Relay::new())).unwrap();
        let b = pipe.add(Box::new(Relay::new())).unwrap();
        let c = pipe.add(Box::new(Relay::new())).unwrap();
        pipe.attach(a, b).unwrap();
        pipe.attach(b, c).unwrap();

        let removed = pipe.remove(b).unwrap();
        assert_eq!(removed.name(), "relay");
        assert_eq!(pipe.near_of(a), None);
        assert_eq!(pipe.far_of(c), None);
        assert_eq!(pipe.len(), 2);
        assert!(matches!(pipe.remove(b), Err(PipeError::UnknownSegment(_))));
    }

    #[test]
    fn test_arena_full() {
        let mut pipe = Pipeline::new(PipelineConfig::default().with_max_segments(1));
        pipe.add(Box::new(Relay::new())).unwrap();
        assert!(matches!(
            pipe.add(Box::new(Relay::new())),
            Err(PipeError::PipelineFull { max: 1 })
        ));
    }

    #[test]
    fn test_unknown_entry_is_rejected() {
        let mut pipe = Pipeline::default();
        let id = pipe.add(Box::new(Relay::new())).unwrap();
        pipe.remove(id).unwrap();

        let answer = pipe.to_counterparty(id, Buffer::Creator(b"lost"));
        assert_eq!(answer, Transfer::Error(Buffer::Creator(b"lost")));
        assert_eq!(pipe.stats().rejected, 1);
    }

    #[test]
    fn test_typed_lookup() {
        let mut pipe = Pipeline::default();
        let id = pipe
            .add(Box::new(Relay::new().with_to_policy(RelayPolicy::Block)))
            .unwrap();
        assert!(pipe.segment::<Relay>(id).is_some());
        assert_eq!(pipe.find::<Relay>(), Some(id));
        assert_eq!(pipe.segment_name(id), Some("relay"));
    }
}
