//! Ember Pipe - buffer chains with explicit ownership handoff
//!
//! # Purpose
//! Moves byte buffers between an application and a transport through a chain
//! of [`PipeSegment`]s. Every hop states who frees the buffer
//! ([`MemoryResponsibility`]), and the type system holds each side to it:
//! a segment that keeps data owns a `Vec`, a segment that hands data back
//! returns the very buffer it was given.
//!
//! # Integration Points
//! - Depends on: `ember-platform` (verbosity gate)
//! - Provides to: protocol stacks, log capture, `ember-sdk::PipeEventSink`
//!
//! # Architecture
//! - `buffer`: [`Buffer`], [`Transfer`] and the responsibility values
//! - `segment`: the segment trait and its [`Flow`] answers
//! - `pipeline`: arena of segments, neighbour links, the transfer walk
//! - `segments`: relay, log capture, sink, protocol detection
//!
//! # Example
//! ```
//! use ember_pipe::{Buffer, Pipeline, Transfer};
//! use ember_pipe::segments::{BufferSink, Relay};
//!
//! let mut pipe = Pipeline::default();
//! let app = pipe.add(Box::new(Relay::new())).unwrap();
//! let wire = pipe.add(Box::new(BufferSink::new())).unwrap();
//! pipe.attach(app, wire).unwrap();
//!
//! assert_eq!(pipe.to_counterparty(app, Buffer::Bearer(vec![1, 2])), Transfer::Bearer);
//! assert_eq!(pipe.segment::<BufferSink>(wire).unwrap().deliveries(), &[vec![1, 2]]);
//! ```
//!
//! # Testing Strategy
//! - Unit tests: responsibility mapping, each stock segment, link rules
//! - Integration tests (`tests/`): whole chains, splicing, hop bound

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

/// Log through `log` only if this pipeline's verbosity allows it
macro_rules! trace_at {
    ($verbosity:expr, $level:expr, $($arg:tt)+) => {
        if ::ember_platform::verbosity_allows($verbosity, $level) {
            ::log::log!($level, $($arg)+);
        }
    };
}

mod buffer;
mod config;
mod pipeline;
mod segment;
pub mod segments;

pub use buffer::{Buffer, MemoryResponsibility, Transfer};
pub use config::{PipelineConfig, DEFAULT_MAX_HOPS, DEFAULT_MAX_SEGMENTS};
pub use pipeline::{PipeStats, Pipeline, SegmentId};
pub use segment::{Direction, Flow, PipeSegment};

use thiserror::Error;

/// Pipeline construction errors
///
/// Transfers never fail with an error; they answer with a [`Transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("Pipeline full ({max} segments)")]
    PipelineFull { max: usize },

    #[error("Unknown segment: {0}")]
    UnknownSegment(SegmentId),

    #[error("Segment already linked on that side: {0}")]
    AlreadyLinked(SegmentId),

    #[error("Segments not linked: {far} -> {near}")]
    NotLinked { far: SegmentId, near: SegmentId },

    #[error("Segment cannot link to itself: {0}")]
    SelfLink(SegmentId),
}

pub type Result<T> = core::result::Result<T, PipeError>;
