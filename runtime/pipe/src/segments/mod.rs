//! Stock segments

mod accumulator;
mod detect;
mod relay;
mod sink;

pub use accumulator::Accumulator;
pub use detect::{ProtocolDetect, SegmentFactory, Signature};
pub use relay::{Relay, RelayPolicy};
pub use sink::BufferSink;
