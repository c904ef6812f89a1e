//! Pipeline configuration

use log::LevelFilter;
use static_assertions::const_assert;

/// Default segment arena size
pub const DEFAULT_MAX_SEGMENTS: usize = 32;

/// Default bound on segment visits per transfer
pub const DEFAULT_MAX_HOPS: usize = 16;

const_assert!(DEFAULT_MAX_SEGMENTS <= u16::MAX as usize);
const_assert!(DEFAULT_MAX_HOPS >= 1);

/// Pipeline tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Segments the arena can hold
    pub max_segments: usize,
    /// Segment visits allowed in one transfer before it is answered with
    /// ERROR; catches cyclic links
    pub max_hops: usize,
    /// Diagnostic verbosity (off by default)
    pub verbosity: LevelFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_hops: DEFAULT_MAX_HOPS,
            verbosity: LevelFilter::Off,
        }
    }
}

impl PipelineConfig {
    pub fn with_max_segments(mut self, max: usize) -> Self {
        self.max_segments = max;
        self
    }

    pub fn with_max_hops(mut self, max: usize) -> Self {
        self.max_hops = max;
        self
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.max_segments = self.max_segments.clamp(1, u16::MAX as usize);
        self.max_hops = self.max_hops.max(1);
        self
    }
}
