//! Protocol auto-detection
//!
//! [`ProtocolDetect`] sits between a transport and whatever handles its
//! stream. It looks at the first buffer coming up from the transport, picks
//! the first [`Signature`] whose prefix matches, and splices the segment that
//! signature builds onto its far side. From then on it is a plain relay.
//! If the pipeline cannot take the new segment, detection starts over with
//! the next buffer.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use log::{Level, LevelFilter};

use crate::buffer::{Buffer, Transfer};
use crate::segment::{Flow, PipeSegment};

/// Builds the handler for a detected protocol
pub type SegmentFactory = fn() -> Box<dyn PipeSegment>;

/// A stream prefix and the handler it selects
#[derive(Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub prefix: &'static [u8],
    pub build: SegmentFactory,
}

impl Signature {
    pub const fn new(name: &'static str, prefix: &'static [u8], build: SegmentFactory) -> Self {
        Self {
            name,
            prefix,
            build,
        }
    }
}

impl core::fmt::Debug for Signature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signature")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[derive(Debug)]
pub struct ProtocolDetect {
    signatures: Vec<Signature>,
    fallback: Option<Signature>,
    detected: Option<&'static str>,
    verbosity: LevelFilter,
}

impl ProtocolDetect {
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
            fallback: None,
            detected: None,
            verbosity: LevelFilter::Off,
        }
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Add a candidate; earlier candidates win ties
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// Handler to splice when nothing matches (the prefix is ignored)
    pub fn with_fallback(mut self, fallback: Signature) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Name of the protocol detected so far
    pub fn detected(&self) -> Option<&'static str> {
        self.detected
    }

    fn classify(&self, data: &[u8]) -> Match {
        let mut undecided = false;
        for signature in &self.signatures {
            if data.starts_with(signature.prefix) {
                return Match::Found(*signature);
            }
            if signature.prefix.starts_with(data) {
                undecided = true;
            }
        }
        if undecided {
            Match::NeedMore
        } else {
            match self.fallback {
                Some(fallback) => Match::Found(fallback),
                None => Match::Unknown,
            }
        }
    }
}

enum Match {
    Found(Signature),
    NeedMore,
    Unknown,
}

impl PipeSegment for ProtocolDetect {
    fn name(&self) -> &'static str {
        "protocol-detect"
    }

    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        Flow::Forward(buffer)
    }

    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        if self.detected.is_some() {
            return Flow::Forward(buffer);
        }

        match self.classify(buffer.as_slice()) {
            Match::Found(signature) => {
                self.detected = Some(signature.name);
                trace_at!(
                    self.verbosity,
                    Level::Debug,
                    "detected protocol {}",
                    signature.name
                );
                Flow::Splice {
                    segment: (signature.build)(),
                    buffer,
                }
            }
            // Too short to tell; the transport offers it again with more bytes
            Match::NeedMore => Flow::Done(Transfer::Retained(buffer)),
            Match::Unknown => Flow::Done(Transfer::Error(buffer)),
        }
    }

    fn splice_failed(&mut self) {
        if let Some(name) = self.detected.take() {
            trace_at!(
                self.verbosity,
                Level::Warn,
                "no room for the {} handler; detecting again",
                name
            );
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Default for ProtocolDetect {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::{BufferSink, Relay};

    fn sink() -> Box<dyn PipeSegment> {
        Box::new(BufferSink::new())
    }

    fn relay() -> Box<dyn PipeSegment> {
        Box::new(Relay::new())
    }

    fn detector() -> ProtocolDetect {
        ProtocolDetect::new()
            .with_signature(Signature::new("http", b"GET ", sink))
            .with_signature(Signature::new("tls", &[0x16, 0x03], relay))
    }

    #[test]
    fn test_short_prefix_waits() {
        let mut detect = detector();
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"GE")),
            Flow::Done(Transfer::Retained(_))
        ));
        assert_eq!(detect.detected(), None);
    }

    #[test]
    fn test_match_splices_once() {
        let mut detect = detector();
        match detect.from_counterparty(Buffer::Creator(&[0x16, 0x03, 0x01])) {
            Flow::Splice { segment, .. } => assert_eq!(segment.name(), "relay"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(detect.detected(), Some("tls"));
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"more")),
            Flow::Forward(_)
        ));
    }

    #[test]
    fn test_unknown_without_fallback_is_rejected() {
        let mut detect = detector();
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"SSH-2.0")),
            Flow::Done(Transfer::Error(_))
        ));

        let mut detect = detector().with_fallback(Signature::new("raw", b"", sink));
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"SSH-2.0")),
            Flow::Splice { .. }
        ));
        assert_eq!(detect.detected(), Some("raw"));
    }

    #[test]
    fn test_failed_splice_forgets_detection() {
        let mut detect = detector();
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"GET /")),
            Flow::Splice { .. }
        ));
        detect.splice_failed();
        assert_eq!(detect.detected(), None);
        assert!(matches!(
            detect.from_counterparty(Buffer::Creator(b"GET /")),
            Flow::Splice { .. }
        ));
    }
}
