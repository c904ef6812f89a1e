//! Pure relay

use core::any::Any;

use crate::buffer::{Buffer, Transfer};
use crate::segment::{Flow, PipeSegment};

/// What a [`Relay`] does with a buffer in one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Forward verbatim
    #[default]
    Pass,
    /// Forward an owned copy of borrowed data; owned buffers move through
    Own,
    /// Hand the buffer straight back
    Block,
}

/// Forwards buffers unchanged, or as configured per direction
#[derive(Debug, Clone, Default)]
pub struct Relay {
    to_policy: RelayPolicy,
    from_policy: RelayPolicy,
    relayed: u64,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_to_policy(mut self, policy: RelayPolicy) -> Self {
        self.to_policy = policy;
        self
    }

    pub fn with_from_policy(mut self, policy: RelayPolicy) -> Self {
        self.from_policy = policy;
        self
    }

    /// Buffers forwarded in either direction
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    fn apply<'a>(&mut self, policy: RelayPolicy, buffer: Buffer<'a>) -> Flow<'a> {
        match policy {
            RelayPolicy::Pass => {
                self.relayed += 1;
                Flow::Forward(buffer)
            }
            RelayPolicy::Own => {
                self.relayed += 1;
                Flow::Forward(buffer.into_owned())
            }
            RelayPolicy::Block => Flow::Done(Transfer::Retained(buffer)),
        }
    }
}

impl PipeSegment for Relay {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn to_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        self.apply(self.to_policy, buffer)
    }

    fn from_counterparty<'a>(&mut self, buffer: Buffer<'a>) -> Flow<'a> {
        self.apply(self.from_policy, buffer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_copies_borrowed_data() {
        let mut relay = Relay::new().with_to_policy(RelayPolicy::Own);
        let local = [7u8, 8];
        match relay.to_counterparty(Buffer::Caller(&local)) {
            Flow::Forward(Buffer::Bearer(data)) => assert_eq!(data, vec![7, 8]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_block_hands_back() {
        let mut relay = Relay::new().with_from_policy(RelayPolicy::Block);
        match relay.from_counterparty(Buffer::Creator(b"no")) {
            Flow::Done(Transfer::Retained(Buffer::Creator(data))) => assert_eq!(data, b"no"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(relay.relayed(), 0);
    }
}
