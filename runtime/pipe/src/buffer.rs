//! Buffers and memory responsibility
//!
//! Who frees a buffer is carried by its type:
//!
//! | Variant            | Responsibility | Meaning                                   |
//! |--------------------|----------------|-------------------------------------------|
//! | `Buffer::Caller`   | CALLER         | borrowed for the duration of the call     |
//! | `Buffer::Creator`  | CREATOR        | static data, never freed                  |
//! | `Buffer::Bearer`   | BEARER         | owned; whoever holds the `Vec` frees it   |
//!
//! A transfer call answers with a [`Transfer`], which binds the caller:
//! either the callee now holds the buffer, or the buffer comes back.

use alloc::vec::Vec;
use core::fmt;

/// Who is responsible for freeing a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryResponsibility {
    /// The caller keeps it; the callee must not free it
    Caller,
    /// The original allocator frees it (static data)
    Creator,
    /// The callee received ownership
    Bearer,
    /// Undetermined; treated as rejected
    Error,
}

impl fmt::Display for MemoryResponsibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryResponsibility::Caller => "CALLER",
            MemoryResponsibility::Creator => "CREATOR",
            MemoryResponsibility::Bearer => "BEARER",
            MemoryResponsibility::Error => "ERROR",
        })
    }
}

/// Data moving through a pipe, tagged with who frees it
#[derive(PartialEq, Eq)]
pub enum Buffer<'a> {
    /// Borrowed from the caller; cannot outlive the call
    Caller(&'a [u8]),
    /// Static data owned by its creator
    Creator(&'static [u8]),
    /// Owned; moving it moves the responsibility
    Bearer(Vec<u8>),
}

impl<'a> Buffer<'a> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Caller(data) => data,
            Buffer::Creator(data) => data,
            Buffer::Bearer(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn responsibility(&self) -> MemoryResponsibility {
        match self {
            Buffer::Caller(_) => MemoryResponsibility::Caller,
            Buffer::Creator(_) => MemoryResponsibility::Creator,
            Buffer::Bearer(_) => MemoryResponsibility::Bearer,
        }
    }

    /// An owned buffer; a `Bearer` buffer is moved, borrowed data is copied
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Buffer::Bearer(data) => data,
            Buffer::Caller(data) => data.to_vec(),
            Buffer::Creator(data) => data.to_vec(),
        }
    }

    /// Copy borrowed data into an owned buffer; owned buffers are moved
    pub fn into_owned(self) -> Buffer<'static> {
        Buffer::Bearer(self.into_vec())
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer::{}({} bytes)", self.responsibility(), self.len())
    }
}

/// Answer to a transfer call
#[derive(Debug, PartialEq, Eq)]
pub enum Transfer<'a> {
    /// BEARER: the callee side now holds the buffer; the caller must not touch it again
    Bearer,
    /// CALLER or CREATOR: nothing was kept; the buffer comes back unchanged
    Retained(Buffer<'a>),
    /// CALLER: the chain ended before anyone looked at the buffer
    ///
    /// Whatever the buffer's own tag, the caller keeps it.
    Unclaimed(Buffer<'a>),
    /// ERROR: undetermined; the buffer comes back and counts as rejected
    Error(Buffer<'a>),
}

impl<'a> Transfer<'a> {
    /// The responsibility this answer binds the caller to
    pub fn responsibility(&self) -> MemoryResponsibility {
        match self {
            Transfer::Bearer => MemoryResponsibility::Bearer,
            Transfer::Retained(Buffer::Creator(_)) => MemoryResponsibility::Creator,
            Transfer::Retained(_) | Transfer::Unclaimed(_) => MemoryResponsibility::Caller,
            Transfer::Error(_) => MemoryResponsibility::Error,
        }
    }

    /// The buffer handed back, if the callee did not take it
    pub fn into_returned(self) -> Option<Buffer<'a>> {
        match self {
            Transfer::Bearer => None,
            Transfer::Retained(buffer) | Transfer::Unclaimed(buffer) | Transfer::Error(buffer) => {
                Some(buffer)
            }
        }
    }

    pub fn is_taken(&self) -> bool {
        matches!(self, Transfer::Bearer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responsibility_follows_variant() {
        let local = [1u8, 2];
        assert_eq!(Buffer::Caller(&local).responsibility(), MemoryResponsibility::Caller);
        assert_eq!(Buffer::Creator(b"hi").responsibility(), MemoryResponsibility::Creator);
        assert_eq!(
            Buffer::Bearer(vec![1]).responsibility(),
            MemoryResponsibility::Bearer
        );
    }

    #[test]
    fn test_into_vec_moves_owned_data() {
        let data = vec![1u8, 2, 3];
        let ptr = data.as_ptr();
        let back = Buffer::Bearer(data).into_vec();
        assert_eq!(back.as_ptr(), ptr);
    }

    #[test]
    fn test_transfer_responsibility() {
        assert_eq!(Transfer::Bearer.responsibility(), MemoryResponsibility::Bearer);
        assert_eq!(
            Transfer::Retained(Buffer::Creator(b"x")).responsibility(),
            MemoryResponsibility::Creator
        );
        assert_eq!(
            Transfer::Retained(Buffer::Bearer(vec![])).responsibility(),
            MemoryResponsibility::Caller
        );
        assert_eq!(
            Transfer::Unclaimed(Buffer::Creator(b"x")).responsibility(),
            MemoryResponsibility::Caller
        );
        let back = Transfer::Error(Buffer::Creator(b"x")).into_returned();
        assert_eq!(back, Some(Buffer::Creator(b"x")));
    }
}
