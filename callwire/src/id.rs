//! Identifiers shared by both sides of a call.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide pipe id source. Starts at 1 so no id is ever zero.
static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one output pipe within a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u32);

impl RequestId {
    /// Allocates a fresh id, unique for the life of this process.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for RequestId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a calling peer, as seen by the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallerId(u32);

impl CallerId {
    /// The identity of this process.
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// The raw id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for CallerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert_ne!(a.get(), 0);
    }
}
