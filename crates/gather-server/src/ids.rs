//! Injected id generators for players and sessions.
//!
//! Each server instance owns its own generators, so independent instances
//! (and tests) never share a counter. Ids start at 1 and increase by one per
//! call.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use gather_net::{PlayerId, SessionId};

/// Atomic generator for monotonically increasing [`PlayerId`]s.
#[derive(Debug)]
pub struct PlayerIdGenerator {
    next: AtomicU32,
}

impl PlayerIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Return the next unique [`PlayerId`].
    pub fn next_id(&self) -> PlayerId {
        PlayerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PlayerIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomic generator for monotonically increasing [`SessionId`]s.
///
/// Session ids share the wire with negative error codes, so the generator
/// never wraps: once `i32::MAX` has been issued it is exhausted.
#[derive(Debug)]
pub struct SessionIdGenerator {
    // Wider than the id so "one past i32::MAX" is representable.
    next: AtomicI64,
}

impl SessionIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator whose first id is `first`. Must be non-negative:
    /// negative values are reserved for error codes on the wire.
    pub fn starting_at(first: i32) -> Self {
        Self {
            next: AtomicI64::new(i64::from(first.max(0))),
        }
    }

    /// Return the next unique [`SessionId`], or `None` once ids are exhausted.
    pub fn next_id(&self) -> Option<SessionId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n <= i64::from(i32::MAX)).then_some(n + 1)
            })
            .ok()
            .and_then(|n| i32::try_from(n).ok())
            .map(SessionId)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
