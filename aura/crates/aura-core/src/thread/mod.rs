//! Thread Module - Attached threads and their per-thread state
//!
//! Every native thread that runs managed code is attached to the runtime and
//! gets a `ThreadContext`: execution state, unwind state, stack bounds, the
//! register snapshot published at safe points, the pending exception slot
//! and the shadow call stack.

pub mod context;
pub mod registry;
pub mod stack;

pub use context::{
    approximate_stack_pointer, ExecState, RegisterSnapshot, StackBounds, ThreadContext,
    UnwindState,
};
pub use registry::ThreadRegistry;
pub use stack::{Frame, HeldLock, ShadowStack};

use crate::monitor::word::MAX_OWNER;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;

/// Runtime thread identifier
///
/// Ids are nonzero and fit the owner field of a thin monitor word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadId(NonZeroU32);

impl ThreadId {
    /// Create an id, `None` for 0 or values beyond the thin-lock owner width
    pub fn new(raw: u32) -> Option<Self> {
        if raw > MAX_OWNER {
            return None;
        }
        NonZeroU32::new(raw).map(ThreadId)
    }

    /// Raw id value
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
