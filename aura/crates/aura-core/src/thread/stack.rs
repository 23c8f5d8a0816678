//! Shadow call stack
//!
//! Compiled code pushes a frame on method entry, keeps the frame's PC current
//! at call sites and pops it on return. Monitor acquisitions are recorded
//! against the frame that made them so the unwinder knows which locks to
//! release when the frame is abandoned.
//!
//! Unwinding only reads, truncates and removes from these vectors; it never
//! allocates.

use crate::error::{Result, VmError};
use crate::object::ObjRef;
use crate::unwind::{MethodId, Pc, PcRange};
use crate::util::constants::TRAP_FRAME_RESERVE;

/// One activation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub method: MethodId,
    /// Current PC inside the method
    pub pc: Pc,
    /// Native stack pointer at method entry, restored on handler entry
    pub sp: usize,
    /// Exception delivered to this frame's handler slot
    pub exception: Option<ObjRef>,
}

impl Frame {
    pub fn new(method: MethodId, pc: Pc, sp: usize) -> Self {
        Self {
            method,
            pc,
            sp,
            exception: None,
        }
    }
}

/// A monitor acquisition recorded against a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldLock {
    pub object: ObjRef,
    /// Index of the owning frame, `None` when acquired with an empty stack
    pub frame: Option<usize>,
    /// PC of the acquisition site
    pub pc: Pc,
}

/// Per-thread stack of frames and held locks
#[derive(Debug)]
pub struct ShadowStack {
    frames: Vec<Frame>,
    locks: Vec<HeldLock>,
    limit: usize,
}

impl ShadowStack {
    /// Create an empty stack with a depth limit
    pub fn new(limit: usize) -> Self {
        Self {
            frames: Vec::with_capacity(limit.min(64)),
            locks: Vec::with_capacity(16),
            limit,
        }
    }

    /// Push a frame
    ///
    /// # Returns
    /// Index of the new frame, or `StackOverflow` at the depth limit
    pub fn push(&mut self, frame: Frame) -> Result<usize> {
        if self.frames.len() >= self.limit {
            return Err(VmError::StackOverflow { limit: self.limit });
        }
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }

    /// Push a frame reconstructed for a hardware trap
    ///
    /// May use a small reserve beyond the limit, so an overflow trap can
    /// still be given a frame to unwind from.
    pub fn push_trap_frame(&mut self, frame: Frame) -> Result<usize> {
        if self.frames.len() >= self.limit + TRAP_FRAME_RESERVE {
            return Err(VmError::StackOverflow { limit: self.limit });
        }
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }

    /// Pop the top frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record an acquisition against the current top frame
    pub fn record_lock(&mut self, object: ObjRef) {
        let (frame, pc) = match self.frames.last() {
            Some(top) => (Some(self.frames.len() - 1), top.pc),
            None => (None, 0),
        };
        self.locks.push(HeldLock { object, frame, pc });
    }

    /// Forget the most recent acquisition of `object`
    ///
    /// Returns false if the thread has no recorded acquisition of it.
    pub fn forget_lock(&mut self, object: ObjRef) -> bool {
        match self.locks.iter().rposition(|lock| lock.object == object) {
            Some(index) => {
                self.locks.remove(index);
                true
            },
            None => false,
        }
    }

    /// Remove the most recent lock held by frame `frame`
    ///
    /// # Arguments
    /// * `frame` - Frame index, `None` for locks taken with an empty stack
    /// * `within` - Only consider locks acquired inside this PC range
    pub fn take_frame_lock(&mut self, frame: Option<usize>, within: Option<PcRange>) -> Option<HeldLock> {
        let index = self.locks.iter().rposition(|lock| {
            lock.frame == frame && within.map_or(true, |range| range.contains(lock.pc))
        })?;
        Some(self.locks.remove(index))
    }

    /// Number of locks held by frame `frame`
    pub fn frame_lock_count(&self, frame: Option<usize>) -> usize {
        self.locks.iter().filter(|lock| lock.frame == frame).count()
    }

    /// Every recorded acquisition, oldest first
    pub fn locks(&self) -> &[HeldLock] {
        &self.locks
    }

    /// Remove and return every recorded acquisition, most recent first
    pub fn drain_locks(&mut self) -> Vec<HeldLock> {
        let mut locks: Vec<HeldLock> = self.locks.drain(..).collect();
        locks.reverse();
        locks
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
