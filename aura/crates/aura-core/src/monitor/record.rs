//! Inflated monitor records

use crate::monitor::word::MonitorIndex;
use crate::object::ObjRef;
use crate::thread::ThreadId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;

/// A thread queued on a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub thread: ThreadId,
    /// Recursion count restored when the thread is handed ownership
    pub recursion: u32,
}

/// Mutable part of a record, guarded by the record lock
#[derive(Debug, Default)]
pub struct RecordState {
    pub owner: Option<ThreadId>,
    pub recursion: u32,
    /// Threads waiting to own the monitor, FIFO
    pub acquirers: VecDeque<Waiter>,
    /// Threads in `wait`, FIFO
    pub waiters: VecDeque<Waiter>,
    /// Set when the record has been deflated; lookups must retry
    pub retired: bool,
}

impl RecordState {
    /// Give ownership to the oldest acquirer
    ///
    /// Only valid while the monitor has no owner.
    pub fn hand_off(&mut self) -> Option<ThreadId> {
        debug_assert!(self.owner.is_none());
        let next = self.acquirers.pop_front()?;
        self.owner = Some(next.thread);
        self.recursion = next.recursion;
        Some(next.thread)
    }

    /// No owner and nobody queued
    pub fn is_idle(&self) -> bool {
        self.owner.is_none() && self.acquirers.is_empty() && self.waiters.is_empty()
    }

    /// Remove `thread` from the waiter queue
    pub fn remove_waiter(&mut self, thread: ThreadId) -> Option<Waiter> {
        let index = self.waiters.iter().position(|w| w.thread == thread)?;
        self.waiters.remove(index)
    }
}

/// Side-table entry for an inflated monitor
pub struct MonitorRecord {
    index: MonitorIndex,
    object: ObjRef,
    state: Mutex<RecordState>,
    cond: Condvar,
}

impl MonitorRecord {
    /// Create a record carrying over a thin lock's owner and recursion
    pub fn new(index: MonitorIndex, object: ObjRef, owner: Option<ThreadId>, recursion: u32) -> Self {
        Self {
            index,
            object,
            state: Mutex::new(RecordState {
                owner,
                recursion,
                ..Default::default()
            }),
            cond: Condvar::new(),
        }
    }

    pub fn index(&self) -> MonitorIndex {
        self.index
    }

    /// Object this record belongs to
    pub fn object(&self) -> ObjRef {
        self.object
    }

    /// Lock the record
    pub fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    /// Condition variable signalled on every ownership change
    pub fn cond(&self) -> &Condvar {
        &self.cond
    }

    /// Copy of the record's state
    pub fn snapshot(&self) -> RecordSnapshot {
        let state = self.state.lock();
        RecordSnapshot {
            index: self.index,
            object: self.object,
            owner: state.owner,
            recursion: state.recursion,
            acquirers: state.acquirers.iter().map(|w| w.thread).collect(),
            waiters: state.waiters.iter().map(|w| w.thread).collect(),
        }
    }
}

impl std::fmt::Debug for MonitorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRecord")
            .field("index", &self.index)
            .field("object", &self.object)
            .finish()
    }
}

/// Point-in-time view of an inflated monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub index: MonitorIndex,
    pub object: ObjRef,
    pub owner: Option<ThreadId>,
    pub recursion: u32,
    pub acquirers: Vec<ThreadId>,
    pub waiters: Vec<ThreadId>,
}
