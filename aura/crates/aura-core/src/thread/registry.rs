//! Thread Registry
//!
//! Tracks every native thread attached to the runtime. The safepoint
//! coordinator counts RUNNING threads through it and the root enumerator
//! looks contexts up by id.

use crate::error::{Result, VmError};
use crate::monitor::word::MAX_OWNER;
use crate::thread::{ExecState, StackBounds, ThreadContext, ThreadId};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Registry of attached threads, in attach order
pub struct ThreadRegistry {
    threads: RwLock<IndexMap<ThreadId, Arc<ThreadContext>>>,
    next_id: AtomicU32,
    max_frames: usize,
}

impl ThreadRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `max_frames` - Shadow stack depth limit for attached threads
    pub fn new(max_frames: usize) -> Self {
        Self {
            threads: RwLock::new(IndexMap::new()),
            next_id: AtomicU32::new(1),
            max_frames,
        }
    }

    /// Attach a thread
    ///
    /// The new context starts RUNNING. Ids are never reused, so a stale id
    /// in a thin monitor word can not alias a later thread.
    pub fn attach(&self, name: Option<&str>, bounds: StackBounds) -> Result<Arc<ThreadContext>> {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = ThreadId::new(raw).ok_or_else(|| {
            VmError::Internal(format!("thread id space exhausted ({} ids)", MAX_OWNER))
        })?;

        let ctx = Arc::new(ThreadContext::new(
            id,
            name.map(str::to_string),
            bounds,
            self.max_frames,
        ));
        self.threads.write().insert(id, ctx.clone());
        Ok(ctx)
    }

    /// Detach a thread
    ///
    /// A SUSPENDED thread can not be detached; it is still part of a
    /// stop-the-world window.
    pub fn detach(&self, id: ThreadId) -> Result<Arc<ThreadContext>> {
        let mut threads = self.threads.write();
        let state = threads
            .get(&id)
            .map(|ctx| ctx.state())
            .ok_or(VmError::ThreadNotAttached(id))?;

        if state == ExecState::Suspended {
            return Err(VmError::invalid_state("thread not suspended", "SUSPENDED"));
        }

        threads
            .shift_remove(&id)
            .ok_or(VmError::ThreadNotAttached(id))
    }

    /// Look up an attached thread
    pub fn get(&self, id: ThreadId) -> Option<Arc<ThreadContext>> {
        self.threads.read().get(&id).cloned()
    }

    /// Look up an attached thread, `ThreadNotAttached` if missing
    pub fn require(&self, id: ThreadId) -> Result<Arc<ThreadContext>> {
        self.get(id).ok_or(VmError::ThreadNotAttached(id))
    }

    /// All attached threads, in attach order
    pub fn snapshot(&self) -> Vec<Arc<ThreadContext>> {
        self.threads.read().values().cloned().collect()
    }

    /// Ids of all attached threads
    pub fn ids(&self) -> Vec<ThreadId> {
        self.threads.read().keys().copied().collect()
    }

    /// Number of RUNNING threads other than `except`
    pub fn count_running(&self, except: Option<ThreadId>) -> usize {
        self.threads
            .read()
            .values()
            .filter(|ctx| Some(ctx.id()) != except && ctx.state() == ExecState::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}
