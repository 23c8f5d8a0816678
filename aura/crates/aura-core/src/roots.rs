//! Root enumeration
//!
//! Roots contributed by one thread: the in-flight and uncaught exception
//! slots, exceptions delivered to frame handler slots, the objects of every
//! monitor the thread holds and, when enabled, every word of the published
//! native stack range that points at a live object.
//!
//! Global roots are the exceptions the runtime preallocates and the inflated
//! monitor back-references, enumerated through the monitor table latch.

use crate::monitor::Monitors;
use crate::object::{ObjRef, ObjectSpace};
use crate::thread::{ThreadContext, ThreadId};
use crate::util::constants::{OBJECT_ALIGNMENT, WORD_SIZE};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// Where a root was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    PendingException,
    UncaughtException,
    FrameException,
    HeldMonitor,
    InflatedMonitor,
    /// Exception instance the runtime allocated ahead of time
    RuntimeReserved,
    /// Word on the native stack that looks like an object address
    ConservativeStack,
}

/// One GC root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Root {
    pub object: ObjRef,
    pub kind: RootKind,
    /// Contributing thread, `None` for global roots
    pub thread: Option<ThreadId>,
}

/// Collects roots, first kind wins for an object reported twice
struct RootSet {
    thread: Option<ThreadId>,
    roots: IndexMap<ObjRef, RootKind>,
}

impl RootSet {
    fn new(thread: Option<ThreadId>) -> Self {
        Self {
            thread,
            roots: IndexMap::new(),
        }
    }

    fn add(&mut self, object: ObjRef, kind: RootKind) {
        self.roots.entry(object).or_insert(kind);
    }

    fn into_roots(self) -> Vec<Root> {
        let thread = self.thread;
        self.roots
            .into_iter()
            .map(|(object, kind)| Root { object, kind, thread })
            .collect()
    }
}

/// Root scanner
pub struct RootScanner {
    space: Arc<ObjectSpace>,
    conservative: bool,
}

impl RootScanner {
    /// Create a scanner
    ///
    /// # Arguments
    /// * `space` - Validates candidate addresses found on native stacks
    /// * `conservative` - Scan published native stack ranges
    pub fn new(space: Arc<ObjectSpace>, conservative: bool) -> Self {
        Self { space, conservative }
    }

    pub fn is_conservative(&self) -> bool {
        self.conservative
    }

    /// Roots of one thread
    ///
    /// The thread must not be RUNNING (or must be the caller), otherwise its
    /// shadow stack and native stack change underneath the scan.
    pub fn thread_roots(&self, ctx: &ThreadContext) -> Vec<Root> {
        let mut set = RootSet::new(Some(ctx.id()));

        if let Some(exception) = ctx.pending_exception() {
            set.add(exception, RootKind::PendingException);
        }
        if let Some(exception) = ctx.uncaught_exception() {
            set.add(exception, RootKind::UncaughtException);
        }

        {
            let stack = ctx.stack();
            for exception in stack.frames().iter().filter_map(|frame| frame.exception) {
                set.add(exception, RootKind::FrameException);
            }
            for lock in stack.locks() {
                set.add(lock.object, RootKind::HeldMonitor);
            }
        }

        if self.conservative {
            self.scan_native_stack(ctx, &mut set);
        }

        set.into_roots()
    }

    /// Roots owned by no thread: `reserved` objects, then every inflated
    /// monitor's object
    pub fn global_roots(&self, monitors: &Monitors, reserved: &[ObjRef]) -> Vec<Root> {
        let mut set = RootSet::new(None);
        for &object in reserved {
            set.add(object, RootKind::RuntimeReserved);
        }
        for object in monitors.roots() {
            set.add(object, RootKind::InflatedMonitor);
        }
        set.into_roots()
    }

    /// Scan `[sp, stack high)` of a thread with published registers
    fn scan_native_stack(&self, ctx: &ThreadContext, set: &mut RootSet) {
        let bounds = ctx.stack_bounds();
        let Some(registers) = ctx.registers() else {
            return;
        };
        if !bounds.is_known() || !bounds.contains(registers.sp) {
            log::trace!(
                "Thread {} has no scannable stack (sp {:#x}, bounds {:#x}..{:#x})",
                ctx.id(),
                registers.sp,
                bounds.low,
                bounds.high
            );
            return;
        }

        let start = registers.sp & !(WORD_SIZE - 1);
        let mut addr = start.max(bounds.low);
        let mut found = 0usize;
        while addr + WORD_SIZE <= bounds.high {
            // SAFETY: addr is word aligned and inside the thread's stack,
            // which stays mapped while the thread is attached
            let value = unsafe { (addr as *const usize).read_volatile() };
            if let Some(object) = self.candidate(value) {
                set.add(object, RootKind::ConservativeStack);
                found += 1;
            }
            addr += WORD_SIZE;
        }

        log::trace!(
            "Conservative scan of thread {} covered {} bytes, {} candidate(s)",
            ctx.id(),
            bounds.high - start,
            found
        );
    }

    /// Live object at `value`, if the word is an aligned object address
    fn candidate(&self, value: usize) -> Option<ObjRef> {
        if value == 0 || value % OBJECT_ALIGNMENT != 0 {
            return None;
        }
        self.space.resolve(value)
    }
}
