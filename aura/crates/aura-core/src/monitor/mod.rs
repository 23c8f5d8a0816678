//! Monitor Module - Per-object locks with wait/notify
//!
//! Every object header carries a monitor word. Uncontended locking stays in
//! the header as a thin lock (owner + recursion, updated by CAS). Contention,
//! `wait`, or recursion beyond the thin field inflates the monitor into a
//! side-table record with FIFO acquirer and waiter queues.
//!
//! ## Transitions
//!
//! ```text
//!              CAS                      contention / wait / overflow
//!  Unlocked ─────────► ThinLocked(t, n) ─────────────────────────────► Inflated(i)
//!     ▲                     │ release at n == 1                          │
//!     └─────────────────────┘                                            │
//!     ▲                   idle at release (no STW requested)             │
//!     └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Release with queued acquirers hands ownership directly to the oldest one
//! before returning. There is no priority inheritance.

pub mod record;
pub mod table;
pub mod word;

pub use record::{MonitorRecord, RecordSnapshot, RecordState, Waiter};
pub use table::MonitorTable;
pub use word::{MonitorIndex, MonitorWord};

use crate::error::{Result, VmError};
use crate::logging::{VmEvent, VmLogger};
use crate::object::ObjRef;
use crate::safepoint::SafepointCoordinator;
use crate::stats::VmStats;
use crate::thread::{ExecState, ThreadContext, ThreadId};
use crossbeam::utils::Backoff;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use word::MAX_THIN_RECURSION;

/// Spins between safepoint polls while waiting on a thin lock
const SPIN_POLL_INTERVAL: u32 = 16;

/// Observable state of an object's monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Unlocked,
    Thin { owner: ThreadId, recursion: u32 },
    Inflated(RecordSnapshot),
}

impl MonitorState {
    /// Current owner, if any
    pub fn owner(&self) -> Option<ThreadId> {
        match self {
            MonitorState::Unlocked => None,
            MonitorState::Thin { owner, .. } => Some(*owner),
            MonitorState::Inflated(snapshot) => snapshot.owner,
        }
    }

    /// Current recursion count (0 when unowned)
    pub fn recursion(&self) -> u32 {
        match self {
            MonitorState::Unlocked => 0,
            MonitorState::Thin { recursion, .. } => *recursion,
            MonitorState::Inflated(snapshot) => snapshot.recursion,
        }
    }

    /// No owner and, if inflated, nobody queued
    pub fn is_unlocked(&self) -> bool {
        match self {
            MonitorState::Unlocked => true,
            MonitorState::Thin { .. } => false,
            MonitorState::Inflated(snapshot) => {
                snapshot.owner.is_none() && snapshot.acquirers.is_empty() && snapshot.waiters.is_empty()
            },
        }
    }
}

/// How a `wait` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Notified,
    TimedOut,
}

/// Outcome of looking up the record an inflated word points to
enum Lookup<'a> {
    Live(MutexGuard<'a, RecordState>),
    /// Word changed under us (deflated or reused), reload it
    Stale,
}

/// Monitor subsystem
pub struct Monitors {
    table: MonitorTable,
    safepoint: Arc<SafepointCoordinator>,
    spin_limit: u32,
    stats: Arc<VmStats>,
    logger: Arc<VmLogger>,
}

impl Monitors {
    /// Create the monitor subsystem
    ///
    /// # Arguments
    /// * `capacity` - Side-table capacity
    /// * `spin_limit` - Spins on a contended thin lock before inflating
    pub fn new(
        capacity: usize,
        spin_limit: u32,
        safepoint: Arc<SafepointCoordinator>,
        stats: Arc<VmStats>,
        logger: Arc<VmLogger>,
    ) -> Self {
        Self {
            table: MonitorTable::new(capacity),
            safepoint,
            spin_limit,
            stats,
            logger,
        }
    }

    fn illegal(ctx: &ThreadContext, obj: ObjRef) -> VmError {
        VmError::IllegalMonitorState {
            thread: ctx.id(),
            object: obj.addr(),
        }
    }

    fn decode(obj: ObjRef, raw: usize) -> Result<MonitorWord> {
        MonitorWord::decode(raw).ok_or_else(|| {
            VmError::Internal(format!("corrupt monitor word {:#x} on object {}", raw, obj))
        })
    }

    /// Lock the record for `obj` at `index` if it is still current
    fn lookup<'a>(&self, record: &'a MonitorRecord, obj: ObjRef) -> Lookup<'a> {
        let state = record.lock();
        if state.retired || record.object() != obj {
            Lookup::Stale
        } else {
            Lookup::Live(state)
        }
    }

    /// Acquire the monitor of `obj`
    ///
    /// Re-entrant. Blocks (as a safe thread) while another thread owns it.
    ///
    /// # Returns
    /// `MonitorRecordExhaustion` if inflation finds the side table full
    pub fn acquire(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<()> {
        let me = ctx.id();
        let header = obj.header();
        let backoff = Backoff::new();
        let mut spins = 0u32;

        loop {
            let raw = header.load_monitor();
            match Self::decode(obj, raw)? {
                MonitorWord::Unlocked => {
                    let thin = MonitorWord::ThinLocked {
                        owner: me,
                        recursion: 1,
                    };
                    if header.cas_monitor(raw, thin.encode()).is_ok() {
                        self.stats.record_thin_acquire();
                        return Ok(());
                    }
                },
                MonitorWord::ThinLocked { owner, recursion } if owner == me => {
                    if recursion < MAX_THIN_RECURSION {
                        let thin = MonitorWord::ThinLocked {
                            owner,
                            recursion: recursion + 1,
                        };
                        if header.cas_monitor(raw, thin.encode()).is_ok() {
                            return Ok(());
                        }
                    } else {
                        self.safepoint.poll(ctx);
                        self.inflate(ctx, obj, raw)?;
                    }
                },
                MonitorWord::ThinLocked { .. } => {
                    if spins < self.spin_limit {
                        spins += 1;
                        if spins % SPIN_POLL_INTERVAL == 0 {
                            self.safepoint.poll(ctx);
                        }
                        backoff.snooze();
                        continue;
                    }
                    self.safepoint.poll(ctx);
                    self.inflate(ctx, obj, raw)?;
                },
                MonitorWord::Inflated(index) => {
                    if self.enter_inflated(ctx, obj, index)? {
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Inflate the monitor whose header word was `raw`
    ///
    /// # Returns
    /// `true` if this call published the record, `false` if the word changed
    /// or a stop-the-world request arrived first (caller reloads and retries)
    fn inflate(&self, ctx: &ThreadContext, obj: ObjRef, raw: usize) -> Result<bool> {
        let (owner, recursion) = match Self::decode(obj, raw)? {
            MonitorWord::ThinLocked { owner, recursion } => (Some(owner), recursion),
            MonitorWord::Unlocked => (None, 0),
            MonitorWord::Inflated(_) => return Ok(false),
        };

        let record = self.table.allocate(obj, owner, recursion)?;
        if self.safepoint.should_block(ctx) {
            self.table.free(record.index());
            return Ok(false);
        }

        let inflated = MonitorWord::Inflated(record.index()).encode();
        if obj.header().cas_monitor(raw, inflated).is_err() {
            self.table.free(record.index());
            return Ok(false);
        }

        self.stats.record_inflation();
        self.logger.log(VmEvent::Inflated {
            object: obj.addr(),
            index: record.index(),
            thread: ctx.id().as_u32(),
        });
        Ok(true)
    }

    /// Acquire through the record at `index`
    ///
    /// # Returns
    /// `false` if the record is stale and the header must be reloaded
    fn enter_inflated(&self, ctx: &ThreadContext, obj: ObjRef, index: MonitorIndex) -> Result<bool> {
        let me = ctx.id();
        let record = match self.table.get(index) {
            Some(record) => record,
            None => return Ok(false),
        };
        let mut state = match self.lookup(&record, obj) {
            Lookup::Live(state) => state,
            Lookup::Stale => return Ok(false),
        };

        match state.owner {
            None => {
                debug_assert!(state.acquirers.is_empty());
                state.owner = Some(me);
                state.recursion = 1;
            },
            Some(owner) if owner == me => {
                state.recursion = state.recursion.checked_add(1).ok_or_else(|| {
                    VmError::Internal(format!("monitor recursion overflow on {}", obj))
                })?;
            },
            Some(_) => {
                self.stats.record_contended_acquire();
                state.acquirers.push_back(Waiter {
                    thread: me,
                    recursion: 1,
                });
                self.safepoint.enter_blocked(ctx, ExecState::Blocked);
                while state.owner != Some(me) {
                    record.cond().wait(&mut state);
                }
                drop(state);
                self.safepoint.leave_blocked(ctx);
            },
        }
        Ok(true)
    }

    /// Release one level of the monitor of `obj`
    ///
    /// # Returns
    /// `IllegalMonitorState` if the calling thread does not own the monitor
    pub fn release(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<()> {
        let me = ctx.id();
        let header = obj.header();

        loop {
            let raw = header.load_monitor();
            match Self::decode(obj, raw)? {
                MonitorWord::Unlocked => return Err(Self::illegal(ctx, obj)),
                MonitorWord::ThinLocked { owner, recursion } => {
                    if owner != me {
                        return Err(Self::illegal(ctx, obj));
                    }
                    let next = if recursion == 1 {
                        MonitorWord::Unlocked
                    } else {
                        MonitorWord::ThinLocked {
                            owner,
                            recursion: recursion - 1,
                        }
                    };
                    // Fails only if another thread inflated meanwhile
                    if header.cas_monitor(raw, next.encode()).is_ok() {
                        return Ok(());
                    }
                },
                MonitorWord::Inflated(index) => {
                    let record = match self.table.get(index) {
                        Some(record) => record,
                        None => continue,
                    };
                    let mut state = match self.lookup(&record, obj) {
                        Lookup::Live(state) => state,
                        Lookup::Stale => continue,
                    };

                    if state.owner != Some(me) || state.recursion == 0 {
                        return Err(Self::illegal(ctx, obj));
                    }

                    state.recursion -= 1;
                    if state.recursion > 0 {
                        return Ok(());
                    }

                    state.owner = None;
                    if state.hand_off().is_some() {
                        record.cond().notify_all();
                        return Ok(());
                    }

                    if state.waiters.is_empty() && !self.safepoint.is_stop_requested() {
                        let deflated = self.deflate_locked(&record, &mut state, raw);
                        drop(state);
                        if deflated {
                            self.table.free(index);
                        }
                    }
                    return Ok(());
                },
            }
        }
    }

    /// Return an idle record's monitor to the header
    ///
    /// Caller holds the record lock and frees the slot after dropping it.
    fn deflate_locked(&self, record: &MonitorRecord, state: &mut RecordState, raw: usize) -> bool {
        debug_assert!(state.is_idle());
        let obj = record.object();
        if obj
            .header()
            .cas_monitor(raw, MonitorWord::Unlocked.encode())
            .is_err()
        {
            log::warn!(
                "Monitor of {} changed while record {} was locked, not deflating",
                obj,
                record.index()
            );
            return false;
        }

        state.retired = true;
        self.stats.record_deflation();
        self.logger.log(VmEvent::Deflated {
            object: obj.addr(),
            index: record.index(),
        });
        true
    }

    /// Wait on the monitor of `obj`
    ///
    /// Releases ownership completely, blocks until notified or timed out,
    /// then reacquires and restores the full recursion count before
    /// returning. Timeouts are best effort: reacquiring may take longer.
    ///
    /// # Arguments
    /// * `timeout` - `None` waits until notified
    pub fn wait(&self, ctx: &ThreadContext, obj: ObjRef, timeout: Option<Duration>) -> Result<WaitStatus> {
        let me = ctx.id();
        let header = obj.header();

        // Safe point before blocking
        self.safepoint.poll(ctx);

        loop {
            let raw = header.load_monitor();
            match Self::decode(obj, raw)? {
                MonitorWord::Unlocked => return Err(Self::illegal(ctx, obj)),
                MonitorWord::ThinLocked { owner, .. } if owner != me => {
                    return Err(Self::illegal(ctx, obj))
                },
                MonitorWord::ThinLocked { .. } => {
                    if !self.inflate(ctx, obj, raw)? {
                        self.safepoint.poll(ctx);
                    }
                },
                MonitorWord::Inflated(index) => {
                    let record = match self.table.get(index) {
                        Some(record) => record,
                        None => continue,
                    };
                    let mut state = match self.lookup(&record, obj) {
                        Lookup::Live(state) => state,
                        Lookup::Stale => continue,
                    };
                    if state.owner != Some(me) {
                        return Err(Self::illegal(ctx, obj));
                    }
                    return self.wait_inflated(ctx, &record, &mut state, timeout);
                },
            }
        }
    }

    fn wait_inflated(
        &self,
        ctx: &ThreadContext,
        record: &MonitorRecord,
        state: &mut MutexGuard<'_, RecordState>,
        timeout: Option<Duration>,
    ) -> Result<WaitStatus> {
        let me = ctx.id();
        let saved = state.recursion;

        state.waiters.push_back(Waiter {
            thread: me,
            recursion: saved,
        });
        state.owner = None;
        state.recursion = 0;
        if state.hand_off().is_some() {
            record.cond().notify_all();
        }
        self.stats.record_wait();

        self.safepoint.enter_blocked(ctx, ExecState::Blocked);
        let mut blocked = true;
        let mut status = WaitStatus::Notified;
        // A deadline past the clock's range waits untimed
        let mut deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        while state.owner != Some(me) {
            let Some(until) = deadline else {
                record.cond().wait(state);
                continue;
            };

            if !record.cond().wait_until(state, until).timed_out() || state.owner == Some(me) {
                continue;
            }

            deadline = None;
            if !state.waiters.iter().any(|w| w.thread == me) {
                // Already notified, keep competing for ownership
                continue;
            }

            // Requeue as an acquirer; no monitor state changes while the
            // world is stopped
            MutexGuard::unlocked(state, || self.safepoint.leave_blocked(ctx));
            blocked = false;

            if let Some(waiter) = state.remove_waiter(me) {
                status = WaitStatus::TimedOut;
                self.stats.record_wait_timeout();
                if state.owner.is_none() {
                    debug_assert!(state.acquirers.is_empty());
                    state.owner = Some(me);
                    state.recursion = waiter.recursion;
                } else {
                    state.acquirers.push_back(waiter);
                }
            }

            if state.owner != Some(me) {
                self.safepoint.enter_blocked(ctx, ExecState::Blocked);
                blocked = true;
            }
        }

        debug_assert_eq!(state.recursion, saved);
        if blocked {
            MutexGuard::unlocked(state, || self.safepoint.leave_blocked(ctx));
        }
        Ok(status)
    }

    /// Move one waiter to the acquirer queue
    ///
    /// # Returns
    /// Number of waiters moved (0 or 1)
    pub fn notify(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<usize> {
        self.notify_waiters(ctx, obj, false)
    }

    /// Move every waiter to the acquirer queue, preserving their order
    pub fn notify_all(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<usize> {
        self.notify_waiters(ctx, obj, true)
    }

    fn notify_waiters(&self, ctx: &ThreadContext, obj: ObjRef, all: bool) -> Result<usize> {
        let me = ctx.id();
        let header = obj.header();

        loop {
            let raw = header.load_monitor();
            match Self::decode(obj, raw)? {
                MonitorWord::Unlocked => return Err(Self::illegal(ctx, obj)),
                // A thin lock has no waiters
                MonitorWord::ThinLocked { owner, .. } => {
                    return if owner == me {
                        Ok(0)
                    } else {
                        Err(Self::illegal(ctx, obj))
                    };
                },
                MonitorWord::Inflated(index) => {
                    let record = match self.table.get(index) {
                        Some(record) => record,
                        None => continue,
                    };
                    let mut state = match self.lookup(&record, obj) {
                        Lookup::Live(state) => state,
                        Lookup::Stale => continue,
                    };
                    if state.owner != Some(me) {
                        return Err(Self::illegal(ctx, obj));
                    }

                    let count = if all {
                        state.waiters.len()
                    } else {
                        state.waiters.len().min(1)
                    };
                    for _ in 0..count {
                        if let Some(waiter) = state.waiters.pop_front() {
                            state.acquirers.push_back(waiter);
                        }
                    }

                    self.stats.record_notifications(count);
                    return Ok(count);
                },
            }
        }
    }

    /// Check if `ctx` owns the monitor of `obj`
    pub fn holds_lock(&self, ctx: &ThreadContext, obj: ObjRef) -> bool {
        self.state(obj).owner() == Some(ctx.id())
    }

    /// Observable state of the monitor of `obj`
    pub fn state(&self, obj: ObjRef) -> MonitorState {
        loop {
            let raw = obj.header().load_monitor();
            match MonitorWord::decode(raw) {
                Some(MonitorWord::Unlocked) | None => return MonitorState::Unlocked,
                Some(MonitorWord::ThinLocked { owner, recursion }) => {
                    return MonitorState::Thin { owner, recursion }
                },
                Some(MonitorWord::Inflated(index)) => {
                    if let Some(record) = self.table.get(index) {
                        if record.object() == obj {
                            let snapshot = record.snapshot();
                            if obj.header().load_monitor() == raw {
                                return MonitorState::Inflated(snapshot);
                            }
                        }
                    }
                },
            }
        }
    }

    /// Deflate every idle inflated monitor
    ///
    /// Run while the world is stopped, to reclaim records whose release
    /// happened while a stop-the-world request was pending.
    ///
    /// # Returns
    /// Number of records reclaimed
    pub fn deflate_idle(&self) -> usize {
        self.sweep_idle(false)
    }

    /// Deflate idle records after a stop-the-world request was abandoned
    ///
    /// Runs alongside mutators, under the same record locks a release
    /// deflates with. Stops at the first record it finds while a new request
    /// is pending, leaving the rest to that request's resume.
    pub fn deflate_idle_after_rollback(&self) -> usize {
        self.sweep_idle(true)
    }

    fn sweep_idle(&self, yield_to_requests: bool) -> usize {
        let mut reclaimed = 0;
        for record in self.table.records() {
            let mut state = record.lock();
            if yield_to_requests && self.safepoint.is_stop_requested() {
                break;
            }
            if state.retired || !state.is_idle() {
                continue;
            }
            let raw = MonitorWord::Inflated(record.index()).encode();
            let deflated = self.deflate_locked(&record, &mut state, raw);
            drop(state);
            if deflated {
                self.table.free(record.index());
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Objects whose monitors are inflated
    ///
    /// Enumerated through the table latch only.
    pub fn roots(&self) -> Vec<ObjRef> {
        self.table.objects()
    }

    /// Number of live inflated monitors
    pub fn inflated_count(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &MonitorTable {
        &self.table
    }
}
